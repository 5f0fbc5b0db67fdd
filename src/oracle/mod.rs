//! Oracle module - batched price acquisition
//!
//! One request per cycle asks the oracle for every tracked asset; the
//! response is normalized into a `PriceReading`. Assets the oracle cannot
//! price are simply absent from the reading.

mod http;

pub use http::HttpPriceOracle;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::AcquisitionError;
use crate::types::{AssetId, PriceReading, PriceRecord};

/// Remote price service answering batched queries
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Source name for diagnostics
    fn name(&self) -> &'static str;

    /// Ask for all `assets` in one request and return the raw response document
    async fn query(&self, assets: &[AssetId], show_extra_info: bool)
        -> Result<Value, AcquisitionError>;
}

/// Turn a `{ "data": { <id>: <record> | null } }` document into priced records.
///
/// Null records and ids that were not requested are skipped; a record whose
/// price cannot be parsed is dropped with a warning. Pricing nothing at all
/// is an error.
pub fn normalize_response(
    document: Value,
    requested: &[AssetId],
) -> Result<BTreeMap<AssetId, PriceRecord>, AcquisitionError> {
    let data = match document {
        Value::Object(mut root) => match root.remove("data") {
            Some(Value::Object(data)) => data,
            Some(other) => {
                return Err(AcquisitionError::Malformed(format!(
                    "`data` is {} instead of an object",
                    json_kind(&other)
                )))
            }
            None => {
                return Err(AcquisitionError::Malformed(
                    "response has no `data` field".to_string(),
                ))
            }
        },
        other => {
            return Err(AcquisitionError::Malformed(format!(
                "response is {} instead of an object",
                json_kind(&other)
            )))
        }
    };

    let mut prices = BTreeMap::new();
    for (id, raw) in data {
        let asset = AssetId::from(id);
        if !requested.contains(&asset) {
            debug!(asset = %asset, "Ignoring unrequested asset in oracle response");
            continue;
        }
        if raw.is_null() {
            debug!(asset = %asset, "Oracle has no price for asset");
            continue;
        }
        match serde_json::from_value::<PriceRecord>(raw) {
            Ok(record) => {
                prices.insert(asset, record);
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "Dropping unparsable price record");
            }
        }
    }

    if prices.is_empty() {
        return Err(AcquisitionError::Empty {
            requested: requested.len(),
        });
    }
    Ok(prices)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fixed asset list + oracle: produces one reading per call
pub struct PriceAcquirer {
    oracle: Arc<dyn PriceOracle>,
    assets: Vec<AssetId>,
    show_extra_info: bool,
}

impl PriceAcquirer {
    pub fn new(oracle: Arc<dyn PriceOracle>, assets: Vec<AssetId>, show_extra_info: bool) -> Self {
        Self {
            oracle,
            assets,
            show_extra_info,
        }
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    /// Query the oracle once and stamp the result with `captured_at`
    pub async fn acquire(
        &self,
        captured_at: DateTime<Utc>,
    ) -> Result<PriceReading, AcquisitionError> {
        let document = self
            .oracle
            .query(&self.assets, self.show_extra_info)
            .await?;
        let prices = normalize_response(document, &self.assets)?;

        let missing = self.assets.len().saturating_sub(prices.len());
        if missing > 0 {
            info!(
                source = self.oracle.name(),
                priced = prices.len(),
                missing,
                "Oracle omitted some assets"
            );
        }

        Ok(PriceReading::new(captured_at, prices))
    }
}
