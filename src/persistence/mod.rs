//! Time-series persistence
//!
//! Layout under the data directory:
//!
//! ```text
//! all_tokens_prices.json                [{datetime, <AssetId>: "price", ...}, ...]
//! <AssetId>/<AssetId>_prices.json       [{datetime, data: <oracle record>}, ...]
//!
//! with `csv_projection` on, also:
//! all_tokens_prices.csv                 datetime,<AssetId>,<AssetId>,...
//! <AssetId>/<AssetId>_prices.csv        datetime,price
//! <AssetId>/<AssetId>_full_info.json    one {datetime, data} JSON object per line
//! ```
//!
//! JSON logs are rewritten whole on every append: load, push, write to a
//! sibling temp file, rename over the original. A reader never sees a torn
//! file, but a crash before the rename loses that one append. The
//! projections are plain appends.

mod csv_projection;

pub use csv_projection::{append_aggregate_csv_row, append_full_info_line, append_price_row};

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::PersistenceError;
use crate::types::{AssetId, PriceReading, PriceSnapshot, TimestampedEntry};

pub const AGGREGATE_FILE: &str = "all_tokens_prices.json";
pub const AGGREGATE_CSV_FILE: &str = "all_tokens_prices.csv";

/// What one cycle managed to write
#[derive(Debug, Default)]
pub struct PersistOutcome {
    /// Aggregate artifact, when its append succeeded
    pub aggregate: Option<PathBuf>,
    /// Per-asset JSON artifacts that were appended, regardless of how
    /// their projections fared
    pub assets: Vec<(AssetId, PathBuf)>,
    pub errors: Vec<PersistenceError>,
}

impl PersistOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Append-only JSON logs for the aggregate and for each asset
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    data_dir: PathBuf,
    csv_projection: bool,
    /// Aggregate CSV columns; the snapshot's own assets when empty
    columns: Vec<AssetId>,
}

impl TimeSeriesStore {
    pub fn new(data_dir: impl Into<PathBuf>, csv_projection: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            csv_projection,
            columns: Vec::new(),
        }
    }

    /// Fix the aggregate CSV columns, normally the configured asset list
    pub fn with_columns(mut self, columns: Vec<AssetId>) -> Self {
        self.columns = columns;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create the data directory if it doesn't exist
    pub async fn init(&self) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| PersistenceError::io(&self.data_dir, e))
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.data_dir.join(AGGREGATE_FILE)
    }

    pub fn aggregate_csv_path(&self) -> PathBuf {
        self.data_dir.join(AGGREGATE_CSV_FILE)
    }

    pub fn asset_dir(&self, asset: &AssetId) -> PathBuf {
        self.data_dir.join(asset.as_str())
    }

    pub fn asset_log_path(&self, asset: &AssetId) -> PathBuf {
        self.asset_dir(asset)
            .join(format!("{}_prices.json", asset.as_str()))
    }

    pub fn asset_csv_path(&self, asset: &AssetId) -> PathBuf {
        self.asset_dir(asset)
            .join(format!("{}_prices.csv", asset.as_str()))
    }

    pub fn asset_full_info_path(&self, asset: &AssetId) -> PathBuf {
        self.asset_dir(asset)
            .join(format!("{}_full_info.json", asset.as_str()))
    }

    /// Append one `{datetime, <AssetId>: price}` row to the aggregate log
    pub async fn append_aggregate_row(
        &self,
        snapshot: &PriceSnapshot,
    ) -> Result<PathBuf, PersistenceError> {
        let path = self.aggregate_path();
        append_json(&path, snapshot).await?;
        Ok(path)
    }

    /// Append one entry to an asset's log, creating its directory on first use
    pub async fn append_asset_entry(
        &self,
        asset: &AssetId,
        entry: &TimestampedEntry,
    ) -> Result<PathBuf, PersistenceError> {
        self.ensure_asset_dir(asset).await?;
        let path = self.asset_log_path(asset);
        append_json(&path, entry).await?;
        Ok(path)
    }

    /// Append the aggregate CSV row
    pub async fn append_aggregate_csv(&self, snapshot: &PriceSnapshot) -> Result<PathBuf, PersistenceError> {
        let path = self.aggregate_csv_path();
        if self.columns.is_empty() {
            let columns: Vec<AssetId> = snapshot.prices.keys().cloned().collect();
            append_aggregate_csv_row(&path, &columns, snapshot).await?;
        } else {
            append_aggregate_csv_row(&path, &self.columns, snapshot).await?;
        }
        Ok(path)
    }

    /// Append the asset's CSV row and full-info line. Each is attempted
    /// on its own; every failure is returned.
    pub async fn append_asset_projections(
        &self,
        asset: &AssetId,
        entry: &TimestampedEntry,
    ) -> Vec<PersistenceError> {
        if let Err(e) = self.ensure_asset_dir(asset).await {
            return vec![e];
        }

        let mut errors = Vec::new();
        if let Err(e) =
            append_price_row(&self.asset_csv_path(asset), &entry.datetime, &entry.data.price).await
        {
            errors.push(e);
        }
        if let Err(e) = append_full_info_line(&self.asset_full_info_path(asset), entry).await {
            errors.push(e);
        }
        errors
    }

    async fn ensure_asset_dir(&self, asset: &AssetId) -> Result<(), PersistenceError> {
        let dir = self.asset_dir(asset);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistenceError::io(&dir, e))
    }

    /// Feed both sinks from the same reading. Every write is attempted; a
    /// failure in one never rolls back or skips another.
    pub async fn persist(&self, reading: &PriceReading) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();

        let snapshot = reading.snapshot();
        match self.append_aggregate_row(&snapshot).await {
            Ok(path) => outcome.aggregate = Some(path),
            Err(e) => outcome.errors.push(e),
        }
        if self.csv_projection {
            if let Err(e) = self.append_aggregate_csv(&snapshot).await {
                outcome.errors.push(e);
            }
        }

        for (asset, entry) in reading.entries() {
            match self.append_asset_entry(asset, &entry).await {
                Ok(path) => outcome.assets.push((asset.clone(), path)),
                Err(e) => outcome.errors.push(e),
            }
            if self.csv_projection {
                outcome
                    .errors
                    .extend(self.append_asset_projections(asset, &entry).await);
            }
        }

        debug!(
            aggregate = outcome.aggregate.is_some(),
            assets = outcome.assets.len(),
            errors = outcome.errors.len(),
            "Persisted reading"
        );
        outcome
    }
}

/// Read a JSON-array artifact; a missing or blank file is an empty log
pub async fn load_log(path: &Path) -> Result<Vec<Value>, PersistenceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

async fn append_json<T: Serialize>(path: &Path, entry: &T) -> Result<(), PersistenceError> {
    let encode_err = |source| PersistenceError::Encode {
        path: path.to_path_buf(),
        source,
    };

    let mut log = load_log(path).await?;
    log.push(serde_json::to_value(entry).map_err(encode_err)?);
    let bytes = serde_json::to_vec_pretty(&log).map_err(encode_err)?;
    write_replace(path, &bytes).await
}

/// Write `bytes` to a sibling temp file, fsync, then rename over `path`
async fn write_replace(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PersistenceError::io(path, e));
    }
    Ok(())
}
