//! Core types used throughout PriceKeeper
//!
//! Asset identifiers, oracle price records and the per-cycle reading that
//! feeds both the time-series store and the ledger memo.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one tracked asset (a token mint address for the default oracle)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id doubles as a directory and file name, so it must be a single
    /// non-empty path component.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(&['/', '\\', '\0'][..])
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AssetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One asset's entry in an oracle response.
///
/// `price` accepts either a decimal string or a JSON number and is always
/// written back as the exact decimal string. Every other field the oracle sends (`id`,
/// `type`, `extraInfo`, ...) is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    #[serde(serialize_with = "rust_decimal::serde::str::serialize")]
    pub price: Decimal,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PriceRecord {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            extra: Map::new(),
        }
    }
}

/// All prices captured from a single oracle response
#[derive(Debug, Clone, PartialEq)]
pub struct PriceReading {
    /// Capture instant shared by every sink fed from this reading
    pub captured_at: DateTime<Utc>,
    pub prices: BTreeMap<AssetId, PriceRecord>,
}

impl PriceReading {
    pub fn new(captured_at: DateTime<Utc>, prices: BTreeMap<AssetId, PriceRecord>) -> Self {
        Self {
            captured_at,
            prices,
        }
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// ISO-8601 stamp written into every artifact for this reading
    pub fn datetime(&self) -> String {
        format_timestamp(self.captured_at)
    }

    /// Price-only projection: one aggregate log row, also the ledger memo body
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            captured_at: self.captured_at,
            prices: self
                .prices
                .iter()
                .map(|(asset, record)| (asset.clone(), record.price))
                .collect(),
        }
    }

    /// Per-asset log entries, in asset order
    pub fn entries(&self) -> impl Iterator<Item = (&AssetId, TimestampedEntry)> + '_ {
        let datetime = self.datetime();
        self.prices.iter().map(move |(asset, record)| {
            (
                asset,
                TimestampedEntry {
                    datetime: datetime.clone(),
                    data: record.clone(),
                },
            )
        })
    }
}

/// `{datetime, <AssetId>: "price", ...}`: an aggregate log row and the ledger memo payload
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub captured_at: DateTime<Utc>,
    pub prices: BTreeMap<AssetId, Decimal>,
}

impl PriceSnapshot {
    pub fn datetime(&self) -> String {
        format_timestamp(self.captured_at)
    }

    /// Compact JSON bytes carried in the memo instruction
    pub fn to_memo_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for PriceSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.prices.len() + 1))?;
        map.serialize_entry("datetime", &format_timestamp(self.captured_at))?;
        for (asset, price) in &self.prices {
            map.serialize_entry(asset.as_str(), &ExactPrice(price))?;
        }
        map.end()
    }
}

struct ExactPrice<'a>(&'a Decimal);

impl Serialize for ExactPrice<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::str::serialize(self.0, serializer)
    }
}

/// `{datetime, data}` entry of one asset's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedEntry {
    pub datetime: String,
    pub data: PriceRecord,
}

/// RFC 3339, UTC, millisecond precision, `Z` suffix
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn price_record_accepts_string_price_and_keeps_extra_fields() {
        let raw = r#"{"id":"T1","type":"derivedPrice","price":"0.4213","extraInfo":{"confidenceLevel":"high"}}"#;
        let record: PriceRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(record.price, dec!(0.4213));
        assert_eq!(record.extra["type"], "derivedPrice");
        assert_eq!(record.extra["extraInfo"]["confidenceLevel"], "high");

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["price"], "0.4213");
        assert_eq!(written["id"], "T1");
    }

    #[test]
    fn snapshot_serializes_datetime_then_decimal_prices() {
        let mut prices = BTreeMap::new();
        prices.insert(AssetId::from("T1"), PriceRecord::new(dec!(1.23)));
        prices.insert(AssetId::from("T2"), PriceRecord::new(dec!(4.56)));
        let reading = PriceReading::new(noon(), prices);

        let json = serde_json::to_value(reading.snapshot()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "datetime": "2024-05-01T12:00:00.000Z",
                "T1": "1.23",
                "T2": "4.56",
            })
        );
    }

    #[test]
    fn prices_keep_every_digit_the_oracle_sent() {
        let raw = r#"{"price":"98765.123456789012345","id":"T1"}"#;
        let record: PriceRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.price.to_string(), "98765.123456789012345");

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["price"], "98765.123456789012345");

        // Trailing zeros are part of the quote and survive too
        let record: PriceRecord = serde_json::from_str(r#"{"price":"1.2300"}"#).unwrap();
        let mut prices = BTreeMap::new();
        prices.insert(AssetId::from("T1"), record);
        let memo = PriceReading::new(noon(), prices).snapshot().to_memo_bytes().unwrap();
        assert_eq!(
            String::from_utf8(memo).unwrap(),
            r#"{"datetime":"2024-05-01T12:00:00.000Z","T1":"1.2300"}"#
        );
    }

    #[test]
    fn entries_share_the_reading_timestamp() {
        let mut prices = BTreeMap::new();
        prices.insert(AssetId::from("A"), PriceRecord::new(dec!(1)));
        prices.insert(AssetId::from("B"), PriceRecord::new(dec!(2)));
        let reading = PriceReading::new(noon(), prices);

        let entries: Vec<_> = reading.entries().collect();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|(_, e)| e.datetime == "2024-05-01T12:00:00.000Z"));
        assert_eq!(entries[1].1.data.price, dec!(2));
    }

    #[test]
    fn path_safety_rejects_separators_and_dot_segments() {
        assert!(AssetId::from("JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN").is_path_safe());
        assert!(!AssetId::from("").is_path_safe());
        assert!(!AssetId::from("..").is_path_safe());
        assert!(!AssetId::from("a/b").is_path_safe());
        assert!(!AssetId::from("a\\b").is_path_safe());
    }
}
