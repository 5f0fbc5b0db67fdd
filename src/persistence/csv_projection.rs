//! Append-only projections of a reading
//!
//! Unlike the JSON logs these are true appends: every cycle adds one line and
//! earlier lines are never rewritten. A CSV header is written only when the
//! file is new or empty; an existing header must match the columns.

use csv::WriterBuilder;
use rust_decimal::Decimal;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::PersistenceError;
use crate::types::{AssetId, PriceSnapshot, TimestampedEntry};

/// Append one `datetime,price` row to an asset's CSV
pub async fn append_price_row(
    path: &Path,
    datetime: &str,
    price: &Decimal,
) -> Result<(), PersistenceError> {
    append_csv_record(
        path,
        &["datetime".to_string(), "price".to_string()],
        &[datetime.to_string(), price.to_string()],
    )
    .await
}

/// Append one `datetime,<col1>,<col2>,...` row; assets missing from the
/// snapshot get an empty cell.
pub async fn append_aggregate_csv_row(
    path: &Path,
    columns: &[AssetId],
    snapshot: &PriceSnapshot,
) -> Result<(), PersistenceError> {
    let mut header = Vec::with_capacity(columns.len() + 1);
    let mut record = Vec::with_capacity(columns.len() + 1);
    header.push("datetime".to_string());
    record.push(snapshot.datetime());
    for asset in columns {
        header.push(asset.to_string());
        record.push(
            snapshot
                .prices
                .get(asset)
                .map(Decimal::to_string)
                .unwrap_or_default(),
        );
    }
    append_csv_record(path, &header, &record).await
}

/// Append `entry` as one compact JSON line
pub async fn append_full_info_line(
    path: &Path,
    entry: &TimestampedEntry,
) -> Result<(), PersistenceError> {
    let mut line = serde_json::to_vec(entry).map_err(|source| PersistenceError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    line.push(b'\n');
    append_bytes(path, &line).await
}

async fn append_csv_record(
    path: &Path,
    header: &[String],
    record: &[String],
) -> Result<(), PersistenceError> {
    let mut bytes = Vec::new();
    match read_first_line(path).await? {
        None => bytes.extend(encode_record(path, header)?),
        Some(found) => {
            let expected = encode_record(path, header)?;
            let expected = String::from_utf8_lossy(&expected);
            let expected = expected.trim_end_matches(&['\r', '\n'][..]);
            if found != expected {
                return Err(PersistenceError::CsvHeader {
                    path: path.to_path_buf(),
                    expected: expected.to_string(),
                    found,
                });
            }
        }
    }
    bytes.extend(encode_record(path, record)?);
    append_bytes(path, &bytes).await
}

/// One CSV line, quoted as needed, with its terminator
fn encode_record(path: &Path, fields: &[String]) -> Result<Vec<u8>, PersistenceError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(fields)
        .map_err(|source| PersistenceError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    writer
        .into_inner()
        .map_err(|e| {
            let err = e.error();
            PersistenceError::io(path, std::io::Error::new(err.kind(), err.to_string()))
        })
}

/// `None` when the file is missing or starts empty
async fn read_first_line(path: &Path) -> Result<Option<String>, PersistenceError> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };
    let mut line = String::new();
    BufReader::new(file)
        .read_line(&mut line)
        .await
        .map_err(|e| PersistenceError::io(path, e))?;

    let line = line.trim_end_matches(&['\r', '\n'][..]);
    Ok((!line.is_empty()).then(|| line.to_string()))
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let result = async {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    result.map_err(|e| PersistenceError::io(path, e))
}
