//! Error types for each pipeline stage
//!
//! None of these cross the orchestrator boundary: every stage converts its
//! error into a diagnostic and the loop moves on. `IdentityError` is the one
//! startup failure that stops the process.

use solana_sdk::signature::Signature;
use solana_sdk::transaction::TransactionError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The oracle gave no usable reading; the cycle is skipped
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Request could not be sent or the body could not be read
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Oracle answered with a non-success status
    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Body was not the expected `{ "data": { ... } }` document
    #[error("malformed oracle response: {0}")]
    Malformed(String),

    /// Response parsed but priced none of the requested assets
    #[error("oracle priced none of the {requested} requested assets")]
    Empty { requested: usize },
}

/// An artifact could not be read, parsed or written
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Existing artifact is not a JSON array; it is left untouched
    #[error("corrupt artifact {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode entry for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV write failed on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Existing CSV was written with other columns; no row is appended
    #[error("CSV header mismatch on {path}: expected `{expected}`, found `{found}`")]
    CsvHeader {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. }
            | Self::Corrupt { path, .. }
            | Self::Encode { path, .. }
            | Self::Csv { path, .. }
            | Self::CsvHeader { path, .. } => path,
        }
    }
}

/// The snapshot did not make it onto the ledger this cycle
#[derive(Error, Debug)]
pub enum PublicationError {
    #[error("failed to encode memo: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to fetch recent blockhash: {0}")]
    Blockhash(String),

    #[error("failed to sign transaction: {0}")]
    Signing(String),

    #[error("transaction submission failed: {0}")]
    Submission(String),

    /// Payer cannot cover the transfer plus fee
    #[error("insufficient funds for transfer and fee: {0}")]
    InsufficientFunds(String),

    #[error("signature status query failed: {0}")]
    StatusQuery(String),

    /// Landed on chain but failed
    #[error("transaction {signature} failed on chain: {reason}")]
    Rejected {
        signature: Signature,
        reason: TransactionError,
    },

    /// Submitted but not confirmed before the deadline; may still land
    #[error("transaction {signature} not confirmed within {waited:?}")]
    ConfirmationTimeout {
        signature: Signature,
        waited: Duration,
    },
}

/// Signing identity could not be loaded at startup (fatal)
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("cannot read keypair file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("keypair file {path} is not a JSON byte array: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("keypair file {path} holds an invalid ed25519 keypair: {reason}")]
    InvalidKey { path: PathBuf, reason: String },
}
