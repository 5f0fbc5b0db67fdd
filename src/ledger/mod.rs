//! Ledger module - memo publication on Solana
//!
//! Each successful reading is anchored on chain as a compact JSON memo inside
//! a one-lamport transfer paid by the process's signing identity.

mod identity;
mod publisher;
mod rpc;

pub use identity::SigningIdentity;
pub use publisher::{LedgerPublisher, PublisherSettings};
pub use rpc::{is_insufficient_funds, RpcLedgerClient};

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, TransactionError};

use crate::error::PublicationError;

/// The ledger operations the publisher needs
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Recent blockhash to scope (and expire) a new transaction
    async fn latest_blockhash(&self) -> Result<Hash, PublicationError>;

    /// Send a signed transaction; returns once the node accepted it
    async fn submit(&self, transaction: &Transaction) -> Result<Signature, PublicationError>;

    /// `None` until the transaction reaches the configured commitment
    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<Result<(), TransactionError>>, PublicationError>;
}
