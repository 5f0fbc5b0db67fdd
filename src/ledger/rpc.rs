//! JSON-RPC backed `LedgerClient`

use async_trait::async_trait;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::InstructionError;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, TransactionError};
use std::time::Duration;

use super::LedgerClient;
use crate::error::PublicationError;

/// System program error code for a transfer larger than the balance
const SYSTEM_RESULT_WITH_NEGATIVE_LAMPORTS: u32 = 1;

pub struct RpcLedgerClient {
    rpc: RpcClient,
    commitment: CommitmentConfig,
}

impl RpcLedgerClient {
    pub fn new(rpc_url: &str, commitment: CommitmentConfig, timeout: Duration) -> Self {
        Self {
            rpc: RpcClient::new_with_timeout_and_commitment(rpc_url.to_string(), timeout, commitment),
            commitment,
        }
    }
}

/// Whether a transaction error means the payer cannot cover transfer + fee.
/// The transfer is always instruction 0 of a memo transaction.
pub fn is_insufficient_funds(err: &TransactionError) -> bool {
    matches!(
        err,
        TransactionError::InsufficientFundsForFee
            | TransactionError::AccountNotFound
            | TransactionError::InstructionError(
                0,
                InstructionError::Custom(SYSTEM_RESULT_WITH_NEGATIVE_LAMPORTS)
            )
    )
}

fn classify_submit_error(err: ClientError) -> PublicationError {
    match err.get_transaction_error() {
        Some(tx_err) if is_insufficient_funds(&tx_err) => {
            PublicationError::InsufficientFunds(err.to_string())
        }
        _ => PublicationError::Submission(err.to_string()),
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn latest_blockhash(&self) -> Result<Hash, PublicationError> {
        self.rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| PublicationError::Blockhash(e.to_string()))
    }

    async fn submit(&self, transaction: &Transaction) -> Result<Signature, PublicationError> {
        self.rpc
            .send_transaction(transaction)
            .await
            .map_err(classify_submit_error)
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<Result<(), TransactionError>>, PublicationError> {
        self.rpc
            .get_signature_status_with_commitment(signature, self.commitment)
            .await
            .map_err(|e| PublicationError::StatusQuery(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_failures_are_recognised() {
        assert!(is_insufficient_funds(&TransactionError::InsufficientFundsForFee));
        assert!(is_insufficient_funds(&TransactionError::AccountNotFound));
        assert!(is_insufficient_funds(&TransactionError::InstructionError(
            0,
            InstructionError::Custom(1)
        )));
    }

    #[test]
    fn other_failures_are_not_funding_failures() {
        assert!(!is_insufficient_funds(&TransactionError::BlockhashNotFound));
        // Custom(1) from the memo instruction is not a lamport shortfall
        assert!(!is_insufficient_funds(&TransactionError::InstructionError(
            1,
            InstructionError::Custom(1)
        )));
    }
}
