//! Memo transaction construction, submission and confirmation

use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{LedgerClient, SigningIdentity};
use crate::error::PublicationError;
use crate::types::PriceSnapshot;

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// Receiver of the minimal transfer
    pub recipient: Pubkey,
    pub memo_program: Pubkey,
    pub transfer_lamports: u64,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

pub struct LedgerPublisher {
    client: Arc<dyn LedgerClient>,
    identity: Arc<SigningIdentity>,
    settings: PublisherSettings,
}

impl LedgerPublisher {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        identity: Arc<SigningIdentity>,
        settings: PublisherSettings,
    ) -> Self {
        Self {
            client,
            identity,
            settings,
        }
    }

    pub fn payer(&self) -> Pubkey {
        self.identity.pubkey()
    }

    /// `[transfer(payer -> recipient), memo(snapshot json)]`
    pub fn instructions(&self, snapshot: &PriceSnapshot) -> Result<Vec<Instruction>, PublicationError> {
        let payer = self.payer();
        let memo = snapshot.to_memo_bytes()?;

        Ok(vec![
            system_instruction::transfer(
                &payer,
                &self.settings.recipient,
                self.settings.transfer_lamports,
            ),
            Instruction::new_with_bytes(
                self.settings.memo_program,
                &memo,
                vec![AccountMeta::new(payer, true)],
            ),
        ])
    }

    /// Build and sign the memo transaction against `blockhash`
    pub fn build_transaction(
        &self,
        snapshot: &PriceSnapshot,
        blockhash: Hash,
    ) -> Result<Transaction, PublicationError> {
        let instructions = self.instructions(snapshot)?;
        let payer = self.payer();
        let mut transaction = Transaction::new_with_payer(&instructions, Some(&payer));
        transaction
            .try_sign(&[self.identity.keypair()], blockhash)
            .map_err(|e| PublicationError::Signing(e.to_string()))?;
        Ok(transaction)
    }

    /// Sign, submit and wait for confirmation. No retry: the next cycle is the retry.
    pub async fn publish(&self, snapshot: &PriceSnapshot) -> Result<Signature, PublicationError> {
        let blockhash = self.client.latest_blockhash().await?;
        let transaction = self.build_transaction(snapshot, blockhash)?;

        let signature = self.client.submit(&transaction).await?;
        info!(signature = %signature, "📨 Memo transaction submitted");

        self.await_confirmation(signature).await
    }

    async fn await_confirmation(&self, signature: Signature) -> Result<Signature, PublicationError> {
        let started = Instant::now();
        let timeout = self.settings.confirm_timeout;

        loop {
            match self.client.signature_status(&signature).await {
                Ok(Some(Ok(()))) => {
                    debug!(signature = %signature, elapsed_ms = started.elapsed().as_millis() as u64, "Memo transaction confirmed");
                    return Ok(signature);
                }
                Ok(Some(Err(reason))) => {
                    return Err(PublicationError::Rejected { signature, reason });
                }
                Ok(None) => {}
                // Transient; keep polling until the deadline
                Err(e) => warn!(signature = %signature, error = %e, "Signature status poll failed"),
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(PublicationError::ConfirmationTimeout {
                    signature,
                    waited: elapsed,
                });
            }
            tokio::time::sleep(self.settings.poll_interval.min(timeout - elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetId, PriceReading, PriceRecord};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use solana_sdk::signature::Keypair;
    use solana_sdk::transaction::TransactionError;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    const MEMO: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

    type Status = Result<Option<Result<(), TransactionError>>, PublicationError>;

    /// Scripted ledger: optional submit failure, then a queue of status answers
    #[derive(Default)]
    struct ScriptedLedger {
        submit_error: Mutex<Option<PublicationError>>,
        statuses: Mutex<VecDeque<Status>>,
        submitted: Mutex<Vec<Transaction>>,
        polls: Mutex<usize>,
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        async fn latest_blockhash(&self) -> Result<Hash, PublicationError> {
            Ok(Hash::new_unique())
        }

        async fn submit(&self, transaction: &Transaction) -> Result<Signature, PublicationError> {
            if let Some(err) = self.submit_error.lock().unwrap().take() {
                return Err(err);
            }
            self.submitted.lock().unwrap().push(transaction.clone());
            Ok(transaction.signatures[0])
        }

        async fn signature_status(&self, _signature: &Signature) -> Status {
            *self.polls.lock().unwrap() += 1;
            self.statuses.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    fn snapshot() -> PriceSnapshot {
        let mut prices = BTreeMap::new();
        prices.insert(AssetId::from("T1"), PriceRecord::new(dec!(1.23)));
        prices.insert(AssetId::from("T2"), PriceRecord::new(dec!(4.56)));
        PriceReading::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(), prices).snapshot()
    }

    fn publisher(ledger: Arc<ScriptedLedger>, confirm_timeout: Duration) -> (LedgerPublisher, Pubkey) {
        let recipient = Pubkey::new_unique();
        let publisher = LedgerPublisher::new(
            ledger,
            Arc::new(SigningIdentity::from_keypair(Keypair::new())),
            PublisherSettings {
                recipient,
                memo_program: MEMO.parse().unwrap(),
                transfer_lamports: 1,
                confirm_timeout,
                poll_interval: Duration::from_millis(5),
            },
        );
        (publisher, recipient)
    }

    #[test]
    fn transaction_carries_transfer_then_memo_and_is_signed_by_payer() {
        let (publisher, recipient) = publisher(Arc::default(), Duration::from_secs(1));
        let tx = publisher
            .build_transaction(&snapshot(), Hash::new_unique())
            .unwrap();

        tx.verify().unwrap();
        assert_eq!(tx.message.account_keys[0], publisher.payer());
        assert_eq!(tx.message.instructions.len(), 2);

        let transfer = &tx.message.instructions[0];
        let expected = system_instruction::transfer(&publisher.payer(), &recipient, 1);
        assert_eq!(
            tx.message.account_keys[transfer.program_id_index as usize],
            solana_sdk::system_program::id()
        );
        assert_eq!(transfer.data, expected.data);

        let memo = &tx.message.instructions[1];
        assert_eq!(
            tx.message.account_keys[memo.program_id_index as usize].to_string(),
            MEMO
        );
        let body: serde_json::Value = serde_json::from_slice(&memo.data).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"datetime": "2024-05-01T12:00:00.000Z", "T1": "1.23", "T2": "4.56"})
        );
    }

    #[tokio::test]
    async fn publish_returns_signature_once_confirmed() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.statuses.lock().unwrap().extend([
            Ok(None),
            Err(PublicationError::StatusQuery("node behind".into())),
            Ok(Some(Ok(()))),
        ]);
        let (publisher, _) = publisher(ledger.clone(), Duration::from_secs(5));

        let signature = publisher.publish(&snapshot()).await.unwrap();

        let submitted = ledger.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(signature, submitted[0].signatures[0]);
        assert_eq!(*ledger.polls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn submission_failure_skips_confirmation() {
        let ledger = Arc::new(ScriptedLedger::default());
        *ledger.submit_error.lock().unwrap() =
            Some(PublicationError::InsufficientFunds("0 lamports".into()));
        let (publisher, _) = publisher(ledger.clone(), Duration::from_secs(5));

        let err = publisher.publish(&snapshot()).await.unwrap_err();

        assert!(matches!(err, PublicationError::InsufficientFunds(_)));
        assert_eq!(*ledger.polls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn unconfirmed_transaction_times_out_with_its_signature() {
        let ledger = Arc::new(ScriptedLedger::default());
        let (publisher, _) = publisher(ledger.clone(), Duration::from_millis(40));

        let err = publisher.publish(&snapshot()).await.unwrap_err();

        let submitted = ledger.submitted.lock().unwrap()[0].signatures[0];
        match err {
            PublicationError::ConfirmationTimeout { signature, waited } => {
                assert_eq!(signature, submitted);
                assert!(waited >= Duration::from_millis(40));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(*ledger.polls.lock().unwrap() >= 2);
    }

    #[tokio::test]
    async fn on_chain_failure_is_rejected() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger
            .statuses
            .lock()
            .unwrap()
            .push_back(Ok(Some(Err(TransactionError::AccountInUse))));
        let (publisher, _) = publisher(ledger, Duration::from_secs(5));

        let err = publisher.publish(&snapshot()).await.unwrap_err();
        assert!(matches!(
            err,
            PublicationError::Rejected {
                reason: TransactionError::AccountInUse,
                ..
            }
        ));
    }
}
