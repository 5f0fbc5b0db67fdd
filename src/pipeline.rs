//! Pipeline orchestrator
//!
//! One cycle per wall-clock minute: wait for the boundary, acquire a reading,
//! persist it to both sinks, publish the snapshot. Every stage failure is
//! turned into a diagnostic and the loop carries on; the only error that
//! escapes this module is a startup failure in `Pipeline::from_config`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use solana_sdk::signature::Signature;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AcquisitionError, PublicationError};
use crate::ledger::{LedgerPublisher, PublisherSettings, RpcLedgerClient, SigningIdentity};
use crate::mirror::Mirror;
use crate::oracle::{HttpPriceOracle, PriceAcquirer};
use crate::persistence::{PersistOutcome, TimeSeriesStore};
use crate::schedule::{Clock, MinuteAligner, SystemClock};
use crate::types::format_timestamp;

/// Per-request timeout for ledger RPC calls
const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the orchestrator currently is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    WaitingForBoundary,
    Acquiring,
    Persisting,
    Publishing,
}

impl CycleState {
    /// Legal transitions. Any state may fall back to `Idle`.
    pub fn allows(self, next: CycleState) -> bool {
        use CycleState::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, WaitingForBoundary)
                | (WaitingForBoundary, Acquiring)
                | (Acquiring, Persisting)
                | (Persisting, Publishing)
        )
    }
}

#[derive(Debug)]
pub enum PublishOutcome {
    Confirmed(Signature),
    Failed(PublicationError),
    Disabled,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// No reading this minute; neither sink was touched
    Skipped(AcquisitionError),
    Completed {
        assets: usize,
        persistence: PersistOutcome,
        publication: PublishOutcome,
    },
    /// The cycle body panicked; treated as a skipped cycle
    Panicked(String),
}

#[derive(Debug)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub boundary: DateTime<Utc>,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn is_skipped(&self) -> bool {
        matches!(
            self.outcome,
            CycleOutcome::Skipped(_) | CycleOutcome::Panicked(_)
        )
    }

    pub fn signature(&self) -> Option<Signature> {
        match &self.outcome {
            CycleOutcome::Completed {
                publication: PublishOutcome::Confirmed(signature),
                ..
            } => Some(*signature),
            _ => None,
        }
    }

    /// One summary line per cycle
    pub fn log_summary(&self) {
        let boundary = format_timestamp(self.boundary);
        match &self.outcome {
            CycleOutcome::Skipped(e) => {
                warn!(cycle_id = %self.cycle_id, boundary = %boundary, reason = %e, "⏭️ Cycle skipped");
            }
            CycleOutcome::Panicked(msg) => {
                error!(cycle_id = %self.cycle_id, boundary = %boundary, panic = %msg, "💥 Cycle aborted");
            }
            CycleOutcome::Completed {
                assets,
                persistence,
                publication,
            } => {
                let published = match publication {
                    PublishOutcome::Confirmed(signature) => signature.to_string(),
                    PublishOutcome::Failed(_) => "failed".to_string(),
                    PublishOutcome::Disabled => "disabled".to_string(),
                };
                info!(
                    cycle_id = %self.cycle_id,
                    boundary = %boundary,
                    assets,
                    write_errors = persistence.errors.len(),
                    published = %published,
                    "✅ Cycle complete"
                );
            }
        }
    }
}

pub struct Pipeline {
    aligner: MinuteAligner,
    acquirer: PriceAcquirer,
    store: TimeSeriesStore,
    publisher: Option<LedgerPublisher>,
    mirror: Option<Mirror>,
    state: watch::Sender<CycleState>,
}

impl Pipeline {
    /// Acquire + persist only; attach a publisher or mirror with the builders
    pub fn new(aligner: MinuteAligner, acquirer: PriceAcquirer, store: TimeSeriesStore) -> Self {
        let (state, _) = watch::channel(CycleState::Idle);
        Self {
            aligner,
            acquirer,
            store,
            publisher: None,
            mirror: None,
            state,
        }
    }

    pub fn with_publisher(mut self, publisher: LedgerPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Wire the production components. Fails only if the signing identity
    /// (or a client) cannot be set up.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let oracle = HttpPriceOracle::new(
            &config.oracle.url,
            Duration::from_secs(config.oracle.timeout_secs),
        )
        .context("Failed to build oracle HTTP client")?;
        let acquirer = PriceAcquirer::new(
            Arc::new(oracle),
            config.asset_ids(),
            config.oracle.show_extra_info,
        );
        let store = TimeSeriesStore::new(config.data_dir(), config.store.csv_projection)
            .with_columns(config.asset_ids());

        let mut pipeline = Self::new(MinuteAligner::new(clock), acquirer, store);

        if config.ledger.enabled {
            let identity = SigningIdentity::load_from_file(Path::new(&config.ledger.keypair_path))
                .context("Failed to load signing identity")?;
            info!(pubkey = %identity.pubkey(), "🔑 Signing identity loaded");

            let client = RpcLedgerClient::new(
                &config.ledger.rpc_url,
                config.ledger.commitment_config()?,
                RPC_REQUEST_TIMEOUT,
            );
            let settings = PublisherSettings {
                recipient: config.ledger.recipient_pubkey()?,
                memo_program: config.ledger.memo_program_pubkey()?,
                transfer_lamports: config.ledger.transfer_lamports,
                confirm_timeout: config.ledger.confirm_timeout(),
                poll_interval: config.ledger.poll_interval(),
            };
            pipeline = pipeline.with_publisher(LedgerPublisher::new(
                Arc::new(client),
                Arc::new(identity),
                settings,
            ));
        } else {
            warn!("Ledger publication disabled; signing identity not loaded");
        }

        if config.mirror.enabled {
            pipeline = pipeline.with_mirror(Mirror::new(
                &config.mirror.program,
                &config.ledger.rpc_url,
                &config.ledger.keypair_path,
                &config.mirror.base_url,
            ));
        }

        Ok(pipeline)
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.state.subscribe()
    }

    fn advance(&self, next: CycleState) {
        let previous = self.state.send_replace(next);
        if !previous.allows(next) {
            warn!(from = ?previous, to = ?next, "Unexpected cycle state transition");
        }
    }

    /// Run cycles forever
    pub async fn run(&self) {
        if let Err(e) = self.store.init().await {
            warn!(path = %e.path().display(), error = %e, "Data directory not ready; writes will be retried each cycle");
        }
        info!(
            assets = self.acquirer.assets().len(),
            publishing = self.publisher.is_some(),
            mirroring = self.mirror.is_some(),
            "🚀 Pipeline started"
        );

        loop {
            let report = self.tick().await;
            report.log_summary();
        }
    }

    /// Wait for the next minute boundary, then run one cycle
    pub async fn tick(&self) -> CycleReport {
        self.advance(CycleState::WaitingForBoundary);
        let boundary = self.aligner.wait_for_boundary().await;
        self.run_cycle(boundary).await
    }

    /// Run one cycle for `boundary`. Never fails and never panics.
    pub async fn run_cycle(&self, boundary: DateTime<Utc>) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", cycle_id = %cycle_id, boundary = %format_timestamp(boundary));

        let outcome = match AssertUnwindSafe(self.cycle_body())
            .catch_unwind()
            .instrument(span)
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => CycleOutcome::Panicked(panic_message(payload.as_ref())),
        };
        self.advance(CycleState::Idle);

        CycleReport {
            cycle_id,
            boundary,
            outcome,
        }
    }

    async fn cycle_body(&self) -> CycleOutcome {
        self.advance(CycleState::Acquiring);
        let captured_at = self.aligner.clock().now();
        let reading = match self.acquirer.acquire(captured_at).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "AcquisitionError: no reading this cycle");
                return CycleOutcome::Skipped(e);
            }
        };
        debug!(assets = reading.len(), "Reading acquired");

        self.advance(CycleState::Persisting);
        let persistence = self.store.persist(&reading).await;
        for e in &persistence.errors {
            error!(path = %e.path().display(), error = %e, "PersistenceError");
        }
        if let Some(mirror) = &self.mirror {
            for (asset, path) in &persistence.assets {
                mirror.spawn_upload(asset.clone(), path.clone());
            }
        }

        // Published even when persistence partially failed
        self.advance(CycleState::Publishing);
        let publication = match &self.publisher {
            Some(publisher) => match publisher.publish(&reading.snapshot()).await {
                Ok(signature) => {
                    info!(signature = %signature, "⛓️ Snapshot anchored on ledger");
                    PublishOutcome::Confirmed(signature)
                }
                Err(e) => {
                    error!(error = %e, "PublicationError");
                    PublishOutcome::Failed(e)
                }
            },
            None => {
                debug!("Publication disabled");
                PublishOutcome::Disabled
            }
        };

        CycleOutcome::Completed {
            assets: reading.len(),
            persistence,
            publication,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        use CycleState::*;
        let path = [Idle, WaitingForBoundary, Acquiring, Persisting, Publishing, Idle];
        for pair in path.windows(2) {
            assert!(pair[0].allows(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_stages_is_not_allowed() {
        use CycleState::*;
        assert!(Acquiring.allows(Idle));
        assert!(!Idle.allows(Acquiring));
        assert!(!Acquiring.allows(Publishing));
        assert!(!WaitingForBoundary.allows(Persisting));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
