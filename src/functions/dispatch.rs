use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::retry::{RetryPolicy, run_with_retry};
use crate::schedule::Trigger;
use crate::services::event_log::{EventLogService, EventSink, prepare_rows};
use crate::store::{ClaimedBatch, OutboxStore};

pub const DEFAULT_BATCH_SIZE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Non-empty passes committed during the run.
    pub passes: u32,
    /// Records marked processed during the run.
    pub delivered: u64,
}

/// Moves pending outbox records to the sink, one claimed batch at a time.
/// Safe to run from any number of concurrent processes: claims skip rows
/// locked elsewhere, so instances never block on or double-deliver each
/// other's batches.
pub struct Dispatcher<S, K> {
    store: S,
    event_log: EventLogService<K>,
    batch_size: u32,
}

impl<S, K> Dispatcher<S, K>
where
    S: OutboxStore,
    K: EventSink,
{
    pub fn new(store: S, event_log: EventLogService<K>, batch_size: u32) -> Self {
        Self {
            store,
            event_log,
            batch_size: batch_size.max(1),
        }
    }

    /// One claim-deliver-mark round inside a single claim transaction.
    /// Returns the number of records marked processed; zero means nothing
    /// was pending. Every failure path rolls the claim back, so the records
    /// involved stay pending.
    pub async fn pass(&self) -> Result<u32, DispatchError> {
        let claim = self
            .store
            .claim_pending(self.batch_size)
            .await
            .map_err(DispatchError::Claim)?;

        if claim.records().is_empty() {
            return Ok(0);
        }

        let claimed = claim.records().len() as u32;
        let rows = prepare_rows(claim.records());

        if let Err(error) = self.event_log.insert_events(&rows).await {
            if let Err(rollback_error) = claim.rollback().await {
                tracing::warn!(error = %rollback_error, "dispatch: claim rollback failed");
            }
            return Err(DispatchError::Deliver(error));
        }

        if let Err(error) = claim.commit_processed(Utc::now()).await {
            // the sink already accepted these rows; they stay pending and
            // will be delivered again on the next pass
            tracing::warn!(
                claimed,
                error = %error,
                "dispatch: batch delivered but mark failed"
            );
            return Err(DispatchError::Mark(error));
        }

        Ok(claimed)
    }

    /// Drain everything pending: pass after pass until a claim comes back
    /// empty. A failed pass aborts the run with its records rolled back.
    pub async fn run_once(&self) -> Result<DispatchSummary, DispatchError> {
        let run_id = Uuid::new_v4();
        let mut summary = DispatchSummary {
            passes: 0,
            delivered: 0,
        };

        loop {
            let delivered = self.pass().await?;
            if delivered == 0 {
                break;
            }
            summary.passes += 1;
            summary.delivered += u64::from(delivered);
            tracing::debug!(
                run_id = %run_id,
                pass = summary.passes,
                delivered,
                "dispatch: pass committed"
            );
        }

        // the daemon loop owns the info-level run summary
        if summary.delivered > 0 {
            tracing::debug!(
                run_id = %run_id,
                passes = summary.passes,
                delivered = summary.delivered,
                "dispatch: drained pending events"
            );
        }
        Ok(summary)
    }
}

/// Long-running dispatcher loop. Sleeps per the trigger, runs a full drain
/// wrapped in the retry policy, and repeats until shutdown. A run that
/// exhausts its retries is logged and left for the next trigger; nothing is
/// lost because failed passes roll back.
pub async fn run_dispatcher<S, K>(
    dispatcher: Dispatcher<S, K>,
    policy: RetryPolicy,
    trigger: Trigger,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: OutboxStore,
    K: EventSink,
{
    loop {
        let delay = trigger.next_delay(Utc::now())?;
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        tokio::select! {
            // dropping the in-flight pass rolls its claim back
            _ = shutdown.changed() => break,
            result = run_with_retry(&policy, || dispatcher.run_once()) => match result {
                Ok(summary) if summary.delivered > 0 => {
                    tracing::info!(
                        passes = summary.passes,
                        delivered = summary.delivered,
                        "dispatch run"
                    );
                }
                Err(e) => tracing::error!(attempts = e.attempts, error = %e, "dispatch run failed"),
                _ => {}
            }
        }
    }

    tracing::info!("dispatcher stopped");
    Ok(())
}
