//! Periodic mail maintenance
//!
//! Three independent loops, each on its own task so a hanging delivery never holds up
//! the others:
//! - stale sweep: in-flight records older than the staleness window become `failed`
//! - dispatch: due `scheduled` records are sent, oldest first, in bounded batches
//! - expiry sweep: records past `expires_at` are purged, attachments first
//!
//! Every pass takes `now` explicitly; only the loops read the clock.

use crate::config::SchedulerSettings;
use crate::core::{EmailRecord, EmailStatus};
use crate::network::DeliveryClient;
use crate::storage::{AttachmentSink, MailStore, StorageError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Error recorded on records abandoned by a crashed or hung delivery attempt
pub const STALE_REASON: &str = "Delivery timed out";

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    /// Records another actor moved on before this pass could claim them
    pub skipped: usize,
}

/// Background scheduler for queued mail
pub struct Scheduler {
    store: Arc<dyn MailStore>,
    delivery: DeliveryClient,
    attachments: Arc<dyn AttachmentSink>,
    local_domain: String,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MailStore>,
        delivery: DeliveryClient,
        attachments: Arc<dyn AttachmentSink>,
        local_domain: &str,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            delivery,
            attachments,
            local_domain: local_domain.to_string(),
            settings,
        }
    }

    /// Fail every pending/sending record whose send started over the window before `now`
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let window = ChronoDuration::seconds(self.settings.stale_after_secs as i64);
        let stale = self.store.select_stale_pending(now - window)?;
        let mut failed = 0;

        for record in stale {
            match self
                .store
                .update_status(record.id, EmailStatus::Failed, Some(STALE_REASON))
            {
                Ok(()) => failed += 1,
                Err(e) => log::warn!("Could not fail stale record {}: {}", record.id, e),
            }
        }

        if failed > 0 {
            log::info!("Marked {} stale record(s) as failed", failed);
        }
        Ok(failed)
    }

    /// Send up to one batch of scheduled records due at `now`
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchReport, StorageError> {
        let due = self
            .store
            .select_due_scheduled(now, self.settings.batch_size)?;
        let mut report = DispatchReport::default();
        let mut remote = Vec::new();

        for record in due {
            if let Err(e) = self.store.update_status(record.id, EmailStatus::Sending, None) {
                log::warn!("Skipping scheduled record {}: {}", record.id, e);
                report.skipped += 1;
                continue;
            }

            if record.envelope.to.is_local_to(&self.local_domain) {
                self.finish(&record, Ok(()), &mut report);
            } else {
                remote.push(record);
            }
        }

        // Each delivery carries its own timeout; one slow peer does not block the rest
        let results = join_all(remote.iter().map(|r| self.delivery.deliver(&r.envelope))).await;

        for (record, result) in remote.iter().zip(results) {
            self.finish(record, result.map(|_| ()).map_err(|e| e.to_string()), &mut report);
        }

        if report != DispatchReport::default() {
            log::info!(
                "Dispatch pass: {} sent, {} failed, {} skipped",
                report.sent,
                report.failed,
                report.skipped
            );
        }
        Ok(report)
    }

    fn finish(&self, record: &EmailRecord, result: Result<(), String>, report: &mut DispatchReport) {
        let update = match &result {
            Ok(()) => self.store.update_status(record.id, EmailStatus::Sent, None),
            Err(e) => {
                log::warn!("Scheduled delivery of {} failed: {}", record.id, e);
                self.store
                    .update_status(record.id, EmailStatus::Failed, Some(e.as_str()))
            }
        };

        match (update, result) {
            (Ok(()), Ok(())) => report.sent += 1,
            (Ok(()), Err(_)) => report.failed += 1,
            (Err(e), _) => {
                log::error!("Could not record outcome for {}: {}", record.id, e);
                report.skipped += 1;
            }
        }
    }

    /// Purge records past their expiry
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let removed = self.store.delete_expired(now, self.attachments.as_ref())?;
        if removed > 0 {
            log::info!("Purged {} expired record(s)", removed);
        }
        Ok(removed)
    }

    /// Start all three loops; abort the handles to stop them
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let stale = {
            let this = self.clone();
            every(self.settings.stale_interval(), move || {
                if let Err(e) = this.sweep_stale(Utc::now()) {
                    log::error!("Stale sweep failed: {}", e);
                }
            })
        };

        let expiry = {
            let this = self.clone();
            every(self.settings.expiry_interval(), move || {
                if let Err(e) = this.sweep_expired(Utc::now()) {
                    log::error!("Expiry sweep failed: {}", e);
                }
            })
        };

        let dispatch = {
            let this = self.clone();
            let period = self.settings.dispatch_interval();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                loop {
                    ticker.tick().await;
                    if let Err(e) = this.dispatch_due(Utc::now()).await {
                        log::error!("Dispatch failed: {}", e);
                    }
                }
            })
        };

        log::info!(
            "Scheduler started (stale every {:?}, dispatch every {:?})",
            self.settings.stale_interval(),
            self.settings.dispatch_interval()
        );

        vec![stale, dispatch, expiry]
    }
}

fn interval(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn every<F>(period: Duration, mut pass: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            pass();
        }
    })
}
