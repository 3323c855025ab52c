//! Certificate authority pipeline
//!
//! Two independent workers share nothing but the topology store:
//!
//! - `NetworkIntake` turns `new` networks into `vanCA` certificate requests
//! - `Fulfillment` claims the oldest eligible request and issues its certificate
//!
//! Each worker runs passes forever. A pass is one transactional unit of work
//! that either commits completely or rolls back completely; the delay before
//! the next pass depends on its outcome (see `Schedule`). Failures are
//! logged and counted, and the failed row is retried on a later pass.

pub mod fulfillment;
pub mod intake;

pub use fulfillment::Fulfillment;
pub use intake::NetworkIntake;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use van_core::certificate::RequestId;
use van_core::{CertificateSubject, VanError};

use crate::issuer::IssuerError;
use crate::storage::StorageError;

/// Error type for a failed pass
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Issuance failed: {0}")]
    Issuer(#[from] IssuerError),

    #[error("Subject {0} does not exist")]
    MissingSubject(CertificateSubject),

    #[error("No issuing certificate is available yet for {0}")]
    IssuerNotReady(CertificateSubject),

    #[error("Certificate request {0} failed: {1}")]
    Request(RequestId, Box<PipelineError>),

    #[error(transparent)]
    Core(#[from] VanError),
}

/// Outcome of one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// A unit of work was completed
    Worked,
    /// Nothing was eligible
    Idle,
}

/// Delay before the next pass, by outcome of the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// After a pass that did work (drain the backlog)
    pub drain: Duration,
    /// After a pass that found nothing
    pub idle: Duration,
    /// After a failed pass
    pub backoff: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            drain: Duration::ZERO,
            idle: Duration::from_secs(2),
            backoff: Duration::from_secs(10),
        }
    }
}

impl Schedule {
    pub fn delay_after(&self, outcome: &Result<PassOutcome, PipelineError>) -> Duration {
        match outcome {
            Ok(PassOutcome::Worked) => self.drain,
            Ok(PassOutcome::Idle) => self.idle,
            Err(_) => self.backoff,
        }
    }
}

/// A self-rescheduling unit of work
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one pass
    async fn run_once(&self) -> Result<PassOutcome, PipelineError>;
}

/// Pass counters for one worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    passes: AtomicU64,
    worked: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of `WorkerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub passes: u64,
    pub worked: u64,
    pub failures: u64,
}

impl WorkerStats {
    pub fn record(&self, outcome: &Result<PassOutcome, PipelineError>) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(PassOutcome::Worked) => {
                self.worked.fetch_add(1, Ordering::Relaxed);
            }
            Ok(PassOutcome::Idle) => {}
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            worked: self.worked.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Counters for both pipeline workers
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub intake: WorkerStats,
    pub fulfillment: WorkerStats,
}

/// Run `worker` until `shutdown` flips to true
pub async fn run_worker<W>(
    worker: Arc<W>,
    schedule: Schedule,
    stats: Arc<PipelineStats>,
    pick: fn(&PipelineStats) -> &WorkerStats,
    mut shutdown: watch::Receiver<bool>,
) where
    W: Worker + ?Sized,
{
    info!(worker = worker.name(), "Worker started");

    while !*shutdown.borrow() {
        let outcome = worker.run_once().await;
        pick(&stats).record(&outcome);

        match &outcome {
            Ok(PassOutcome::Worked) => debug!(worker = worker.name(), "Pass completed work"),
            Ok(PassOutcome::Idle) => {}
            Err(e) => error!(worker = worker.name(), error = %e, "Pass failed, backing off"),
        }

        let delay = schedule.delay_after(&outcome);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(worker = worker.name(), "Worker stopped");
}

/// Handles to the running pipeline
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Spawn both workers on the current runtime
    pub fn spawn(
        intake: Arc<NetworkIntake>,
        fulfillment: Arc<Fulfillment>,
        schedule: Schedule,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(run_worker(intake, schedule, stats.clone(), |s| &s.intake, rx.clone())),
            tokio::spawn(run_worker(fulfillment, schedule, stats, |s| &s.fulfillment, rx)),
        ];
        Self { shutdown, tasks }
    }

    /// Signal both workers and wait for them to finish their current pass
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Worker for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run_once(&self) -> Result<PassOutcome, PipelineError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) % 3 {
                0 => Ok(PassOutcome::Worked),
                1 => Ok(PassOutcome::Idle),
                _ => Err(PipelineError::Storage(StorageError::Database("boom".into()))),
            }
        }
    }

    #[test]
    fn test_schedule_delays() {
        let schedule = Schedule::default();
        assert_eq!(schedule.delay_after(&Ok(PassOutcome::Worked)), Duration::ZERO);
        assert_eq!(schedule.delay_after(&Ok(PassOutcome::Idle)), Duration::from_secs(2));
        assert_eq!(
            schedule.delay_after(&Err(PipelineError::Storage(StorageError::Database("x".into())))),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_worker_counts_and_stops() {
        let worker = Arc::new(Scripted::default());
        let stats = Arc::new(PipelineStats::default());
        let schedule = Schedule {
            drain: Duration::ZERO,
            idle: Duration::from_millis(1),
            backoff: Duration::from_millis(1),
        };
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(run_worker(worker.clone(), schedule, stats.clone(), |s| &s.intake, rx));
        while worker.calls.load(Ordering::SeqCst) < 6 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tx.send(true).unwrap();
        task.await.unwrap();

        let snapshot = stats.intake.snapshot();
        assert!(snapshot.passes >= 6);
        assert!(snapshot.worked >= 2);
        assert!(snapshot.failures >= 2);
        assert_eq!(stats.fulfillment.snapshot(), WorkerSnapshot::default());
    }
}
