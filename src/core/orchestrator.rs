// src/core/orchestrator.rs

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::core::models::{DomainTarget, ScanRecord};
use crate::core::scanner::{ScanContext, scan_domain};
use crate::core::sink::RecordSink;
use crate::errors::FatalError;

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub written: usize,
    pub reachable: usize,
    pub hsts: usize,
    pub redirect_ok: usize,
    pub parked: usize,
}

impl ScanSummary {
    fn count(&mut self, record: &ScanRecord) {
        self.written += 1;
        self.reachable += usize::from(record.http_reachable || record.https_reachable);
        self.hsts += usize::from(record.hsts_present);
        self.redirect_ok += usize::from(record.https_redirect_ok);
        self.parked += usize::from(record.is_parked);
    }
}

/// Fixed-size worker pool feeding one writer.
///
/// Workers pull domains from a shared bounded queue, so a slow domain never
/// holds up the others. Only the writer touches the sink.
pub struct Orchestrator {
    ctx: Arc<ScanContext>,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(ctx: Arc<ScanContext>, concurrency: usize) -> Self {
        Self {
            ctx,
            concurrency: concurrency.max(1),
        }
    }

    /// Scans every target and writes exactly one record per target.
    ///
    /// Records come out in completion order. Returns once the writer has
    /// drained the result queue and closed the sink.
    pub async fn run(
        &self,
        targets: Vec<DomainTarget>,
        mut sink: Box<dyn RecordSink>,
    ) -> Result<ScanSummary, FatalError> {
        let total = targets.len();
        let queue_depth = self.concurrency * 2;
        info!(domains = total, workers = self.concurrency, "Starting scan run.");

        let (job_tx, job_rx) = mpsc::channel::<DomainTarget>(queue_depth);
        let (result_tx, mut result_rx) = mpsc::channel::<ScanRecord>(queue_depth);
        let job_rx = Arc::new(Mutex::new(job_rx));

        // The sink is synchronous I/O, so the writer lives on a blocking thread.
        let writer = tokio::task::spawn_blocking(move || -> Result<ScanSummary, FatalError> {
            let mut summary = ScanSummary::default();
            sink.begin()?;
            while let Some(record) = result_rx.blocking_recv() {
                sink.write_record(&record)?;
                summary.count(&record);
            }
            sink.finish()?;
            Ok(summary)
        });

        let mut workers = JoinSet::new();
        for id in 0..self.concurrency {
            workers.spawn(worker(id, self.ctx.clone(), job_rx.clone(), result_tx.clone()));
        }
        // Workers hold the only remaining handles: the writer stops when they
        // exit, and the feeder below notices if they all die early.
        drop(result_tx);
        drop(job_rx);

        for target in targets {
            if job_tx.send(target).await.is_err() {
                error!("All workers exited before the queue was drained.");
                break;
            }
        }
        drop(job_tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task ended abnormally.");
            }
        }
        debug!("All workers finished.");

        let summary = writer
            .await
            .map_err(|e| FatalError::SinkWrite(format!("writer task failed: {e}")))??;
        info!(
            written = summary.written,
            reachable = summary.reachable,
            hsts = summary.hsts,
            redirect_ok = summary.redirect_ok,
            parked = summary.parked,
            "Scan run finished."
        );
        Ok(summary)
    }
}

async fn worker(
    id: usize,
    ctx: Arc<ScanContext>,
    jobs: Arc<Mutex<mpsc::Receiver<DomainTarget>>>,
    results: mpsc::Sender<ScanRecord>,
) {
    loop {
        // Lock only long enough to take one job.
        let next = jobs.lock().await.recv().await;
        let Some(target) = next else { break };
        debug!(worker = id, domain = %target, "Picked up domain.");

        let record = scan_isolated(ctx.clone(), target).await;
        if results.send(record).await.is_err() {
            error!(worker = id, "Writer is gone, stopping worker.");
            break;
        }
    }
    debug!(worker = id, "Worker exiting.");
}

/// Runs one pipeline in its own task so a panic costs one record's details,
/// not the record itself.
async fn scan_isolated(ctx: Arc<ScanContext>, target: DomainTarget) -> ScanRecord {
    let fallback = target.clone();
    match tokio::spawn(async move { scan_domain(&ctx, target).await }).await {
        Ok(record) => record,
        Err(e) => {
            error!(domain = %fallback, error = %e, "Domain pipeline panicked, emitting defaults.");
            ScanRecord::new(fallback)
        }
    }
}
