use crate::bitmap::Bitmap;
use crate::errors::{DaemonError, Result};
use crate::pool::ConnectionPool;
use crate::printer::Manager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempts per job before it is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Worker tick; also the spacing between retry attempts.
const WORKER_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Printing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Printing => "printing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// A single bitmap targeted at a single printer.
///
/// The payload is shared and immutable; retries reuse it without copying.
/// `completed` and `failed` are terminal - the worker never resurrects a job.
#[derive(Debug, Clone, Serialize)]
pub struct PrintJob {
    pub id: String,
    pub printer_id: String,
    #[serde(skip_serializing)]
    pub payload: Arc<Bitmap>,
    pub retries: u32,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// In-memory FIFO print queue with a single worker task and bounded retry.
///
/// Jobs keep their slice position when requeued after a failure, so a stuck
/// job at the head delays newer jobs until it completes or exhausts its
/// retries. That is deliberate; throughput expectations here are receipts,
/// not packets.
pub struct PrintQueue {
    jobs: Arc<Mutex<Vec<PrintJob>>>,
    max_retries: u32,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PrintQueue {
    /// Create the queue and start its worker.
    pub fn new(pool: Arc<ConnectionPool>, manager: Arc<Manager>, max_retries: u32) -> Self {
        let jobs: Arc<Mutex<Vec<PrintJob>>> = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let worker_jobs = Arc::clone(&jobs);
        let worker_token = token.clone();
        let worker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WORKER_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = worker_token.cancelled() => break,
                    _ = ticker.tick() => {
                        process_next(&worker_jobs, &pool, &manager, max_retries).await;
                    }
                }
            }
            debug!("print queue worker exited");
        });

        Self {
            jobs,
            max_retries,
            token,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Append a fresh job and return its id. Ownership of the bitmap
    /// transfers to the queue; it is immutable from here on.
    pub async fn enqueue(&self, printer_id: &str, payload: Arc<Bitmap>) -> String {
        let job = PrintJob {
            id: next_job_id(),
            printer_id: printer_id.to_string(),
            payload,
            retries: 0,
            status: JobStatus::Queued,
            error: None,
            created_at: Utc::now(),
        };
        let id = job.id.clone();
        self.jobs.lock().await.push(job);
        debug!("enqueued print job {} for printer {}", id, printer_id);
        id
    }

    /// A copy of the job's current state.
    pub async fn get(&self, job_id: &str) -> Option<PrintJob> {
        self.jobs
            .lock()
            .await
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
    }

    /// Copies of all jobs, in insertion order.
    pub async fn all(&self) -> Vec<PrintJob> {
        self.jobs.lock().await.clone()
    }

    /// Drop completed jobs; failed and in-flight jobs are retained.
    /// Returns the number removed.
    ///
    /// Any future clear variant must leave `printing` jobs alone - the
    /// worker's final update re-fetches by id and relies on it.
    pub async fn clear_completed(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|job| job.status != JobStatus::Completed);
        before - jobs.len()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Cancel the worker and wait for it to observe the token. Idempotent.
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Time-seeded monotonic job ids.
fn next_job_id() -> String {
    static NEXT: OnceLock<AtomicU64> = OnceLock::new();
    let counter = NEXT.get_or_init(|| {
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .unsigned_abs();
        AtomicU64::new(nanos)
    });
    format!("job_{}", counter.fetch_add(1, Ordering::Relaxed))
}

/// One worker pass: promote the first queued job, drive a single print
/// attempt, then resolve it under the lock.
async fn process_next(
    jobs: &Mutex<Vec<PrintJob>>,
    pool: &ConnectionPool,
    manager: &Manager,
    max_retries: u32,
) {
    let claimed = {
        let mut jobs = jobs.lock().await;
        match jobs.iter_mut().find(|job| job.status == JobStatus::Queued) {
            Some(job) => {
                job.status = JobStatus::Printing;
                Some((job.id.clone(), job.printer_id.clone(), Arc::clone(&job.payload)))
            }
            None => None,
        }
    };
    let Some((job_id, printer_id, payload)) = claimed else {
        return;
    };

    // Exactly one attempt per pass; the lock is not held across it.
    let result = attempt_print(pool, manager, &printer_id, &payload).await;

    let mut jobs = jobs.lock().await;
    // Re-fetch by id. If the job vanished or left `printing` in the
    // meantime, abandon the result rather than double-updating.
    let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
        return;
    };
    if job.status != JobStatus::Printing {
        return;
    }

    match result {
        Ok(()) => {
            job.status = JobStatus::Completed;
            info!("print job {} completed", job.id);
        }
        Err(e) => {
            job.retries += 1;
            job.error = Some(e.to_string());
            if job.retries >= max_retries {
                job.status = JobStatus::Failed;
                warn!(
                    "print job {} failed permanently after {} attempts: {}",
                    job.id, job.retries, e
                );
            } else {
                job.status = JobStatus::Queued;
                debug!(
                    "print job {} attempt {} failed, requeued: {}",
                    job.id, job.retries, e
                );
            }
        }
    }
}

/// Ensure a pooled connection exists, then send the encoded bitmap once.
/// A connection failure counts as an attempt failure like any other.
async fn attempt_print(
    pool: &ConnectionPool,
    manager: &Manager,
    printer_id: &str,
    payload: &Bitmap,
) -> Result<()> {
    if !pool.is_connected(printer_id).await {
        let printer = manager
            .get_printer(printer_id)
            .await
            .ok_or_else(|| DaemonError::NotFound(format!("printer not found: {printer_id}")))?;
        pool.connect(&printer).await?;
    }

    pool.print(printer_id, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, MockConnection};
    use crate::escpos;

    struct Fixture {
        queue: PrintQueue,
        mock: MockConnection,
    }

    async fn fixture(dir: &tempfile::TempDir, max_retries: u32) -> Fixture {
        let manager = Arc::new(Manager::new(&dir.path().join("registry.json")));
        let pool = Arc::new(ConnectionPool::new());
        let mock = MockConnection::new();
        pool.install("p1", Connection::Mock(mock.clone())).await;
        let queue = PrintQueue::new(pool, manager, max_retries);
        Fixture { queue, mock }
    }

    fn payload(width: u32) -> Arc<Bitmap> {
        Arc::new(Bitmap::new(width, 4))
    }

    #[tokio::test(start_paused = true)]
    async fn job_completes_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir, DEFAULT_MAX_RETRIES).await;

        let bitmap = payload(8);
        let id = f.queue.enqueue("p1", Arc::clone(&bitmap)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let job = f.queue.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retries, 0);
        assert!(job.error.is_none());
        assert_eq!(f.mock.write_count(), 1);
        assert_eq!(f.mock.last_write().unwrap(), escpos::encode_bitmap(&bitmap));

        f.queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn job_fails_after_max_retries_and_stays_failed() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir, 3).await;
        f.mock.fail_next(usize::MAX);

        let id = f.queue.enqueue("p1", payload(8)).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let job = f.queue.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 3);
        assert!(job.error.as_deref().unwrap_or("").contains("simulated"));
        assert_eq!(f.mock.attempt_count(), 3);

        // Ten further ticks: no additional attempts on a terminal job.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.mock.attempt_count(), 3);
        assert_eq!(f.queue.get(&id).await.unwrap().status, JobStatus::Failed);

        f.queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn job_succeeds_after_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir, 3).await;
        f.mock.fail_next(2);

        let id = f.queue.enqueue("p1", payload(8)).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let job = f.queue.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retries, 2);
        assert_eq!(f.mock.attempt_count(), 3);
        // The successful attempt delivered exactly one stream.
        assert_eq!(f.mock.write_count(), 1);

        f.queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_job_keeps_its_position() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir, 3).await;
        f.mock.fail_next(1);

        let first = payload(16);
        let second = payload(32);
        let first_id = f.queue.enqueue("p1", Arc::clone(&first)).await;
        let second_id = f.queue.enqueue("p1", Arc::clone(&second)).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            f.queue.get(&first_id).await.unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(
            f.queue.get(&second_id).await.unwrap().status,
            JobStatus::Completed
        );
        // The head job retried in place, so its stream landed first.
        let all = f.queue.all().await;
        assert_eq!(all[0].id, first_id);
        assert_eq!(all[0].retries, 1);

        f.queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_printer_counts_as_attempt_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(Manager::new(&dir.path().join("registry.json")));
        let pool = Arc::new(ConnectionPool::new());
        let queue = PrintQueue::new(pool, manager, 2);

        let id = queue.enqueue("ghost", payload(8)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let job = queue.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 2);
        assert!(job.error.as_deref().unwrap_or("").contains("not found"));

        queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clear_completed_keeps_failed_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir, 1).await;

        let ok_id = f.queue.enqueue("p1", payload(8)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        f.mock.fail_next(usize::MAX);
        let bad_id = f.queue.enqueue("p1", payload(8)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(f.queue.get(&ok_id).await.unwrap().status, JobStatus::Completed);
        assert_eq!(f.queue.get(&bad_id).await.unwrap().status, JobStatus::Failed);

        let removed = f.queue.clear_completed().await;
        assert_eq!(removed, 1);
        assert!(f.queue.get(&ok_id).await.is_none());
        assert!(f.queue.get(&bad_id).await.is_some());

        f.queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn all_returns_jobs_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir, 3).await;

        let a = f.queue.enqueue("p1", payload(8)).await;
        let b = f.queue.enqueue("p1", payload(8)).await;
        let c = f.queue.enqueue("p1", payload(8)).await;

        let ids: Vec<String> = f.queue.all().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a, b, c]);

        f.queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn every_job_reaches_a_terminal_state() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir, 3).await;

        for _ in 0..5 {
            f.queue.enqueue("p1", payload(8)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        for job in f.queue.all().await {
            assert_eq!(job.status, JobStatus::Completed);
        }
        assert_eq!(f.mock.write_count(), 5);

        f.queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&dir, 3).await;
        f.queue.stop().await;
        f.queue.stop().await;
    }

    #[test]
    fn job_ids_are_unique_and_monotonic() {
        let a = next_job_id();
        let b = next_job_id();
        assert_ne!(a, b);
        let a_n: u64 = a.trim_start_matches("job_").parse().unwrap();
        let b_n: u64 = b.trim_start_matches("job_").parse().unwrap();
        assert!(b_n > a_n);
    }
}
