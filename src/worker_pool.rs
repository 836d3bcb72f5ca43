//! Worker pool (C2, spec.md §4.2): a bounded set of OS threads that run codec
//! jobs handed to them over a `crossbeam_channel`, replying through a
//! `tokio::sync::oneshot` so the async entry pipeline can `.await` the result.
//!
//! Grounded on the persistent-thread, bounded-channel pattern in the pack's
//! BlitzArch worker module (`thread::scope` + `crossbeam_channel::bounded`),
//! adapted to a process-wide pool with an explicit `configure`/`terminate_all`
//! lifecycle (spec.md §9 "process-wide worker pool" design note) instead of a
//! scope tied to one archive's lifetime.
//!
//! No shared mutable memory crosses the thread boundary: a job carries the
//! `Box<dyn Codec>` and the input chunk by value, and the worker thread hands
//! the (possibly mutated) codec and its output back the same way.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::codec::{Codec, CodecTotals};
use crate::error::ArchiveError;
use crate::options::WorkerPoolConfig;

enum JobPayload {
    Update { codec: Box<dyn Codec>, chunk: Vec<u8> },
    Finish { codec: Box<dyn Codec> },
}

pub enum JobOutcome {
    Update {
        codec: Box<dyn Codec>,
        result: Result<Vec<u8>, ArchiveError>,
    },
    Finish {
        result: Result<(Vec<u8>, CodecTotals), ArchiveError>,
    },
}

enum Message {
    Job {
        payload: JobPayload,
        cancel: Arc<AtomicBool>,
        reply: oneshot::Sender<JobOutcome>,
    },
    Shutdown,
}

/// A handle to a single outstanding codec job, leased from the pool. Carries
/// its own cancellation token (spec.md §4.2 "each lease carries a
/// cancellation token").
pub struct WorkerLease {
    cancel: Arc<AtomicBool>,
}

impl WorkerLease {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    sender: crossbeam_channel::Sender<Message>,
    receiver: crossbeam_channel::Receiver<Message>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    active_threads: Arc<AtomicU64>,
    last_activity: Mutex<Instant>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Arc<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let pool = Arc::new(Self {
            sender,
            receiver,
            threads: Mutex::new(Vec::new()),
            active_threads: Arc::new(AtomicU64::new(0)),
            last_activity: Mutex::new(Instant::now()),
            config,
        });
        pool.ensure_capacity();
        pool.spawn_idle_reaper();
        pool
    }

    /// Best-effort idle-timeout recycling: if a full `terminate_timeout`
    /// elapses with no job submitted, shut the worker threads down; they are
    /// lazily respawned on the next `submit`. No-op outside a tokio runtime
    /// (e.g. constructing a pool in a plain `#[test]`).
    fn spawn_idle_reaper(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<WorkerPool> = Arc::downgrade(self);
        let timeout = self.config.terminate_timeout;
        handle.spawn(async move {
            let mut interval = tokio::time::interval(timeout);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                let Some(pool) = weak.upgrade() else {
                    break;
                };
                let idle_for = pool
                    .last_activity
                    .lock()
                    .expect("worker pool last-activity lock")
                    .elapsed();
                if idle_for >= timeout {
                    trace!("worker pool idle timeout reached, recycling threads");
                    pool.terminate_all();
                }
            }
        });
    }

    fn ensure_capacity(self: &Arc<Self>) {
        if !self.config.use_workers {
            return;
        }
        let mut threads = self.threads.lock().expect("worker pool thread list lock");
        while (threads.len() as usize) < self.config.max_workers {
            let receiver = self.receiver.clone();
            let active = Arc::clone(&self.active_threads);
            let worker_id = threads.len();
            let handle = std::thread::Builder::new()
                .name(format!("zipwright-worker-{worker_id}"))
                .spawn(move || {
                    active.fetch_add(1, Ordering::SeqCst);
                    debug!(worker_id, "worker thread started");
                    for message in receiver {
                        match message {
                            Message::Shutdown => break,
                            Message::Job {
                                payload,
                                cancel,
                                reply,
                            } => {
                                if cancel.load(Ordering::SeqCst) {
                                    let outcome = match payload {
                                        JobPayload::Update { codec, .. } => JobOutcome::Update {
                                            codec,
                                            result: Err(ArchiveError::abort(
                                                "codec job cancelled before execution",
                                            )),
                                        },
                                        JobPayload::Finish { .. } => JobOutcome::Finish {
                                            result: Err(ArchiveError::abort(
                                                "codec job cancelled before execution",
                                            )),
                                        },
                                    };
                                    let _ = reply.send(outcome);
                                    trace!(worker_id, "worker destroyed after cancellation");
                                    break;
                                }

                                let outcome = run_job(payload);
                                let _ = reply.send(outcome);
                            }
                        }
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                    debug!(worker_id, "worker thread exiting");
                })
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
    }

    /// Submit a codec `update` job, returning a lease and a future resolving
    /// to the outcome.
    pub fn submit_update(
        self: &Arc<Self>,
        codec: Box<dyn Codec>,
        chunk: Vec<u8>,
    ) -> (WorkerLease, oneshot::Receiver<JobOutcome>) {
        self.submit(JobPayload::Update { codec, chunk })
    }

    pub fn submit_finish(
        self: &Arc<Self>,
        codec: Box<dyn Codec>,
    ) -> (WorkerLease, oneshot::Receiver<JobOutcome>) {
        self.submit(JobPayload::Finish { codec })
    }

    fn submit(
        self: &Arc<Self>,
        payload: JobPayload,
    ) -> (WorkerLease, oneshot::Receiver<JobOutcome>) {
        *self.last_activity.lock().expect("worker pool last-activity lock") = Instant::now();
        let cancel = Arc::new(AtomicBool::new(false));
        let (reply_tx, reply_rx) = oneshot::channel();

        // `use_workers == false` means no thread ever drains the channel;
        // run the job inline so the contract (a reply always arrives) still
        // holds, just without concurrency.
        if !self.config.use_workers {
            let outcome = run_job(payload);
            let _ = reply_tx.send(outcome);
            return (WorkerLease { cancel }, reply_rx);
        }

        self.ensure_capacity();
        let message = Message::Job {
            payload,
            cancel: Arc::clone(&cancel),
            reply: reply_tx,
        };
        if self.sender.send(message).is_err() {
            trace!("worker pool channel closed, job dropped");
        }
        (WorkerLease { cancel }, reply_rx)
    }

    /// Cancel every outstanding lease and destroy all workers. Idempotent;
    /// always completes (spec.md §4.2/§5).
    pub fn terminate_all(self: &Arc<Self>) {
        let mut threads = self.threads.lock().expect("worker pool thread list lock");
        for _ in threads.iter() {
            let _ = self.sender.send(Message::Shutdown);
        }
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool terminated");
    }

    pub fn active_thread_count(&self) -> u64 {
        self.active_threads.load(Ordering::SeqCst)
    }
}

fn run_job(payload: JobPayload) -> JobOutcome {
    match payload {
        JobPayload::Update { mut codec, chunk } => {
            let result = codec.update(&chunk);
            JobOutcome::Update { codec, result }
        }
        JobPayload::Finish { mut codec } => {
            let result = codec.finish();
            JobOutcome::Finish { result }
        }
    }
}

static GLOBAL_POOL: OnceLock<Mutex<Option<Arc<WorkerPool>>>> = OnceLock::new();

fn global_slot() -> &'static Mutex<Option<Arc<WorkerPool>>> {
    GLOBAL_POOL.get_or_init(|| Mutex::new(None))
}

/// Configure the process-wide worker pool (spec.md §4.2 `configure(...)`).
/// Reconfiguration drains the existing pool first.
pub fn configure(config: WorkerPoolConfig) -> Arc<WorkerPool> {
    let mut slot = global_slot().lock().expect("global worker pool lock");
    if let Some(existing) = slot.take() {
        existing.terminate_all();
    }
    let pool = WorkerPool::new(config);
    *slot = Some(Arc::clone(&pool));
    pool
}

/// Return the process-wide pool, creating one with default settings if
/// `configure` was never called.
pub fn global() -> Arc<WorkerPool> {
    let mut slot = global_slot().lock().expect("global worker pool lock");
    if let Some(pool) = slot.as_ref() {
        return Arc::clone(pool);
    }
    let pool = WorkerPool::new(WorkerPoolConfig::default());
    *slot = Some(Arc::clone(&pool));
    pool
}

/// `terminateWorkers()`: idempotent, always succeeds. After it returns, the
/// next `add()` reinitializes the pool (spec.md §5).
pub fn terminate_all() {
    let mut slot = global_slot().lock().expect("global worker pool lock");
    if let Some(pool) = slot.take() {
        pool.terminate_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::StoreCodec;

    #[tokio::test]
    async fn test_submit_update_roundtrips() {
        let pool = WorkerPool::new(WorkerPoolConfig::conservative());
        let (_lease, rx) = pool.submit_update(Box::new(StoreCodec::new()), b"hello".to_vec());
        match rx.await.unwrap() {
            JobOutcome::Update { result, .. } => assert_eq!(result.unwrap(), b"hello"),
            JobOutcome::Finish { .. } => panic!("expected update outcome"),
        }
        pool.terminate_all();
    }

    #[tokio::test]
    async fn test_terminate_all_is_idempotent() {
        let pool = WorkerPool::new(WorkerPoolConfig::conservative());
        pool.terminate_all();
        pool.terminate_all();
    }

    #[tokio::test]
    async fn test_use_workers_false_still_replies_inline() {
        let config = WorkerPoolConfig::conservative().use_workers(false);
        let pool = WorkerPool::new(config);
        assert_eq!(pool.active_thread_count(), 0);
        let (_lease, rx) = pool.submit_update(Box::new(StoreCodec::new()), b"hi".to_vec());
        match rx.await.unwrap() {
            JobOutcome::Update { result, .. } => assert_eq!(result.unwrap(), b"hi"),
            JobOutcome::Finish { .. } => panic!("expected update outcome"),
        }
    }

    #[test]
    fn test_configure_drains_previous_pool() {
        let first = configure(WorkerPoolConfig::conservative());
        assert!(first.active_thread_count() >= 1);
        let second = configure(WorkerPoolConfig::conservative());
        assert!(second.active_thread_count() >= 1);
        terminate_all();
    }
}
