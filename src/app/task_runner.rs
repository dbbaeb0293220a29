//! Background dispatch of index deltas.
//!
//! One worker thread drains the channel in FIFO order, so the delete/add pair
//! emitted for an item always reaches the index in that order. Deltas that
//! keep failing end up in `index-queue.json` and can be replayed later.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::{sleep, JoinHandle},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::random;
use serde::{Deserialize, Serialize};

use crate::{
    config::IndexQueueConfig,
    eid::Eid,
    index::{IndexDelta, IndexService},
    storage::StorageManager,
};

pub const QUEUE_DUMP_FILE: &str = "index-queue.json";

pub fn now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: u128,
}

impl QueueDump {
    fn empty() -> Self {
        QueueDump {
            queue: vec![],
            now: now(),
        }
    }
}

/// A delta that exhausted its retries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: Eid,
    pub delta: IndexDelta,
    pub error: String,
    #[serde(default)]
    pub attempt: u8,
}

pub enum Task {
    Apply(IndexDelta),

    /// answered once everything queued before it has been handled
    Flush(mpsc::Sender<()>),

    /// request to gracefully shutdown task queue
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    applied: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexQueueStats {
    pub enqueued: u64,
    pub applied: u64,
    pub retried: u64,
    pub failed: u64,
}

/// Dead-letter file shared by the worker and `replay_failed`.
#[derive(Clone)]
pub struct DeadLetters {
    storage: Arc<dyn StorageManager>,
    lock: Arc<Mutex<()>>,
}

impl DeadLetters {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self {
            storage,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn read_queue_dump(&self) -> QueueDump {
        if !self.storage.exists(QUEUE_DUMP_FILE) {
            return QueueDump::empty();
        }

        let data = match self.storage.read(QUEUE_DUMP_FILE) {
            Ok(data) => data,
            Err(e) => {
                log::error!("failed to read queue dump: {e}");
                return QueueDump::empty();
            }
        };

        serde_json::from_slice(&data).unwrap_or_else(|e| {
            log::error!("failed to parse queue dump: {e}");
            QueueDump::empty()
        })
    }

    fn write_queue_dump(&self, queue_dump: &QueueDump) {
        let data = match serde_json::to_string_pretty(queue_dump) {
            Ok(data) => data,
            Err(e) => {
                log::error!("failed to serialize queue dump: {e}");
                return;
            }
        };

        if let Err(e) = self.storage.write(QUEUE_DUMP_FILE, data.as_bytes()) {
            log::error!("failed to write queue dump: {e}");
        }
    }

    pub fn push(&self, delta: IndexDelta, error: String, attempt: u8) -> Eid {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let id = Eid::new();

        let mut queue_dump = self.read_queue_dump();
        queue_dump.queue.push(TaskDump {
            id: id.clone(),
            delta,
            error,
            attempt,
        });
        queue_dump.now = now();
        self.write_queue_dump(&queue_dump);

        id
    }

    pub fn list(&self) -> Vec<TaskDump> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_queue_dump().queue
    }

    /// Empty the file and hand back what it held.
    pub fn take_all(&self) -> Vec<TaskDump> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let queue_dump = self.read_queue_dump();
        if !queue_dump.queue.is_empty() {
            self.write_queue_dump(&QueueDump::empty());
        }
        queue_dump.queue
    }
}

fn backoff_ms(config: &IndexQueueConfig, attempt: u8) -> u64 {
    let base = config.base_backoff_ms;
    let jitter = if base == 0 { 0 } else { random::<u64>() % base };
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1) as u32))
        .saturating_add(jitter)
}

fn run_delta(
    delta: IndexDelta,
    index: &dyn IndexService,
    config: &IndexQueueConfig,
    counters: &Counters,
    dead_letters: &DeadLetters,
) {
    let mut attempt = 0u8;

    loop {
        match delta.apply(index) {
            Ok(()) => {
                counters.applied.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(err) if attempt < config.max_retries && err.is_retryable() => {
                attempt += 1;
                counters.retried.fetch_add(1, Ordering::Relaxed);
                let delay_ms = backoff_ms(config, attempt);
                log::info!(
                    "index delta: retrying (attempt {}/{}) after error: {}, backoff {}ms",
                    attempt,
                    config.max_retries,
                    err,
                    delay_ms
                );
                sleep(Duration::from_millis(delay_ms));
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("index delta {delta:?} failed after {attempt} retries: {err}");
                dead_letters.push(delta, err.to_string(), attempt);
                return;
            }
        }
    }
}

fn start_queue(
    task_rx: mpsc::Receiver<Task>,
    index: Arc<dyn IndexService>,
    config: IndexQueueConfig,
    counters: Arc<Counters>,
    dead_letters: DeadLetters,
) {
    let _span = tracing::info_span!("index_queue").entered();
    log::debug!("index queue waiting for deltas");
    while let Ok(task) = task_rx.recv() {
        match task {
            Task::Apply(delta) => {
                run_delta(delta, index.as_ref(), &config, &counters, &dead_letters)
            }
            Task::Flush(done) => {
                let _ = done.send(());
            }
            Task::Shutdown => {
                log::debug!("index queue drained, stopping");
                return;
            }
        }
    }
}

pub struct IndexQueue {
    task_tx: mpsc::Sender<Task>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    dead_letters: DeadLetters,
}

impl IndexQueue {
    pub fn start(
        index: Arc<dyn IndexService>,
        config: IndexQueueConfig,
        dead_letters: DeadLetters,
    ) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<Task>();
        let counters = Arc::new(Counters::default());

        let handle = std::thread::spawn({
            let counters = counters.clone();
            let dead_letters = dead_letters.clone();
            move || start_queue(task_rx, index, config, counters, dead_letters)
        });

        Self {
            task_tx,
            handle: Mutex::new(Some(handle)),
            counters,
            dead_letters,
        }
    }

    pub fn enqueue(&self, delta: IndexDelta) {
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        if let Err(mpsc::SendError(task)) = self.task_tx.send(Task::Apply(delta)) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            if let Task::Apply(delta) = task {
                log::error!("index queue is stopped, parking {delta:?}");
                self.dead_letters
                    .push(delta, "index queue is stopped".to_string(), 0);
            }
        }
    }

    /// Block until every delta enqueued so far has been applied or parked.
    pub fn flush(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        if self.task_tx.send(Task::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Drain pending deltas, then stop the worker. Safe to call twice.
    pub fn shutdown(&self) {
        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(e) => e.into_inner().take(),
        };

        let Some(handle) = handle else {
            return;
        };

        let _ = self.task_tx.send(Task::Shutdown);
        if let Err(err) = handle.join() {
            log::error!("index queue worker panicked: {err:?}");
        }
    }

    /// Re-enqueue parked deltas that `still_valid` accepts, oldest first.
    /// The rest are discarded. Returns how many were re-enqueued.
    pub fn replay_failed(&self, still_valid: impl Fn(&IndexDelta) -> bool) -> usize {
        let mut count = 0;
        for task_dump in self.dead_letters.take_all() {
            if !still_valid(&task_dump.delta) {
                log::info!(
                    "dropping outdated index delta {}: {:?}",
                    task_dump.id,
                    task_dump.delta
                );
                continue;
            }

            log::info!("replaying index delta {}", task_dump.id);
            self.enqueue(task_dump.delta);
            count += 1;
        }
        count
    }

    pub fn failed(&self) -> Vec<TaskDump> {
        self.dead_letters.list()
    }

    pub fn stats(&self) -> IndexQueueStats {
        IndexQueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{index::IndexError, storage::BackendLocal};
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` calls with `error`, then records calls.
    struct FlakyIndex {
        failures: AtomicUsize,
        retryable: bool,
        calls: Mutex<Vec<IndexDelta>>,
    }

    impl FlakyIndex {
        fn new(failures: usize, retryable: bool) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                retryable,
                calls: Mutex::new(vec![]),
            }
        }

        fn record(&self, delta: IndexDelta) -> Result<(), IndexError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(if self.retryable {
                    IndexError::Unavailable("down".into())
                } else {
                    IndexError::Rejected {
                        status: 400,
                        message: "bad".into(),
                    }
                });
            }
            self.calls.lock().unwrap().push(delta);
            Ok(())
        }
    }

    impl IndexService for FlakyIndex {
        fn add_document(&self, text: &str, item_id: u64) -> Result<(), IndexError> {
            self.record(IndexDelta::Add {
                text: text.into(),
                item_id,
            })
        }

        fn delete_document(&self, text: &str) -> Result<(), IndexError> {
            self.record(IndexDelta::Delete { text: text.into() })
        }

        fn query_ids(&self, _text: &str) -> Result<Vec<u64>, IndexError> {
            Ok(vec![])
        }

        fn resynchronize(&self) -> Result<(), IndexError> {
            Ok(())
        }
    }

    fn queue(
        index: Arc<FlakyIndex>,
        max_retries: u8,
    ) -> (IndexQueue, DeadLetters, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(BackendLocal::new(tmp.path()).unwrap());
        let dead_letters = DeadLetters::new(storage);
        let config = IndexQueueConfig {
            max_retries,
            base_backoff_ms: 1,
        };
        (
            IndexQueue::start(index, config, dead_letters.clone()),
            dead_letters,
            tmp,
        )
    }

    fn add(text: &str, item_id: u64) -> IndexDelta {
        IndexDelta::Add {
            text: text.into(),
            item_id,
        }
    }

    #[test]
    fn test_deltas_applied_in_order() {
        let index = Arc::new(FlakyIndex::new(0, true));
        let (queue, _, _tmp) = queue(index.clone(), 3);

        queue.enqueue(IndexDelta::Delete { text: "old".into() });
        queue.enqueue(add("new", 1));
        queue.flush();

        assert_eq!(
            *index.calls.lock().unwrap(),
            vec![IndexDelta::Delete { text: "old".into() }, add("new", 1)]
        );
        assert_eq!(
            queue.stats(),
            IndexQueueStats {
                enqueued: 2,
                applied: 2,
                retried: 0,
                failed: 0
            }
        );
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let index = Arc::new(FlakyIndex::new(2, true));
        let (queue, dead_letters, _tmp) = queue(index.clone(), 3);

        queue.enqueue(add("wifi", 1));
        queue.flush();

        assert_eq!(*index.calls.lock().unwrap(), vec![add("wifi", 1)]);
        assert_eq!(queue.stats().retried, 2);
        assert!(dead_letters.list().is_empty());
    }

    #[test]
    fn test_exhausted_delta_is_parked_and_replayed() {
        let index = Arc::new(FlakyIndex::new(3, true));
        let (queue, _, tmp) = queue(index.clone(), 2);

        queue.enqueue(add("wifi", 1));
        queue.flush();

        let failed = queue.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].delta, add("wifi", 1));
        assert_eq!(failed[0].attempt, 2);
        assert!(tmp.path().join(QUEUE_DUMP_FILE).exists());

        // one failure left in the fake, then it recovers
        assert_eq!(queue.replay_failed(|_| true), 1);
        queue.flush();

        assert_eq!(*index.calls.lock().unwrap(), vec![add("wifi", 1)]);
        assert!(queue.failed().is_empty());
    }

    #[test]
    fn test_replay_discards_rejected_deltas() {
        let index = Arc::new(FlakyIndex::new(2, false));
        let (queue, _, _tmp) = queue(index.clone(), 0);

        queue.enqueue(add("old", 1));
        queue.enqueue(add("new", 1));
        queue.flush();
        assert_eq!(queue.failed().len(), 2);

        assert_eq!(queue.replay_failed(|delta| *delta == add("new", 1)), 1);
        queue.flush();

        assert_eq!(*index.calls.lock().unwrap(), vec![add("new", 1)]);
        assert!(queue.failed().is_empty());
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let index = Arc::new(FlakyIndex::new(1, false));
        let (queue, _, _tmp) = queue(index.clone(), 5);

        queue.enqueue(add("wifi", 1));
        queue.enqueue(add("printer", 2));
        queue.flush();

        assert_eq!(queue.stats().retried, 0);
        assert_eq!(queue.stats().failed, 1);
        assert_eq!(*index.calls.lock().unwrap(), vec![add("printer", 2)]);
    }

    #[test]
    fn test_shutdown_drains_then_parks_late_deltas() {
        let index = Arc::new(FlakyIndex::new(0, true));
        let (queue, dead_letters, _tmp) = queue(index.clone(), 1);

        queue.enqueue(add("a", 1));
        queue.shutdown();
        queue.shutdown();
        assert_eq!(index.calls.lock().unwrap().len(), 1);

        queue.enqueue(add("late", 2));
        assert_eq!(dead_letters.list().len(), 1);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let config = IndexQueueConfig {
            max_retries: 3,
            base_backoff_ms: 100,
        };
        let first = backoff_ms(&config, 1);
        let third = backoff_ms(&config, 3);
        assert!((100..200).contains(&first));
        assert!((400..500).contains(&third));

        let huge = IndexQueueConfig {
            max_retries: u8::MAX,
            base_backoff_ms: u64::MAX,
        };
        assert_eq!(backoff_ms(&huge, u8::MAX), u64::MAX);
    }
}
