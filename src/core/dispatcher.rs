//! Priority queue and bounded worker pool.
//!
//! Tasks are dispatched lowest priority number first, FIFO among equal
//! priorities. The number of concurrent workers is bounded by a limit the
//! mode controller adjusts between ticks; a new limit only affects which
//! tasks start next, never tasks already running.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{Task, TaskResult};

use super::error::EngineError;
use super::stats::QueueProbe;
use super::worker::Worker;

/// Default maximum number of pending tasks
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Job {
    task: Task,
    seq: u64,
    enqueued_at: Instant,
    reply: oneshot::Sender<TaskResult>,
}

impl Job {
    fn rank(&self) -> u8 {
        self.task.priority.rank()
    }
}

// BinaryHeap is a max-heap: the "greatest" job is the most urgent, earliest one.
impl Ord for Job {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .rank()
            .cmp(&self.rank())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Job {}

#[derive(Default)]
struct PendingQueue {
    heap: BinaryHeap<Job>,
    next_seq: u64,
}

impl PendingQueue {
    /// Remove the least urgent job, oldest first among equals
    fn evict_one(&mut self) -> Option<Job> {
        let mut jobs = std::mem::take(&mut self.heap).into_vec();
        let victim = jobs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.rank().cmp(&b.rank()).then_with(|| b.seq.cmp(&a.seq)))
            .map(|(idx, _)| idx);

        let evicted = victim.map(|idx| jobs.swap_remove(idx));
        self.heap = BinaryHeap::from(jobs);
        evicted
    }
}

/// Decrements the active worker count even if the worker panics
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Dispatcher {
    queue: Mutex<PendingQueue>,
    notify: Notify,
    capacity: usize,
    worker_limit: AtomicUsize,
    active: AtomicUsize,
    running: AtomicBool,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(worker_limit: usize, capacity: usize) -> Self {
        Self {
            queue: Mutex::new(PendingQueue::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            worker_limit: AtomicUsize::new(worker_limit.max(1)),
            active: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a task and return a receiver for its result.
    ///
    /// A full queue evicts its least urgent pending task; the evicted
    /// task's waiter receives a failed result.
    pub fn enqueue(&self, task: Task) -> Result<oneshot::Receiver<TaskResult>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }

        let (reply, rx) = oneshot::channel();
        let evicted = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            let evicted = if queue.heap.len() >= self.capacity {
                queue.evict_one()
            } else {
                None
            };

            let seq = queue.next_seq;
            queue.next_seq += 1;
            debug!(tool = %task.tool_name, priority = %task.priority, seq, "Task enqueued");
            queue.heap.push(Job {
                task,
                seq,
                enqueued_at: Instant::now(),
                reply,
            });
            evicted
        };

        if let Some(job) = evicted {
            let error = EngineError::CapacityExceeded {
                capacity: self.capacity,
            };
            warn!(tool = %job.task.tool_name, capacity = self.capacity, "Queue full, evicted pending task");
            let _ = job
                .reply
                .send(TaskResult::failure(&job.task, error.to_string(), job.enqueued_at.elapsed()));
        }

        self.notify.notify_one();
        Ok(rx)
    }

    fn pop(&self) -> Option<Job> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .pop()
    }

    pub fn set_worker_limit(&self, limit: usize) {
        let limit = limit.max(1);
        let previous = self.worker_limit.swap(limit, Ordering::SeqCst);
        if previous != limit {
            info!(previous, limit, "Worker limit changed");
            self.notify.notify_one();
        }
    }

    pub fn worker_limit(&self) -> usize {
        self.worker_limit.load(Ordering::SeqCst)
    }

    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).heap.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether new tasks are still accepted
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub fn probe(&self) -> QueueProbe {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        QueueProbe {
            pending: queue.heap.len(),
            oldest_pending_age: queue.heap.iter().map(|j| j.enqueued_at.elapsed()).max(),
            worker_limit: self.worker_limit(),
        }
    }

    /// Dispatch loop. Returns after `shutdown` is cancelled and every
    /// in-flight task has finished on its own.
    pub async fn run(self: Arc<Self>, worker: Arc<Worker>, shutdown: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        info!(worker_limit = self.worker_limit(), "Dispatcher started");

        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                reap(joined);
            }

            while in_flight.len() < self.worker_limit() {
                let Some(job) = self.pop() else { break };

                self.active.fetch_add(1, Ordering::SeqCst);
                let this = Arc::clone(&self);
                let worker = Arc::clone(&worker);
                in_flight.spawn(async move {
                    let _guard = ActiveGuard(&this.active);
                    let result = worker.run(&job.task).await;
                    // Waiter may have gone away; the result is still recorded in stats
                    let _ = job.reply.send(result);
                });
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => reap(joined),
                _ = self.notify.notified() => {}
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        // Pending waiters observe a closed channel
        let dropped = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            let count = queue.heap.len();
            queue.heap.clear();
            count
        };
        if dropped > 0 {
            warn!(dropped, "Dropped pending tasks on shutdown");
        }

        if !in_flight.is_empty() {
            info!(count = in_flight.len(), "Waiting for in-flight tasks to finish");
            while let Some(joined) = in_flight.join_next().await {
                reap(joined);
            }
        }

        info!("Dispatcher stopped");
    }

    /// Stop accepting new tasks without waiting for the loop
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn reap(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Worker task panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;
    use crate::adapters::Executor;
    use crate::core::cache::ResultCache;
    use crate::core::failures::FailureLedger;
    use crate::core::stats::StatsCollector;
    use crate::domain::{Arguments, Priority, TaskKind};

    /// Records the order tools were executed in
    struct RecordingExecutor {
        order: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        fn name(&self) -> &str {
            "recording"
        }

        async fn execute(&self, tool_name: &str, _arguments: &Arguments) -> Result<String> {
            self.order.lock().unwrap().push(tool_name.to_string());
            Ok(String::new())
        }
    }

    fn action(tool: &str, priority: Priority) -> Task {
        Task::new(tool, Arguments::new(), TaskKind::Action, priority)
    }

    fn worker(executor: Arc<RecordingExecutor>) -> Arc<Worker> {
        Arc::new(Worker::new(
            executor,
            Arc::new(ResultCache::new(Duration::from_secs(60))),
            Arc::new(FailureLedger::default()),
            Arc::new(StatsCollector::default()),
        ))
    }

    #[test]
    fn test_heap_order() {
        let mut queue = PendingQueue::default();
        let tasks = [
            ("format_range", Priority::Cosmetic),
            ("read_a", Priority::Normal),
            ("write_range", Priority::Urgent),
            ("read_b", Priority::Normal),
        ];
        for (seq, (tool, priority)) in tasks.iter().enumerate() {
            let (reply, _rx) = oneshot::channel();
            queue.heap.push(Job {
                task: action(tool, *priority),
                seq: seq as u64,
                enqueued_at: Instant::now(),
                reply,
            });
        }

        let order: Vec<String> = std::iter::from_fn(|| queue.heap.pop())
            .map(|j| j.task.tool_name)
            .collect();
        assert_eq!(order, vec!["write_range", "read_a", "read_b", "format_range"]);
    }

    #[tokio::test]
    async fn test_dispatch_order_single_worker() {
        let executor = Arc::new(RecordingExecutor {
            order: StdMutex::new(Vec::new()),
        });
        let dispatcher = Arc::new(Dispatcher::new(1, 16));

        // Queue before the loop starts so ordering is decided by priority alone
        let receivers = vec![
            dispatcher.enqueue(action("autofit_columns", Priority::Cosmetic)).unwrap(),
            dispatcher.enqueue(action("create_table", Priority::Normal)).unwrap(),
            dispatcher.enqueue(action("write_range", Priority::Urgent)).unwrap(),
        ];

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            Arc::clone(&dispatcher).run(worker(executor.clone()), shutdown.clone()),
        );

        for rx in receivers {
            assert!(rx.await.unwrap().success);
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(
            *executor.order.lock().unwrap(),
            vec!["write_range", "create_table", "autofit_columns"]
        );
        assert!(!dispatcher.is_running());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_least_urgent() {
        let dispatcher = Dispatcher::new(1, 2);

        let cosmetic = dispatcher.enqueue(action("format_range", Priority::Cosmetic)).unwrap();
        let _urgent = dispatcher.enqueue(action("write_range", Priority::Urgent)).unwrap();
        let _normal = dispatcher.enqueue(action("create_table", Priority::Normal)).unwrap();

        assert_eq!(dispatcher.pending(), 2);
        let evicted = cosmetic.await.unwrap();
        assert!(!evicted.success);
        assert!(evicted.error.unwrap().contains("Capacity exceeded"));
    }

    #[tokio::test]
    async fn test_closed_dispatcher_rejects() {
        let dispatcher = Dispatcher::new(1, 2);
        dispatcher.close();
        let result = dispatcher.enqueue(action("write_range", Priority::Urgent));
        assert!(matches!(result, Err(EngineError::ShuttingDown)));
    }

    #[test]
    fn test_worker_limit_floor() {
        let dispatcher = Dispatcher::new(5, 2);
        dispatcher.set_worker_limit(0);
        assert_eq!(dispatcher.worker_limit(), 1);
        dispatcher.set_worker_limit(3);
        assert_eq!(dispatcher.probe().worker_limit, 3);
    }
}
