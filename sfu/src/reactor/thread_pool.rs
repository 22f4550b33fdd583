use crate::reactor::reactor::Reactor;
use crate::reactor::worker::{Worker, WorkerPool};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An IO worker runs its own event loop; in this implementation that loop
/// is the shared [`super::Reactor`]'s epoll instance, registered with
/// `mio::Token(index)` so IO completions re-enter the paired `Worker` by
/// index (§4.1: "IO workers and workers are paired by index so that a
/// peer's ICE and task processing share a clock reference").
pub struct IoWorker {
    index: usize,
    reactor: Reactor,
}

impl IoWorker {
    pub fn new(index: usize) -> io::Result<Self> {
        Ok(IoWorker {
            index,
            reactor: Reactor::new()?,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn reactor_mut(&mut self) -> &mut Reactor {
        &mut self.reactor
    }
}

/// Owns `N` [`Worker`]s and `N` paired [`IoWorker`]s. This is the single
/// global allocation performed by `Agent::open` (§6 `Open(num_workers, ...)`).
pub struct ThreadPool {
    workers: WorkerPool,
    io_workers: Vec<IoWorker>,
}

impl ThreadPool {
    pub fn new(num_workers: usize) -> Self {
        let io_workers = (0..num_workers)
            .map(|index| IoWorker::new(index).expect("failed to create epoll instance"))
            .collect();
        ThreadPool {
            workers: WorkerPool::new(num_workers),
            io_workers,
        }
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn io_worker(&self, index: usize) -> Option<&IoWorker> {
        self.io_workers.get(index)
    }

    pub fn least_loaded(&self) -> &Arc<Worker> {
        self.workers.least_loaded()
    }

    /// Drives one tick of the whole engine (§4.1/§5): polls every paired
    /// IO worker's reactor (bounded by `timeout`, so a caller with
    /// nothing registered yet still returns promptly) and then drains
    /// every worker's task queue and timer calendar. An embedding
    /// application calls this in its own loop; nothing in this crate
    /// spawns OS threads of its own.
    pub fn poll_once(&mut self, now: Instant, timeout: Duration) -> io::Result<()> {
        for io_worker in &mut self.io_workers {
            io_worker.reactor_mut().poll_once(Some(timeout))?;
        }
        self.workers.drain_all(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn poll_once_drains_posted_work() {
        let mut pool = ThreadPool::new(1);
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = flag.clone();
        pool.least_loaded()
            .post(move || flag2.store(true, Ordering::SeqCst));
        pool.poll_once(Instant::now(), Duration::from_millis(1)).unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
