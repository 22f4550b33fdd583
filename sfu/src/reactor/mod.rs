//! L0 concurrency substrate: single-threaded workers driven by a shared
//! epoll reactor, a hashed timing wheel for DTLS/RTCP/keyframe timers, and
//! a thread pool pairing each worker with an IO worker.
//!
//! Every [`crate::conn::PeerConnection`] is pinned to exactly one
//! [`Worker`] for its entire lifetime; all mutation of its state happens
//! on that worker's task queue. Cross-peer interaction is always a
//! `Worker::post` closure capturing weak references, never a lock.

pub mod reactor;
pub mod thread_pool;
pub mod timer_calendar;
pub mod worker;

pub use reactor::Reactor;
pub use thread_pool::{IoWorker, ThreadPool};
pub use timer_calendar::{ScheduledTaskReference, TimerCalendar};
pub use worker::Worker;
