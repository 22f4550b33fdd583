use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// Mask of interest/close events a registered handler cares about,
/// mirroring `RegisterHandler(handler, mask)` / `EPOLLERR|EPOLLHUP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerMask {
    pub readable: bool,
    pub writable: bool,
}

impl HandlerMask {
    pub const READ: HandlerMask = HandlerMask {
        readable: true,
        writable: false,
    };
    pub const WRITE: HandlerMask = HandlerMask {
        readable: false,
        writable: true,
    };
    pub const READ_WRITE: HandlerMask = HandlerMask {
        readable: true,
        writable: true,
    };

    fn interest(self) -> Interest {
        match (self.readable, self.writable) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => Interest::READABLE,
        }
    }
}

/// The reactor's notification to a registered handler for one readiness
/// event. `closed` is set on `EPOLLERR|EPOLLHUP`; the handler is removed
/// immediately afterward regardless of what it does with the event.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessEvent {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
    pub closed: bool,
}

/// Thin wrapper over an epoll instance (`mio::Poll` on Linux). Exactly one
/// handler may be registered per token; re-registering updates the
/// interest mask in place (`EPOLL_CTL_MOD`) rather than adding a second
/// registration.
pub struct Reactor {
    poll: Poll,
    next_token: usize,
    registered: HashMap<usize, HandlerMask>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Reactor {
            poll: Poll::new()?,
            next_token: 0,
            registered: HashMap::new(),
        })
    }

    /// Registers `source` for `mask`, returning the token used to look the
    /// handler back up out of `poll_once`'s events. Callers keep their own
    /// `source` alive for subsequent `modify`/`deregister` calls.
    pub fn register_handler(
        &mut self,
        source: &mut dyn mio::event::Source,
        mask: HandlerMask,
    ) -> io::Result<usize> {
        let token = self.next_token;
        self.next_token += 1;
        self.poll
            .registry()
            .register(source, Token(token), mask.interest())?;
        self.registered.insert(token, mask);
        Ok(token)
    }

    pub fn modify_handler(
        &mut self,
        source: &mut dyn mio::event::Source,
        token: usize,
        mask: HandlerMask,
    ) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(source, Token(token), mask.interest())?;
        self.registered.insert(token, mask);
        Ok(())
    }

    pub fn remove_handler(
        &mut self,
        source: &mut dyn mio::event::Source,
        token: usize,
    ) -> io::Result<()> {
        self.registered.remove(&token);
        self.poll.registry().deregister(source)
    }

    /// Blocks (bounded by `timeout`) for at least one readiness event,
    /// returning the set observed. An empty result means the timeout
    /// elapsed with nothing ready -- the caller should still tick its
    /// timer calendars.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<Vec<ReadinessEvent>> {
        let mut events = Events::with_capacity(256);
        self.poll.poll(&mut events, timeout)?;
        let mut out = Vec::with_capacity(events.iter().count());
        for ev in events.iter() {
            let token = ev.token().0;
            let closed = ev.is_error() || ev.is_read_closed() || ev.is_write_closed();
            if closed {
                self.registered.remove(&token);
            }
            out.push(ReadinessEvent {
                token,
                readable: ev.is_readable(),
                writable: ev.is_writable(),
                closed,
            });
        }
        Ok(out)
    }
}
