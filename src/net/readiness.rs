//! Bounded socket readiness waits.
//!
//! One `Readiness` instance per connection or listener, registered once.
//! Every suspension point in the transport performs a single bounded wait
//! here, and the outcome is a first-class value: ready, timed out, or
//! interrupted by a signal. Callers always drain the socket to
//! would-block before waiting, which is what the edge-style notifications
//! require.

use std::io;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

const WAIT_TOKEN: Token = Token(0);

/// Which readiness the caller is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Outcome of one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    Ready,
    TimedOut,
    Interrupted,
}

pub(crate) struct Readiness {
    poll: Poll,
    events: Events,
}

impl Readiness {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
        })
    }

    /// Register a stream for both directions. Called once, right after
    /// the descriptor is switched to non-blocking mode.
    pub(crate) fn register(&mut self, source: &mut impl Source) -> io::Result<()> {
        self.poll
            .registry()
            .register(source, WAIT_TOKEN, Interest::READABLE | Interest::WRITABLE)
    }

    /// Register a listening socket; only accept-readiness matters.
    pub(crate) fn register_readable(&mut self, source: &mut impl Source) -> io::Result<()> {
        self.poll
            .registry()
            .register(source, WAIT_TOKEN, Interest::READABLE)
    }

    /// Wait until the registered descriptor is ready in `direction`, the
    /// timeout expires, or a signal interrupts the wait.
    pub(crate) fn wait(&mut self, direction: Direction, timeout: Duration) -> io::Result<Wait> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.poll.poll(&mut self.events, Some(remaining)) {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                    return Ok(Wait::Interrupted);
                }
                Err(err) => return Err(err),
            }
            if self.events.is_empty() {
                return Ok(Wait::TimedOut);
            }
            for event in self.events.iter() {
                let ready = match direction {
                    Direction::Read => {
                        event.is_readable() || event.is_read_closed() || event.is_error()
                    }
                    Direction::Write => {
                        event.is_writable() || event.is_write_closed() || event.is_error()
                    }
                };
                if ready {
                    return Ok(Wait::Ready);
                }
            }
            // Readiness fired for the other direction only; keep waiting
            // out the remaining time.
        }
    }
}
