//! Tokio-backed reactor
//!
//! Keeps readiness interests and deadlines as plain bookkeeping and waits on
//! all of them at once in [`TokioReactor::turn`]. Nothing is spawned, so the
//! reactor and every connection stay on the driver's thread.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{select_all, FutureExt};
use futures::task::noop_waker_ref;
use tokio::io::ReadBuf;
use tokio::net::TcpStream;
use tokio::time::{sleep_until, Instant};

use super::{Event, Interest, Reactor, RequestId, Socket};

/// A pooled TCP connection
///
/// The stream is shared with the reactor so it can wait on readiness while
/// the request keeps ownership of the connection.
#[derive(Debug)]
pub struct TcpConn {
    stream: Rc<TcpStream>,
}

impl TcpConn {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Rc::new(stream),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Whether an idle connection can no longer be used
    ///
    /// An idle connection has nothing to read. EOF, an error or unexpected
    /// buffered bytes all mean it must be discarded.
    pub fn is_stale(&self) -> bool {
        let mut scratch = [0u8; 1];
        let mut buf = ReadBuf::new(&mut scratch);
        let mut cx = Context::from_waker(noop_waker_ref());
        match self.stream.poll_peek(&mut cx, &mut buf) {
            Poll::Pending => false,
            Poll::Ready(_) => true,
        }
    }
}

impl Socket for TcpConn {
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }
}

/// Readiness and timers for [`TcpConn`]s
#[derive(Debug, Default)]
pub struct TokioReactor {
    watches: HashMap<RequestId, (Rc<TcpStream>, Interest)>,
    timers: HashMap<RequestId, Instant>,
}

impl TokioReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered readiness interests
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Number of armed timers
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Wait until something happens or `max_wait` passes
    ///
    /// Due timers are reported without waiting. A reported readiness interest
    /// is dropped. May return an empty list.
    pub async fn turn(&mut self, max_wait: Duration) -> Vec<Event> {
        let now = Instant::now();
        let due = self.take_due(now);
        if !due.is_empty() {
            return due;
        }

        let mut wake_at = now + max_wait;
        if let Some(deadline) = self.timers.values().min() {
            wake_at = wake_at.min(*deadline);
        }

        if self.watches.is_empty() {
            sleep_until(wake_at).await;
            return self.take_due(Instant::now());
        }

        let waits = self.watches.iter().map(|(&id, (stream, interest))| {
            let stream = Rc::clone(stream);
            let interest = *interest;
            async move {
                wait_ready(&stream, interest).await;
                id
            }
            .boxed_local()
        });

        let mut ready = Vec::new();
        tokio::select! {
            (first, _, rest) = select_all(waits) => {
                ready.push(first);
                ready.extend(rest.into_iter().filter_map(|wait| wait.now_or_never()));
            }
            _ = sleep_until(wake_at) => {}
        }

        ready.sort();
        let mut events: Vec<Event> = ready
            .into_iter()
            .map(|id| {
                self.watches.remove(&id);
                Event::Ready(id)
            })
            .collect();
        events.extend(self.take_due(Instant::now()));
        events
    }

    fn take_due(&mut self, now: Instant) -> Vec<Event> {
        let mut due: Vec<RequestId> = self
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        due.sort();
        for id in &due {
            self.timers.remove(id);
        }
        due.into_iter().map(Event::Timer).collect()
    }
}

async fn wait_ready(stream: &TcpStream, interest: Interest) {
    let interest = match interest {
        Interest::Read => tokio::io::Interest::READABLE,
        Interest::Write => tokio::io::Interest::WRITABLE,
    };
    // An error is reported as readiness; the next send/recv surfaces it.
    let _ = stream.ready(interest).await;
}

impl Reactor<TcpConn> for TokioReactor {
    fn watch(&mut self, id: RequestId, socket: &TcpConn, interest: Interest) -> io::Result<()> {
        self.watches.insert(id, (Rc::clone(&socket.stream), interest));
        Ok(())
    }

    fn unwatch(&mut self, id: RequestId) {
        self.watches.remove(&id);
    }

    fn arm_timer(&mut self, id: RequestId, after: Duration) -> io::Result<()> {
        let deadline = Instant::now().checked_add(after).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("timer of {:?} overflows the clock", after),
            )
        })?;
        self.timers.insert(id, deadline);
        Ok(())
    }

    fn cancel_timer(&mut self, id: RequestId) {
        self.timers.remove(&id);
    }
}
