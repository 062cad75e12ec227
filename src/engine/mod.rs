//! Engine Module
//!
//! The request engine that drives every in-flight request.
//!
//! ## Responsibilities
//! - Encode commands and arm their deadlines
//! - Pick a node and borrow a connection for each attempt
//! - Resume partial sends and receives on readiness events
//! - Retry on network failure, or fail at once for one-shot writes
//! - Invoke each completion callback exactly once

mod request;
mod stats;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam::channel::{bounded, Receiver};

use crate::config::Config;
use crate::error::{AeroError, Result};
use crate::network::{Acquire, Cluster, DunReason, Event, Interest, Reactor, RequestId, Socket};
use crate::protocol::codec::PROTO_HEADER_SIZE;
use crate::protocol::{
    decode_proto_header, decode_response, encode_command, Bin, Command, Key, Operation,
    ResultCode, WriteParams, WritePolicy,
};

use request::{Attempt, Request, State};

pub use request::{Callback, Completion};
pub use stats::{Stats, StatsSnapshot};

/// Nodes tried per dispatch before the request is queued
const MAX_NODE_ATTEMPTS: usize = 3;

/// Closed pooled connections skipped per node before giving up on it
const MAX_STALE_RETRIES: usize = 8;

/// Dispatch attempts after which a request's churn is logged
const RESTART_WARN_ATTEMPTS: u32 = 10;

/// A callback that forwards its completion into a channel
///
/// For callers that would rather wait on a receiver than run code inside
/// the event loop.
pub fn completion_channel() -> (impl FnOnce(Completion) + 'static, Receiver<Completion>) {
    let (tx, rx) = bounded(1);
    let callback = move |completion: Completion| {
        // The receiver may be gone; the outcome is then simply dropped.
        let _ = tx.send(completion);
    };
    (callback, rx)
}

/// How a request left the wire
enum End {
    /// A complete response body was read
    Response(BytesMut),
    TimedOut,
    Failed(ResultCode),
}

/// Result of one non-blocking I/O step
enum Progress {
    /// Nothing more can happen until the socket is ready again
    Wait(Interest),
    /// The current phase is done
    Advance,
    /// The response body is complete
    Finished(BytesMut),
    /// The connection failed
    Broken(io::Error),
}

/// The request engine
///
/// ## Ownership
///
/// Each in-flight request lives in `requests` while it waits for an event.
/// A dispatch takes it out of the map, works on it and either puts it back
/// or completes it. An event for an id that is not in the map belongs to a
/// request that already completed and is ignored.
///
/// Requests that could not get a node or connection wait in `pending`
/// (still in `requests`, in `AwaitingNode`) until [`Engine::drain_pending`].
pub struct Engine<C: Cluster, R: Reactor<C::Conn>> {
    config: Config,
    cluster: C,
    reactor: R,

    requests: HashMap<RequestId, Request<C>>,
    pending: VecDeque<RequestId>,
    next_id: u64,

    stats: Arc<Stats>,
}

impl<C: Cluster, R: Reactor<C::Conn>> Engine<C, R> {
    pub fn new(config: Config, cluster: C, reactor: R) -> Self {
        Self {
            config,
            cluster,
            reactor,
            requests: HashMap::new(),
            pending: VecDeque::new(),
            next_id: 1,
            stats: Arc::new(Stats::default()),
        }
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Read every bin of a record
    pub fn get_all(
        &mut self,
        namespace: &str,
        key: Key,
        timeout_ms: u32,
        callback: impl FnOnce(Completion) + 'static,
    ) -> Result<RequestId> {
        let command = Command::get_all(namespace, key).with_timeout_ms(timeout_ms);
        self.submit(command, callback)
    }

    /// Read the named bins of a record
    pub fn get<S: AsRef<str>>(
        &mut self,
        namespace: &str,
        key: Key,
        bin_names: &[S],
        timeout_ms: u32,
        callback: impl FnOnce(Completion) + 'static,
    ) -> Result<RequestId> {
        let command = Command::get(namespace, key, bin_names).with_timeout_ms(timeout_ms);
        self.submit(command, callback)
    }

    /// Write bins to a record
    pub fn put(
        &mut self,
        namespace: &str,
        key: Key,
        bins: Vec<Bin>,
        params: Option<WriteParams>,
        timeout_ms: u32,
        callback: impl FnOnce(Completion) + 'static,
    ) -> Result<RequestId> {
        let command = with_params(Command::put(namespace, key, bins), params);
        self.submit(command.with_timeout_ms(timeout_ms), callback)
    }

    /// Remove a record
    pub fn delete(
        &mut self,
        namespace: &str,
        key: Key,
        params: Option<WriteParams>,
        timeout_ms: u32,
        callback: impl FnOnce(Completion) + 'static,
    ) -> Result<RequestId> {
        let command = with_params(Command::delete(namespace, key), params);
        self.submit(command.with_timeout_ms(timeout_ms), callback)
    }

    /// Apply a mix of reads, writes and adds to one record
    pub fn operate(
        &mut self,
        namespace: &str,
        key: Key,
        ops: Vec<Operation>,
        params: Option<WriteParams>,
        timeout_ms: u32,
        callback: impl FnOnce(Completion) + 'static,
    ) -> Result<RequestId> {
        let command = with_params(Command::operate(namespace, key, ops), params);
        self.submit(command.with_timeout_ms(timeout_ms), callback)
    }

    /// Start a request
    ///
    /// The command's `timeout_ms` is both the local deadline and the server
    /// transaction timeout; 0 means no deadline.
    ///
    /// An `Err` means nothing was started and `callback` will never run.
    /// Otherwise `callback` runs exactly once, from a later
    /// [`dispatch`](Self::dispatch) or from this call if the request fails
    /// right away.
    pub fn submit(
        &mut self,
        command: Command,
        callback: impl FnOnce(Completion) + 'static,
    ) -> Result<RequestId> {
        let (wire, digest) = encode_command(&command)?;

        let id = RequestId(self.next_id);
        self.next_id += 1;

        let now = Instant::now();
        let timeout_ms = u64::from(command.timeout_ms);
        let deadline = if timeout_ms == 0 {
            tracing::info!("Request {} has no timeout", id.0);
            None
        } else {
            if timeout_ms > self.config.long_timeout_warn_ms {
                tracing::info!("Request {} has a long timeout of {} ms", id.0, timeout_ms);
            }
            let after = Duration::from_millis(timeout_ms);
            self.reactor
                .arm_timer(id, after)
                .map_err(|e| AeroError::Timer(format!("request {}: {}", id.0, e)))?;
            Some(now + after)
        };

        self.stats.started();
        tracing::trace!(
            "Request {} started: {:?} on {} ({} bytes)",
            id.0,
            command.kind,
            command.namespace,
            wire.len()
        );

        let request = Request {
            id,
            namespace: command.namespace.clone(),
            digest,
            is_write: command.is_write(),
            policy: command.write_policy(),
            wire,
            started: now,
            attempts: 0,
            deadline,
            state: State::AwaitingNode,
            callback: Box::new(callback),
        };
        self.restart(request);
        Ok(id)
    }

    /// Handle one reactor event
    pub fn dispatch(&mut self, event: Event) {
        if let Event::Ready(_) = event {
            self.stats.event();
        }
        let begin = Instant::now();

        match event {
            Event::Ready(id) => self.on_ready(id),
            Event::Timer(id) => self.on_timer(id),
        }

        let elapsed = begin.elapsed();
        if elapsed > Duration::from_millis(self.config.slow_event_warn_ms) {
            tracing::warn!("Slow dispatch of {:?}: {:?}", event, elapsed);
        }
    }

    /// Retry every queued request
    ///
    /// Call when topology or node health changes. Requests that still find
    /// no node are queued again. Returns how many were retried.
    pub fn drain_pending(&mut self) -> usize {
        let queued: Vec<RequestId> = self.pending.drain(..).collect();
        let mut retried = 0;
        for id in queued {
            if let Some(request) = self.requests.remove(&id) {
                retried += 1;
                self.restart(request);
            }
        }
        if retried > 0 {
            tracing::debug!("Retried {} queued requests", retried);
        }
        retried
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, readable from other threads
    pub fn stats_handle(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Requests not yet completed
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    /// Requests waiting for a node
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn log_stats(&self) {
        let snap = self.stats();
        tracing::info!(
            "Requests: {} started, {} attempts, {} ok, {} timed out, {} failed",
            snap.requests_started,
            snap.requests_restarted,
            snap.requests_succeeded,
            snap.requests_timed_out,
            snap.requests_failed
        );
        tracing::info!(
            "Connections: {} created, {} destroyed ({} by timeout)",
            snap.connections_created,
            snap.connections_destroyed,
            snap.connections_destroyed_timeout
        );
        tracing::info!(
            "Events: {} ({:.2} per request), {} in flight, {} queued",
            snap.events,
            snap.events_per_request(),
            self.in_flight(),
            self.pending_len()
        );
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn cluster_mut(&mut self) -> &mut C {
        &mut self.cluster
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    pub fn reactor_mut(&mut self) -> &mut R {
        &mut self.reactor
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Find a node and connection and start writing
    ///
    /// Tries up to `MAX_NODE_ATTEMPTS` nodes, then queues the request.
    fn restart(&mut self, mut request: Request<C>) {
        self.stats.restarted();
        request.attempts += 1;
        if request.attempts == RESTART_WARN_ATTEMPTS {
            tracing::warn!("Request {} restarted {} times", request.id.0, request.attempts);
        }

        if request.expired(Instant::now()) {
            tracing::debug!("Request {} past its deadline on restart", request.id.0);
            self.complete(request, End::TimedOut);
            return;
        }

        for attempt in 1..=MAX_NODE_ATTEMPTS {
            let Some(node) =
                self.cluster
                    .resolve_node(&request.namespace, &request.digest, request.is_write)
            else {
                break;
            };

            match self.acquire(&node) {
                Some(conn) => {
                    request.state = State::Writing {
                        io: Attempt { node, conn },
                        written: 0,
                    };
                    self.rewatch(request, Interest::Write);
                    return;
                }
                None => {
                    tracing::debug!(
                        "Request {}: no connection to {:?} (attempt {})",
                        request.id.0,
                        node,
                        attempt
                    );
                    self.cluster.mark_unhealthy(&node, DunReason::RestartFd);
                }
            }
        }

        tracing::debug!("Request {} queued until a node is available", request.id.0);
        self.pending.push_back(request.id);
        self.requests.insert(request.id, request);
    }

    fn acquire(&mut self, node: &C::Node) -> Option<C::Conn> {
        for _ in 0..MAX_STALE_RETRIES {
            match self.cluster.acquire_connection(node) {
                Acquire::Ready { conn, fresh } => {
                    if fresh {
                        self.stats.connection_created();
                    }
                    return Some(conn);
                }
                Acquire::Stale => self.stats.connection_destroyed(),
                Acquire::Unavailable => return None,
            }
        }
        tracing::warn!("Too many stale connections to {:?}", node);
        None
    }

    fn on_timer(&mut self, id: RequestId) {
        let Some(request) = self.requests.remove(&id) else {
            tracing::debug!("Timer for finished request {}", id.0);
            return;
        };
        tracing::debug!("Request {} timed out while {}", id.0, request.state.name());
        self.complete(request, End::TimedOut);
    }

    fn on_ready(&mut self, id: RequestId) {
        let Some(mut request) = self.requests.remove(&id) else {
            tracing::debug!("Readiness for finished request {}", id.0);
            return;
        };
        if request.state.attempt().is_none() {
            tracing::debug!("Readiness for request {} with no connection", id.0);
            self.requests.insert(id, request);
            return;
        }

        loop {
            match step(&mut request) {
                Progress::Wait(interest) => {
                    self.rewatch(request, interest);
                    return;
                }
                Progress::Advance => {
                    let was_writing = matches!(request.state, State::Writing { .. });
                    if let Err(e) = advance(&mut request.state, self.config.max_response_size) {
                        tracing::warn!("Request {}: {}", id.0, e);
                        self.complete(request, End::Failed(ResultCode::Parse));
                        return;
                    }
                    if was_writing {
                        tracing::trace!("Request {} sent, awaiting response", id.0);
                        self.rewatch(request, Interest::Read);
                        return;
                    }
                    // Header done: the body may already be buffered.
                }
                Progress::Finished(body) => {
                    self.complete(request, End::Response(body));
                    return;
                }
                Progress::Broken(e) => {
                    self.network_failure(request, e);
                    return;
                }
            }
        }
    }

    /// Register interest and park the request until the next event
    fn rewatch(&mut self, request: Request<C>, interest: Interest) {
        let watched = match request.state.attempt() {
            Some(io) => self.reactor.watch(request.id, &io.conn, interest),
            None => Ok(()),
        };
        match watched {
            Ok(()) => {
                self.requests.insert(request.id, request);
            }
            Err(e) => {
                tracing::warn!("Request {}: cannot register for {:?}: {}", request.id.0, interest, e);
                self.complete(request, End::Failed(ResultCode::Client));
            }
        }
    }

    fn network_failure(&mut self, mut request: Request<C>, error: io::Error) {
        let id = request.id;
        let state = request.state.name();

        self.reactor.unwatch(id);
        if let Some(Attempt { node, conn }) = request.state.take_attempt() {
            self.cluster.mark_unhealthy(&node, DunReason::NetworkError);
            self.cluster.destroy_connection(conn);
            self.stats.connection_destroyed();
        }

        match request.policy {
            WritePolicy::OneShot => {
                tracing::info!("One-shot request {} failed while {}: {}", id.0, state, error);
                self.complete(request, End::Failed(ResultCode::Network));
            }
            WritePolicy::Retry => {
                tracing::debug!("Request {} failed while {}, retrying: {}", id.0, state, error);
                self.restart(request);
            }
        }
    }

    /// Release everything the request holds and run its callback
    fn complete(&mut self, mut request: Request<C>, end: End) {
        let id = request.id;

        // Registrations go before the connection is handed back or closed.
        self.reactor.cancel_timer(id);
        self.reactor.unwatch(id);

        if let Some(Attempt { node, conn }) = request.state.take_attempt() {
            match end {
                End::Response(_) => {
                    self.cluster.mark_healthy(&node);
                    self.cluster.release_connection(&node, conn);
                }
                End::TimedOut => {
                    self.cluster.mark_unhealthy(&node, DunReason::UserTimeout);
                    self.cluster.destroy_connection(conn);
                    self.stats.connection_destroyed_by_timeout();
                }
                End::Failed(_) => {
                    self.cluster.destroy_connection(conn);
                    self.stats.connection_destroyed();
                }
            }
        }
        if matches!(end, End::TimedOut) {
            self.pending.retain(|queued| *queued != id);
        }

        let completion = match end {
            End::Response(body) => match decode_response(&body.freeze()) {
                Ok(response) => Completion {
                    result: response.result_code,
                    bins: response.bins,
                    generation: response.generation,
                },
                Err(e) => {
                    tracing::warn!("Request {}: undecodable response: {}", id.0, e);
                    Completion::failure(ResultCode::Parse)
                }
            },
            End::TimedOut => Completion::failure(ResultCode::Timeout),
            End::Failed(code) => Completion::failure(code),
        };

        match completion.result {
            ResultCode::Timeout => self.stats.timed_out(),
            ResultCode::Client | ResultCode::Network | ResultCode::Parse => self.stats.failed(),
            _ => self.stats.succeeded(),
        }

        tracing::trace!(
            "Request {} complete: {:?} after {:?}",
            id.0,
            completion.result,
            request.started.elapsed()
        );
        (request.callback)(completion);
    }
}

fn with_params(command: Command, params: Option<WriteParams>) -> Command {
    match params {
        Some(params) => command.with_write_params(params),
        None => command,
    }
}

fn retryable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// One non-blocking send or receive for the current state
fn step<C: Cluster>(request: &mut Request<C>) -> Progress {
    let id = request.id;
    let wire = &request.wire;
    match &mut request.state {
        State::AwaitingNode => Progress::Wait(Interest::Write),

        State::Writing { io, written } => match io.conn.try_send(&wire[*written..]) {
            Ok(0) => Progress::Broken(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                *written += n;
                tracing::trace!("Request {}: sent {}/{}", id.0, written, wire.len());
                if *written == wire.len() {
                    Progress::Advance
                } else {
                    Progress::Wait(Interest::Write)
                }
            }
            Err(e) if retryable(&e) => Progress::Wait(Interest::Write),
            Err(e) => Progress::Broken(e),
        },

        State::ReadingHeader { io, header, filled } => match io.conn.try_recv(&mut header[*filled..]) {
            Ok(0) => Progress::Broken(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                *filled += n;
                if *filled == PROTO_HEADER_SIZE {
                    Progress::Advance
                } else {
                    Progress::Wait(Interest::Read)
                }
            }
            Err(e) if retryable(&e) => Progress::Wait(Interest::Read),
            Err(e) => Progress::Broken(e),
        },

        State::ReadingBody { io, body, filled } => {
            if *filled == body.len() {
                return Progress::Finished(std::mem::take(body));
            }
            match io.conn.try_recv(&mut body[*filled..]) {
                Ok(0) => Progress::Broken(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    *filled += n;
                    tracing::trace!("Request {}: read {}/{}", id.0, filled, body.len());
                    if *filled == body.len() {
                        Progress::Finished(std::mem::take(body))
                    } else {
                        Progress::Wait(Interest::Read)
                    }
                }
                Err(e) if retryable(&e) => Progress::Wait(Interest::Read),
                Err(e) => Progress::Broken(e),
            }
        }
    }
}

/// Move to the next phase once the current one is done
///
/// A header that cannot be accepted leaves the state untouched.
fn advance<C: Cluster>(state: &mut State<C>, max_response_size: usize) -> Result<()> {
    let next = match std::mem::replace(state, State::AwaitingNode) {
        State::Writing { io, .. } => State::ReadingHeader {
            io,
            header: [0; PROTO_HEADER_SIZE],
            filled: 0,
        },
        State::ReadingHeader { io, header, filled } => {
            let checked = decode_proto_header(&header)
                .and_then(|proto| proto.validate(max_response_size).map(|()| proto));
            match checked {
                Ok(proto) => State::ReadingBody {
                    io,
                    body: BytesMut::zeroed(proto.size),
                    filled: 0,
                },
                Err(e) => {
                    *state = State::ReadingHeader { io, header, filled };
                    return Err(e);
                }
            }
        }
        other => other,
    };
    *state = next;
    Ok(())
}
