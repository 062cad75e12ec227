//! Event loop driver
//!
//! Owns a current-thread tokio runtime and runs the engine's event loop on
//! the calling thread until a condition holds.

use std::time::Instant;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::engine::Engine;
use crate::error::Result;

use super::{StaticCluster, TokioReactor};

/// Engine wired to the concrete cluster and reactor
pub type TcpEngine = Engine<StaticCluster, TokioReactor>;

/// Single-threaded event loop
pub struct Driver {
    runtime: Runtime,
}

impl Driver {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime })
    }

    /// Handle for registering sockets with this driver's runtime
    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    /// Pump events into `engine` until `done` yields a value
    ///
    /// Every tend interval the cluster revives dun nodes and queued requests
    /// are retried. Returns `None` if the engine runs out of requests first.
    pub fn run_until<T>(&self, engine: &mut TcpEngine, mut done: impl FnMut() -> Option<T>) -> Option<T> {
        let poll_interval = engine.config().poll_interval();
        let tend_interval = engine.config().tend_interval();

        self.runtime.block_on(async {
            let mut last_tend = Instant::now();
            loop {
                if let Some(value) = done() {
                    return Some(value);
                }
                if engine.in_flight() == 0 {
                    return None;
                }

                let events = engine.reactor_mut().turn(poll_interval).await;
                for event in events {
                    engine.dispatch(event);
                }

                if last_tend.elapsed() >= tend_interval {
                    last_tend = Instant::now();
                    let revived = engine.cluster_mut().tend();
                    if revived > 0 || engine.pending_len() > 0 {
                        engine.drain_pending();
                    }
                }
            }
        })
    }

    /// Pump events until no request is left in flight
    pub fn run(&self, engine: &mut TcpEngine) {
        self.run_until(engine, || None::<()>);
    }
}
