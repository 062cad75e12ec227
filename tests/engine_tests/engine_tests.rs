//! Tests for Engine
//!
//! These tests verify:
//! - Request round-trips against the in-memory server
//! - Retry and one-shot behaviour on network failure
//! - Timeouts, late events and the pending queue
//! - Partial I/O and malformed responses
//! - Resource ordering and statistics

#[path = "../common/mod.rs"]
mod common;

use std::io;
use std::thread;
use std::time::Duration;

use aerowire::engine::completion_channel;
use aerowire::network::{DunReason, Event, RequestId};
use aerowire::protocol::{Bin, Digest, Key, Operation, ResultCode, Value, WriteParams, WritePolicy};
use aerowire::AeroError;

use common::{find_bin, recorder, Entry, Harness, Plan, Seen, SocketScript};

// =============================================================================
// Helper Functions
// =============================================================================

const NS: &str = "test";

fn key() -> Key {
    Key::new("", 12345i64)
}

fn one_shot() -> Option<WriteParams> {
    Some(WriteParams::default().with_policy(WritePolicy::OneShot))
}

fn put_hello(h: &mut Harness, params: Option<WriteParams>, timeout_ms: u32) -> (RequestId, Seen) {
    let (cb, seen) = recorder();
    let id = h
        .engine
        .put(NS, key(), vec![Bin::new("v", "hello")], params, timeout_ms, cb)
        .unwrap();
    (id, seen)
}

// =============================================================================
// Round-trip Tests
// =============================================================================

#[test]
fn test_put_then_get_all() {
    let mut h = Harness::new();

    let (_, put) = put_hello(&mut h, None, 1000);
    h.pump();
    assert_eq!(put.borrow().len(), 1);
    assert_eq!(put.borrow()[0].result, ResultCode::Ok);

    let (cb, got) = recorder();
    h.engine.get_all(NS, key(), 1000, cb).unwrap();
    h.pump();

    let got = got.borrow();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].result, ResultCode::Ok);
    assert!(got[0].generation >= 1);
    assert_eq!(got[0].bins, vec![Bin::new("v", "hello")]);

    h.world.borrow().assert_quiet();
    let stats = h.engine.stats();
    assert_eq!(stats.requests_started, 2);
    assert_eq!(stats.requests_succeeded, 2);
    assert_eq!(stats.connections_created, 1);
    assert_eq!(stats.connections_destroyed, 0);
    assert_eq!(h.cluster().idle_count(), 1);
    assert_eq!(h.engine.in_flight(), 0);
}

#[test]
fn test_get_named_bins() {
    let mut h = Harness::new();
    let (cb, _) = recorder();
    let bins = vec![Bin::new("a", 1i64), Bin::new("b", "two"), Bin::new("c", Value::blob(vec![3u8]))];
    h.engine.put(NS, key(), bins, None, 1000, cb).unwrap();
    h.pump();

    let (cb, got) = recorder();
    h.engine.get(NS, key(), &["b", "c"], 1000, cb).unwrap();
    h.pump();

    let got = got.borrow();
    assert_eq!(got[0].bins.len(), 2);
    assert_eq!(find_bin(&got[0].bins, "b"), Some(&Value::from("two")));
    assert_eq!(find_bin(&got[0].bins, "a"), None);
}

#[test]
fn test_delete_then_not_found() {
    let mut h = Harness::new();
    put_hello(&mut h, None, 1000);
    h.pump();

    let (cb, deleted) = recorder();
    h.engine.delete(NS, key(), None, 1000, cb).unwrap();
    h.pump();
    assert_eq!(deleted.borrow()[0].result, ResultCode::Ok);

    let (cb, got) = recorder();
    h.engine.get_all(NS, key(), 1000, cb).unwrap();
    h.pump();
    assert_eq!(got.borrow()[0].result, ResultCode::NotFound);
    assert!(got.borrow()[0].bins.is_empty());
}

#[test]
fn test_operate_add_and_read() {
    let mut h = Harness::new();
    for _ in 0..2 {
        let (cb, _) = recorder();
        let ops = vec![Operation::add("count", 5)];
        h.engine.operate(NS, key(), ops, None, 1000, cb).unwrap();
        h.pump();
    }

    let (cb, got) = recorder();
    let ops = vec![Operation::add("count", -3), Operation::read("count")];
    h.engine.operate(NS, key(), ops, None, 1000, cb).unwrap();
    h.pump();

    let got = got.borrow();
    assert_eq!(got[0].result, ResultCode::Ok);
    assert_eq!(got[0].generation, 3);
    assert_eq!(find_bin(&got[0].bins, "count"), Some(&Value::Int(7)));
}

#[test]
fn test_generation_mismatch_reported() {
    let mut h = Harness::new();
    put_hello(&mut h, None, 1000);
    h.pump();

    let params = Some(WriteParams::default().with_generation(5));
    let (_, seen) = put_hello(&mut h, params, 1000);
    h.pump();
    assert_eq!(seen.borrow()[0].result, ResultCode::Generation);

    let params = Some(WriteParams::default().with_generation(1));
    let (_, seen) = put_hello(&mut h, params, 1000);
    h.pump();
    assert_eq!(seen.borrow()[0].result, ResultCode::Ok);
    assert_eq!(seen.borrow()[0].generation, 2);
}

#[test]
fn test_digest_key_reaches_same_record() {
    let mut h = Harness::new();
    let digest = Digest::compute("", &Value::Int(12345)).unwrap();

    let (cb, _) = recorder();
    h.engine
        .put(NS, Key::from_digest(digest), vec![Bin::new("v", "hello")], None, 1000, cb)
        .unwrap();
    h.pump();

    let (cb, got) = recorder();
    h.engine.get_all(NS, key(), 1000, cb).unwrap();
    h.pump();
    assert_eq!(got.borrow()[0].bins, vec![Bin::new("v", "hello")]);
}

#[test]
fn test_completion_channel_delivers_once() {
    let mut h = Harness::new();
    let (cb, rx) = completion_channel();
    h.engine.get_all(NS, key(), 1000, cb).unwrap();
    h.pump();

    let completion = rx.try_recv().unwrap();
    assert_eq!(completion.result, ResultCode::NotFound);
    assert!(rx.try_recv().is_err());
}

// =============================================================================
// Network Failure Tests
// =============================================================================

#[test]
fn test_one_shot_send_failure_never_retries() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        send_error: Some(io::ErrorKind::BrokenPipe),
        ..SocketScript::default()
    };

    let (_, seen) = put_hello(&mut h, one_shot(), 1000);
    h.pump();

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].result, ResultCode::Network);

    let world = h.world.borrow();
    world.assert_quiet();
    assert_eq!(world.count(|e| matches!(e, Entry::Acquire(..))), 1);
    assert_eq!(
        world.count(|e| matches!(e, Entry::Unhealthy(_, DunReason::NetworkError))),
        1
    );
    assert_eq!(world.count(|e| matches!(e, Entry::Destroy(_))), 1);
    drop(world);

    let stats = h.engine.stats();
    assert_eq!(stats.requests_restarted, 1);
    assert_eq!(stats.requests_failed, 1);
}

#[test]
fn test_retry_after_send_failure() {
    let mut h = Harness::new();
    h.cluster().scripts.push_back(SocketScript {
        send_error: Some(io::ErrorKind::ConnectionReset),
        ..SocketScript::default()
    });

    let (_, seen) = put_hello(&mut h, None, 1000);
    h.pump();

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].result, ResultCode::Ok);
    h.world.borrow().assert_quiet();

    let stats = h.engine.stats();
    assert_eq!(stats.requests_restarted, 2);
    assert_eq!(stats.connections_created, 2);
    assert_eq!(stats.connections_destroyed, 1);
}

#[test]
fn test_peer_close_mid_response() {
    let mut h = Harness::new();
    h.cluster().scripts.push_back(SocketScript {
        close_after_request: true,
        ..SocketScript::default()
    });
    let (_, seen) = put_hello(&mut h, one_shot(), 1000);
    h.pump();
    assert_eq!(seen.borrow()[0].result, ResultCode::Network);

    // A retrying read recovers on the next connection
    h.cluster().scripts.push_back(SocketScript {
        close_after_request: true,
        ..SocketScript::default()
    });
    let (cb, got) = recorder();
    h.engine.get_all(NS, key(), 1000, cb).unwrap();
    h.pump();
    assert_eq!(got.borrow()[0].result, ResultCode::NotFound);
    h.world.borrow().assert_quiet();
}

#[test]
fn test_recv_error_one_shot() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        recv_error: Some(io::ErrorKind::ConnectionAborted),
        ..SocketScript::default()
    };
    let (_, seen) = put_hello(&mut h, one_shot(), 1000);
    h.pump();
    assert_eq!(seen.borrow()[0].result, ResultCode::Network);
    h.world.borrow().assert_quiet();
}

#[test]
fn test_stale_pooled_connections_skipped() {
    let mut h = Harness::new();
    h.cluster().plans.extend([Plan::Stale, Plan::Stale]);

    let (_, seen) = put_hello(&mut h, None, 1000);
    h.pump();

    assert_eq!(seen.borrow()[0].result, ResultCode::Ok);
    let stats = h.engine.stats();
    assert_eq!(stats.connections_destroyed, 2);
    assert_eq!(stats.requests_restarted, 1);
}

// =============================================================================
// Pending Queue Tests
// =============================================================================

#[test]
fn test_no_node_queues_until_drained() {
    let mut h = Harness::with_nodes(Vec::new());
    let (_, seen) = put_hello(&mut h, None, 1000);
    h.pump();

    assert!(seen.borrow().is_empty());
    assert_eq!(h.engine.pending_len(), 1);
    assert_eq!(h.engine.in_flight(), 1);

    h.cluster().nodes.push(7);
    assert_eq!(h.engine.drain_pending(), 1);
    h.pump();

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].result, ResultCode::Ok);
    assert_eq!(h.engine.pending_len(), 0);
    assert_eq!(h.engine.stats().requests_restarted, 2);
    h.world.borrow().assert_quiet();
}

#[test]
fn test_unavailable_nodes_bounded_then_queued() {
    let mut h = Harness::new();
    h.cluster().plans.extend([Plan::Unavailable; 3]);

    let (_, seen) = put_hello(&mut h, None, 1000);
    assert!(seen.borrow().is_empty());
    assert_eq!(h.engine.pending_len(), 1);
    assert_eq!(
        h.world
            .borrow()
            .count(|e| matches!(e, Entry::Unhealthy(_, DunReason::RestartFd))),
        3
    );

    h.engine.drain_pending();
    h.pump();
    assert_eq!(seen.borrow()[0].result, ResultCode::Ok);
}

#[test]
fn test_timeout_while_queued() {
    let mut h = Harness::with_nodes(Vec::new());
    let (id, seen) = put_hello(&mut h, None, 50);
    h.fire_timer(id);

    assert_eq!(seen.borrow()[0].result, ResultCode::Timeout);
    assert_eq!(h.engine.pending_len(), 0);
    assert_eq!(h.engine.drain_pending(), 0);
    assert_eq!(seen.borrow().len(), 1);
    h.world.borrow().assert_quiet();
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[test]
fn test_timeout_then_late_readiness_is_noop() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        silent: true,
        ..SocketScript::default()
    };

    let (id, seen) = put_hello(&mut h, None, 1000);
    h.pump();
    assert!(seen.borrow().is_empty());

    h.fire_timer(id);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].result, ResultCode::Timeout);

    h.engine.dispatch(Event::Ready(id));
    h.engine.dispatch(Event::Timer(id));
    assert_eq!(seen.borrow().len(), 1);

    let world = h.world.borrow();
    world.assert_quiet();
    assert_eq!(
        world.count(|e| matches!(e, Entry::Unhealthy(_, DunReason::UserTimeout))),
        1
    );
    drop(world);

    let stats = h.engine.stats();
    assert_eq!(stats.requests_timed_out, 1);
    assert_eq!(stats.connections_destroyed_timeout, 1);
    assert_eq!(stats.connections_destroyed, 1);
}

#[test]
fn test_unwatch_precedes_destroy() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        silent: true,
        ..SocketScript::default()
    };
    let (id, _) = put_hello(&mut h, None, 1000);
    h.pump();
    h.fire_timer(id);

    let world = h.world.borrow();
    let unwatch = world.journal.iter().rposition(|e| *e == Entry::Unwatch(id)).unwrap();
    let destroy = world
        .journal
        .iter()
        .rposition(|e| matches!(e, Entry::Destroy(_)))
        .unwrap();
    let cancel = world.journal.iter().rposition(|e| *e == Entry::CancelTimer(id)).unwrap();
    assert!(cancel < destroy);
    assert!(unwatch < destroy);
}

#[test]
fn test_deadline_checked_on_retry() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        close_after_request: true,
        ..SocketScript::default()
    };

    let (_, seen) = put_hello(&mut h, None, 30);
    thread::sleep(Duration::from_millis(60));
    h.pump();

    assert_eq!(seen.borrow()[0].result, ResultCode::Timeout);
    let world = h.world.borrow();
    assert_eq!(world.count(|e| matches!(e, Entry::Acquire(..))), 1);
    world.assert_quiet();
}

#[test]
fn test_zero_timeout_arms_no_timer() {
    let mut h = Harness::new();
    let (_, seen) = put_hello(&mut h, None, 0);
    assert_eq!(h.world.borrow().count(|e| matches!(e, Entry::ArmTimer(_))), 0);
    h.pump();
    assert_eq!(seen.borrow()[0].result, ResultCode::Ok);
}

#[test]
fn test_server_timeout_normalized() {
    let mut h = Harness::new();
    h.server.borrow_mut().forced_result = Some(ResultCode::Timeout);

    let (_, seen) = put_hello(&mut h, None, 1000);
    h.pump();

    assert_eq!(seen.borrow()[0].result, ResultCode::Timeout);
    assert_eq!(seen.borrow()[0].result.code(), -2);
    assert_eq!(h.engine.stats().requests_timed_out, 1);
    assert_eq!(h.cluster().idle_count(), 1);
}

// =============================================================================
// Partial I/O and Parse Tests
// =============================================================================

#[test]
fn test_partial_io_resumes() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        send_chunk: Some(3),
        recv_chunk: Some(2),
        flaky: true,
        ..SocketScript::default()
    };

    let (_, seen) = put_hello(&mut h, None, 1000);
    let events = h.pump();
    assert!(events > 10);
    assert_eq!(seen.borrow()[0].result, ResultCode::Ok);

    let (cb, got) = recorder();
    h.engine.get_all(NS, key(), 1000, cb).unwrap();
    h.pump();
    assert_eq!(got.borrow()[0].bins, vec![Bin::new("v", "hello")]);
    h.world.borrow().assert_quiet();
}

#[test]
fn test_bad_frame_header_is_parse_failure() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        reply_override: Some(vec![1, 3, 0, 0, 0, 0, 0, 22]),
        ..SocketScript::default()
    };
    let (_, seen) = put_hello(&mut h, None, 1000);
    h.pump();

    assert_eq!(seen.borrow()[0].result, ResultCode::Parse);
    assert_eq!(h.world.borrow().count(|e| matches!(e, Entry::Destroy(_))), 1);
    h.world.borrow().assert_quiet();
}

#[test]
fn test_oversized_response_rejected() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        reply_override: Some(vec![2, 3, 0, 0, 0x10, 0, 0, 0]),
        ..SocketScript::default()
    };
    let (_, seen) = put_hello(&mut h, None, 1000);
    h.pump();
    assert_eq!(seen.borrow()[0].result, ResultCode::Parse);
    h.world.borrow().assert_quiet();
}

#[test]
fn test_undecodable_body_is_parse_failure() {
    let mut reply = vec![2, 3, 0, 0, 0, 0, 0, 5];
    reply.extend_from_slice(&[22, 0, 0, 0, 0]);
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        reply_override: Some(reply),
        ..SocketScript::default()
    };
    let (_, seen) = put_hello(&mut h, None, 1000);
    h.pump();

    assert_eq!(seen.borrow()[0].result, ResultCode::Parse);
    assert!(seen.borrow()[0].bins.is_empty());
    assert_eq!(h.engine.stats().requests_failed, 1);
    h.world.borrow().assert_quiet();
}

// =============================================================================
// Submission Error Tests
// =============================================================================

#[test]
fn test_encoding_error_is_synchronous() {
    let mut h = Harness::new();
    let (cb, seen) = recorder();
    let result = h.engine.put(NS, key(), vec![Bin::new("much_too_long_name", 1i64)], None, 1000, cb);

    assert!(matches!(result, Err(AeroError::Encoding(_))));
    assert!(seen.borrow().is_empty());
    assert_eq!(h.engine.stats().requests_started, 0);
    assert!(h.world.borrow().journal.is_empty());
}

#[test]
fn test_timer_failure_is_synchronous() {
    let mut h = Harness::new();
    h.world.borrow_mut().fail_timer = true;

    let (cb, seen) = recorder();
    let result = h.engine.get_all(NS, key(), 1000, cb);

    assert!(matches!(result, Err(AeroError::Timer(_))));
    assert!(seen.borrow().is_empty());
    assert_eq!(h.engine.in_flight(), 0);
    h.world.borrow().assert_quiet();
}

#[test]
fn test_watch_failure_completes_with_client_error() {
    let mut h = Harness::new();
    h.world.borrow_mut().fail_watch = true;

    let (_, seen) = put_hello(&mut h, None, 1000);

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].result, ResultCode::Client);
    assert_eq!(h.engine.in_flight(), 0);
    h.world.borrow().assert_quiet();
}

// =============================================================================
// Statistics Tests
// =============================================================================

#[test]
fn test_events_counted_per_dispatch() {
    let mut h = Harness::new();
    put_hello(&mut h, None, 1000);
    let delivered = h.pump();

    let stats = h.engine.stats();
    assert_eq!(stats.events, delivered as u64);
    assert!(stats.events_per_request() >= 2.0);
    assert_eq!(stats.requests_completed(), 1);
}

#[test]
fn test_timer_events_not_counted() {
    let mut h = Harness::new();
    h.cluster().default_script = SocketScript {
        silent: true,
        ..SocketScript::default()
    };
    let (id, seen) = put_hello(&mut h, None, 1000);
    let delivered = h.pump();

    h.fire_timer(id);
    h.fire_timer(id);
    assert_eq!(seen.borrow()[0].result, ResultCode::Timeout);

    let stats = h.engine.stats();
    assert_eq!(stats.events, delivered as u64);
    assert_eq!(stats.requests_timed_out, 1);
}
