//! Engine Property Tests
//!
//! Whatever the sockets do and whenever timers fire, every started request
//! completes exactly once and leaves nothing registered or lent out.

#[path = "../common/mod.rs"]
mod common;

use std::io;

use proptest::prelude::*;

use aerowire::network::{Event, RequestId};
use aerowire::protocol::{Bin, Key, WriteParams, WritePolicy};

use common::{recorder, Harness, Plan, Seen, SocketScript};

fn error_kind() -> impl Strategy<Value = io::ErrorKind> {
    prop_oneof![
        Just(io::ErrorKind::ConnectionReset),
        Just(io::ErrorKind::BrokenPipe),
        Just(io::ErrorKind::ConnectionAborted),
    ]
}

fn reply_override() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        // A plausible frame with an arbitrary body
        proptest::collection::vec(any::<u8>(), 0..48).prop_map(|body| {
            let mut frame = vec![2, 3, 0, 0, 0, 0, 0, body.len() as u8];
            frame.extend(body);
            frame
        }),
        // A header the client must refuse
        (0u8..2, proptest::collection::vec(any::<u8>(), 7)).prop_map(|(version, rest)| {
            let mut frame = vec![version];
            frame.extend(rest);
            frame
        }),
    ]
}

fn script() -> impl Strategy<Value = SocketScript> {
    (
        proptest::option::of(1usize..16),
        proptest::option::of(1usize..16),
        proptest::option::weighted(0.2, error_kind()),
        proptest::option::weighted(0.2, error_kind()),
        any::<bool>(),
        proptest::bool::weighted(0.1),
        proptest::bool::weighted(0.2),
        proptest::option::weighted(0.15, reply_override()),
    )
        .prop_map(
            |(send_chunk, recv_chunk, send_error, recv_error, flaky, silent, close, reply)| {
                SocketScript {
                    send_chunk,
                    recv_chunk,
                    send_error,
                    recv_error,
                    flaky,
                    silent,
                    close_after_request: close,
                    reply_override: reply,
                }
            },
        )
}

fn plan() -> impl Strategy<Value = Plan> {
    prop_oneof![Just(Plan::Stale), Just(Plan::Unavailable)]
}

#[derive(Debug, Clone)]
struct Scenario {
    scripts: Vec<SocketScript>,
    plans: Vec<Plan>,
    policies: Vec<WritePolicy>,
    /// Rounds of readiness delivered before the timers fire
    fire_after: Option<usize>,
}

fn scenario() -> impl Strategy<Value = Scenario> {
    (
        proptest::collection::vec(script(), 0..6),
        proptest::collection::vec(plan(), 0..6),
        proptest::collection::vec(
            prop_oneof![Just(WritePolicy::Retry), Just(WritePolicy::OneShot)],
            1..5,
        ),
        proptest::option::of(0usize..40),
    )
        .prop_map(|(scripts, plans, policies, fire_after)| Scenario {
            scripts,
            plans,
            policies,
            fire_after,
        })
}

/// Deliver one round of readiness; false when nothing was ready
fn round(h: &mut Harness) -> bool {
    let events = h.world.borrow_mut().ready_events();
    let progressed = !events.is_empty();
    for event in events {
        h.engine.dispatch(event);
    }
    progressed
}

fn run(scenario: Scenario) -> Vec<Seen> {
    let mut h = Harness::new();
    h.cluster().scripts.extend(scenario.scripts);
    h.cluster().plans.extend(scenario.plans);

    let mut started: Vec<(RequestId, Seen)> = Vec::new();
    for (i, policy) in scenario.policies.into_iter().enumerate() {
        let (cb, seen) = recorder();
        let params = WriteParams::default().with_policy(policy);
        let id = h
            .engine
            .put("test", Key::new("", i as i64), vec![Bin::new("v", i as i64)], Some(params), 1000, cb)
            .unwrap();
        started.push((id, seen));
    }

    let limit = scenario.fire_after.unwrap_or(10_000);
    let mut rounds = 0;
    while rounds < limit {
        if !round(&mut h) {
            if h.engine.pending_len() == 0 || h.engine.drain_pending() == 0 {
                break;
            }
        }
        rounds += 1;
    }

    // Whatever is still outstanding times out
    for (id, _) in &started {
        h.engine.dispatch(Event::Timer(*id));
    }
    // Readiness arriving after the deadline changes nothing
    for (id, _) in &started {
        h.engine.dispatch(Event::Ready(*id));
    }

    assert_eq!(h.engine.in_flight(), 0);
    assert_eq!(h.engine.pending_len(), 0);
    h.world.borrow().assert_quiet();

    let stats = h.engine.stats();
    assert_eq!(stats.requests_completed(), started.len() as u64);

    started.into_iter().map(|(_, seen)| seen).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn every_request_completes_exactly_once(scenario in scenario()) {
        for seen in run(scenario) {
            prop_assert_eq!(seen.borrow().len(), 1);
        }
    }
}

#[test]
fn well_behaved_sockets_all_succeed() {
    let scenario = Scenario {
        scripts: Vec::new(),
        plans: Vec::new(),
        policies: vec![WritePolicy::Retry; 4],
        fire_after: None,
    };
    for seen in run(scenario) {
        assert!(seen.borrow()[0].result.is_ok());
    }
}
