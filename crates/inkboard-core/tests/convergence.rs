mod common;

use std::time::{Duration, Instant};

use common::{board, draw_stroke, settle, Relay};
use inkboard_core::{
    Appended, BoardConfig, BoardEvent, DrawingLog, LogEntry, ParticipantId, Point, ResyncState, Rgb, Stamp, Stroke,
    StrokeId, Tool,
};

fn stroke_entry(participant: &str, clock: u64) -> LogEntry {
    let stroke = Stroke::from_parts(
        StrokeId { participant: participant.into(), seq: clock },
        Tool::Pen,
        Rgb::black(),
        1.0,
        vec![Point::new(clock as f64, 0.0, clock)],
    )
    .unwrap();
    LogEntry::new(Stamp::new(clock, participant.into()), BoardEvent::Stroke(stroke))
}

fn stamps(log: &DrawingLog) -> Vec<(u64, String)> {
    log.entries()
        .iter()
        .map(|entry| (entry.stamp.clock, entry.stamp.participant.to_string()))
        .collect()
}

#[test]
fn interleavings_converge() {
    let a = [stroke_entry("a", 1), stroke_entry("a", 2), stroke_entry("a", 5)];
    let b = [stroke_entry("b", 1), stroke_entry("b", 3)];
    let c = [stroke_entry("c", 2), stroke_entry("c", 4)];

    // Each participant's events keep their own order; the interleaving differs.
    let first: Vec<LogEntry> = a.iter().chain(&b).chain(&c).cloned().collect();
    let second: Vec<LogEntry> = vec![
        c[0].clone(),
        b[0].clone(),
        c[1].clone(),
        a[0].clone(),
        b[1].clone(),
        a[1].clone(),
        a[2].clone(),
    ];

    let mut left = DrawingLog::new("x".into());
    let mut right = DrawingLog::new("y".into());
    for entry in first {
        left.append_remote(entry).unwrap();
    }
    for entry in second {
        right.append_remote(entry).unwrap();
    }

    assert_eq!(left.entries(), right.entries());
    assert_eq!(left.clocks(), right.clocks());
    assert_eq!(
        stamps(&left),
        vec![
            (1, "a".to_string()),
            (1, "b".to_string()),
            (2, "a".to_string()),
            (2, "c".to_string()),
            (3, "b".to_string()),
            (4, "c".to_string()),
            (5, "a".to_string()),
        ]
    );
}

#[test]
fn redelivery_does_not_diverge() {
    let mut log = DrawingLog::new("x".into());
    let entry = stroke_entry("a", 1);
    log.append_remote(entry.clone()).unwrap();
    assert_eq!(log.append_remote(entry).unwrap(), Appended::Duplicate { position: 0 });
    assert_eq!(log.len(), 1);
}

#[test]
fn concurrent_first_strokes_order_by_participant() {
    let now = Instant::now();
    let mut relay = Relay::new();
    let (mut alice, alice_link) = board("A", BoardConfig::default());
    let (mut bob, bob_link) = board("B", BoardConfig::default());
    relay.attach(alice_link);
    relay.attach(bob_link);

    // Both draw before hearing from each other.
    draw_stroke(&mut alice, 10.0, now);
    draw_stroke(&mut bob, 20.0, now);

    alice.connect("standup", now).unwrap();
    bob.connect("standup", now).unwrap();
    settle(&mut relay, &mut [&mut alice, &mut bob], now);

    let expected = vec![(1, "A".to_string()), (1, "B".to_string())];
    assert_eq!(stamps(alice.log()), expected);
    assert_eq!(stamps(bob.log()), expected);
    assert_eq!(stamps(relay.log()), expected);
}

#[test]
fn live_sessions_converge() {
    let now = Instant::now();
    let mut relay = Relay::new();
    let (mut alice, alice_link) = board("alice", BoardConfig::default());
    let (mut bob, bob_link) = board("bob", BoardConfig::default());
    relay.attach(alice_link);
    relay.attach(bob_link);
    alice.connect("room", now).unwrap();
    bob.connect("room", now).unwrap();
    settle(&mut relay, &mut [&mut alice, &mut bob], now);
    assert!(alice.peers().contains(&ParticipantId::new("bob")));

    for round in 0..5 {
        draw_stroke(&mut alice, round as f64 * 10.0, now);
        draw_stroke(&mut bob, round as f64 * 10.0 + 5.0, now);
        if round == 2 {
            bob.clear(now).unwrap();
        }
        // Deliver only every other round so events pile up concurrently.
        if round % 2 == 1 {
            settle(&mut relay, &mut [&mut alice, &mut bob], now);
        }
    }
    settle(&mut relay, &mut [&mut alice, &mut bob], now);

    assert_eq!(alice.log().len(), 11);
    assert_eq!(alice.log().entries(), bob.log().entries());
    assert_eq!(
        alice.surface().visible_segments(),
        bob.surface().visible_segments()
    );
}

#[test]
fn live_event_ahead_of_resync_reply_converges() {
    let start = Instant::now();
    let mut relay = Relay::new();
    let (mut bob, bob_link) = board("bob", BoardConfig::default());
    let (mut alice, alice_link) = board("alice", BoardConfig::default());
    let alice_far = alice_link.clone();
    // Bob is served first, so his publish is relayed ahead of Alice's resync reply.
    relay.attach(bob_link);
    relay.attach(alice_link);
    alice.connect("room", start).unwrap();
    bob.connect("room", start).unwrap();
    settle(&mut relay, &mut [&mut alice, &mut bob], start);

    alice_far.drop_connection();
    alice.pump(start);
    draw_stroke(&mut bob, 1.0, start);
    draw_stroke(&mut bob, 2.0, start);
    settle(&mut relay, &mut [&mut bob], start);

    // Alice rejoins and asks for what she missed.
    let later = start + Duration::from_secs(1);
    alice.pump(later);
    relay.serve();
    alice.pump(later);
    assert_eq!(alice.resync_state(), ResyncState::Requested);

    draw_stroke(&mut bob, 3.0, later);
    bob.pump(later);
    relay.serve();
    alice.pump(later);
    assert_eq!(alice.resync_state(), ResyncState::Settled);
    assert_eq!(alice.log().len(), 3);

    settle(&mut relay, &mut [&mut alice, &mut bob], later);
    assert_eq!(alice.log().entries(), bob.log().entries());
    assert_eq!(relay.log().entries(), bob.log().entries());
    assert_eq!(alice.surface().visible_segments(), bob.surface().visible_segments());
}
