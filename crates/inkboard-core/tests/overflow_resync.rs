mod common;

use std::time::{Duration, Instant};

use common::{board, draw_stroke, replay, settle, Relay};
use inkboard_core::{BoardConfig, ConnectionState, MemoryLink, ResyncState};

#[test]
fn overflow_recovers_through_resync() {
    let start = Instant::now();
    let mut relay = Relay::new();
    let (mut alice, alice_link) = board("alice", BoardConfig::default());
    let (mut bob, bob_link) = board("bob", BoardConfig::default());
    let alice_far: MemoryLink = alice_link.clone();
    relay.attach(alice_link);
    relay.attach(bob_link);
    alice.connect("room", start).unwrap();
    bob.connect("room", start).unwrap();
    settle(&mut relay, &mut [&mut alice, &mut bob], start);

    draw_stroke(&mut alice, 0.0, start);
    draw_stroke(&mut bob, 1.0, start);
    settle(&mut relay, &mut [&mut alice, &mut bob], start);

    // Alice loses the relay and keeps drawing.
    alice_far.drop_connection();
    alice_far.set_reachable(false);
    alice.pump(start);
    assert_eq!(alice.connection_state(), ConnectionState::Disconnected);

    for i in 0..500 {
        draw_stroke(&mut alice, 10.0 + i as f64, start);
    }
    assert_eq!(alice.channel().outbox_len(), 500);
    assert!(!alice.is_resync_pending());

    draw_stroke(&mut alice, 600.0, start);
    assert!(alice.is_resync_pending());
    assert_eq!(alice.channel().outbox_len(), 0);

    // Bob never disconnects and keeps drawing too.
    for i in 0..3 {
        draw_stroke(&mut bob, 700.0 + i as f64, start);
    }
    settle(&mut relay, &mut [&mut bob], start);

    // Failed reconnect attempts back off; then the relay is reachable again.
    let mut now = start;
    for _ in 0..3 {
        now += Duration::from_secs(1);
        alice.pump(now);
    }
    alice_far.set_reachable(true);
    for _ in 0..4 {
        now += Duration::from_secs(11);
        settle(&mut relay, &mut [&mut alice, &mut bob], now);
    }

    assert_eq!(alice.connection_state(), ConnectionState::Connected);
    assert!(!alice.is_resync_pending());
    assert_eq!(bob.log().len(), 2 + 501 + 3);
    assert_eq!(alice.log().entries(), bob.log().entries());
    assert_eq!(relay.log().entries(), bob.log().entries());
    assert_eq!(alice.surface().visible_segments(), bob.surface().visible_segments());
    assert_eq!(bob.surface().visible_segments(), replay(bob.log()).visible_segments());
}

#[test]
fn drawing_continues_after_overflow() {
    let start = Instant::now();
    let config = BoardConfig { max_outbound_queue: 5, ..BoardConfig::default() };
    let mut relay = Relay::new();
    let (mut alice, alice_link) = board("alice", config);
    let (mut bob, bob_link) = board("bob", BoardConfig::default());
    let alice_far = alice_link.clone();
    relay.attach(alice_link);
    relay.attach(bob_link);
    alice.connect("room", start).unwrap();
    bob.connect("room", start).unwrap();
    settle(&mut relay, &mut [&mut alice, &mut bob], start);

    draw_stroke(&mut bob, 1.0, start);
    settle(&mut relay, &mut [&mut alice, &mut bob], start);

    alice_far.drop_connection();
    alice.pump(start);
    for i in 0..6 {
        draw_stroke(&mut alice, 10.0 + i as f64, start);
    }
    assert_eq!(alice.resync_state(), ResyncState::Owed);

    // Strokes drawn after the overflow stay in the log until the resync.
    draw_stroke(&mut alice, 20.0, start);
    draw_stroke(&mut alice, 21.0, start);
    assert_eq!(alice.channel().outbox_len(), 0);
    assert_eq!(alice.log().len(), 1 + 8);

    draw_stroke(&mut bob, 30.0, start);
    settle(&mut relay, &mut [&mut bob], start);

    let later = start + Duration::from_secs(11);
    settle(&mut relay, &mut [&mut alice, &mut bob], later);

    assert_eq!(alice.resync_state(), ResyncState::Settled);
    assert_eq!(bob.log().len(), 2 + 8);
    assert_eq!(alice.log().entries(), bob.log().entries());
    assert_eq!(relay.log().entries(), bob.log().entries());
    assert_eq!(alice.surface().visible_segments(), bob.surface().visible_segments());
}

#[test]
fn stale_queue_overflows_by_age() {
    let start = Instant::now();
    let config = BoardConfig { max_queue_age_ms: 5_000, ..BoardConfig::default() };
    let (mut alice, _link) = board("alice", config);

    draw_stroke(&mut alice, 0.0, start);
    assert_eq!(alice.channel().outbox_len(), 1);

    alice.pump(start + Duration::from_secs(6));
    assert!(alice.is_resync_pending());
    assert_eq!(alice.channel().outbox_len(), 0);
}
