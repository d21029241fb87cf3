use proptest::prelude::*;
use peerchat_protocol::topic::{
    control_topic, group_topic, is_control_topic, is_group_topic, is_presence_topic,
    presence_topic, session_topic, SessionTopic,
};
use peerchat_protocol::{MessageRouter, PeerId, RoutingAction};

/// Strategy for valid peer ids.
fn arb_peer_id() -> impl Strategy<Value = PeerId> {
    "[A-Za-z0-9.-]{1,16}".prop_filter_map("reserved id", |s| PeerId::new(s).ok())
}

proptest! {
    /// A derived session topic always parses back to its participants.
    #[test]
    fn session_topic_parses_back(
        a in arb_peer_id(),
        b in arb_peer_id(),
        ts in any::<u64>(),
    ) {
        let topic = session_topic(&a, &b, ts);
        let parsed = SessionTopic::parse(&topic).expect("parse");
        prop_assert_eq!(&parsed.first, &a);
        prop_assert_eq!(&parsed.second, &b);
        prop_assert_eq!(parsed.timestamp, ts);
        prop_assert!(parsed.includes(&a) && parsed.includes(&b));
    }

    /// Topics for different purposes never collide.
    #[test]
    fn topic_kinds_are_disjoint(peer in arb_peer_id(), name in "[a-z0-9]{1,12}") {
        let control = control_topic(&peer);
        let presence = presence_topic(&peer);
        let group = group_topic(&name);

        prop_assert!(is_control_topic(&control));
        prop_assert!(!is_presence_topic(&control));
        prop_assert!(is_presence_topic(&presence));
        prop_assert!(!is_control_topic(&presence));
        prop_assert!(is_group_topic(&group));
        prop_assert!(SessionTopic::parse(&control).is_none());
    }

    /// The router never restores a session it is not part of.
    #[test]
    fn restore_only_for_participants(
        me in arb_peer_id(),
        a in arb_peer_id(),
        b in arb_peer_id(),
        ts in any::<u64>(),
    ) {
        let topic = session_topic(&a, &b, ts);
        let chat = format!(r#"{{"type":"chat_message","from":"{a}","message":"hi","timestamp":1}}"#);
        let action = MessageRouter::new(me.clone()).route(&topic, chat.as_bytes(), false);
        let restored = matches!(action, RoutingAction::Restore { .. });
        prop_assert_eq!(restored, me == a || me == b);
    }

    /// Arbitrary bytes never make the router panic.
    #[test]
    fn router_survives_garbage(
        topic in "[A-Za-z_/0-9]{0,24}",
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let router = MessageRouter::new(PeerId::new("me").unwrap());
        let _ = router.route(&topic, &payload, false);
    }
}
