use proptest::prelude::*;

use lcap_types::{Nonce, PeerId, PollKey, Timestamp};

proptest! {
    /// Nonce hex roundtrip: to_hex -> from_hex produces the identical nonce.
    #[test]
    fn nonce_hex_roundtrip(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let nonce = Nonce::new(bytes.clone());
        let parsed = Nonce::from_hex(&nonce.to_hex()).unwrap();
        prop_assert_eq!(parsed.as_bytes(), &bytes[..]);
    }

    /// Poll keys are equal iff the challenges are equal.
    #[test]
    fn poll_key_injective(a in prop::collection::vec(any::<u8>(), 1..32),
                          b in prop::collection::vec(any::<u8>(), 1..32)) {
        let ka = PollKey::from_challenge(&Nonce::new(a.clone()));
        let kb = PollKey::from_challenge(&Nonce::new(b.clone()));
        prop_assert_eq!(ka == kb, a == b);
    }

    /// Timestamp ordering: new(a) <= new(b) iff a <= b.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::new(a);
        let tb = Timestamp::new(b);
        prop_assert_eq!(ta <= tb, a <= b);
        prop_assert_eq!(ta == tb, a == b);
    }

    /// plus/remaining_from agree for non-overflowing inputs.
    #[test]
    fn remaining_after_plus(start in 0u64..1u64 << 40, delta in 0u64..1u64 << 40) {
        let now = Timestamp::new(start);
        prop_assert_eq!(now.plus(delta).remaining_from(now), delta);
    }

    /// PeerId bincode serialization roundtrip.
    #[test]
    fn peer_id_bincode_roundtrip(raw in "[A-Za-z0-9:\\[\\].]{1,40}") {
        let id = PeerId::parse(&raw).unwrap();
        let encoded = bincode::serialize(&id).unwrap();
        let decoded: PeerId = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, id);
    }
}
