//! Shared fixtures for the poll engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use lcap_crypto::{random_nonce, DEFAULT_ALGORITHM};
use lcap_messages::{LcapMessage, MessageBody, MessageHeader, Opcode};
use lcap_nullables::{NullContentSource, NullIdentityManager, NullRandom, Simulation};
use lcap_poller::{EngineConfig, PollManager, PollSpec, AU_URL};
use lcap_types::time::{MINUTE, SECOND};
use lcap_types::{Nonce, PeerId, PollKind, ProtocolVersion, Timestamp};

pub const AU: &str = "au1";
pub const PLUGIN: &str = "org.example.SitePlugin";
pub const BASE: &str = "http://example.org";
pub const HASH_ESTIMATE: u64 = SECOND;

pub const PAGES: &[(&str, &str)] = &[
    ("a.html", "alpha"),
    ("b.html", "bravo"),
    ("c.html", "charlie"),
];

pub fn url(path: &str) -> String {
    format!("{BASE}/{path}")
}

/// Defaults with random verify polls switched off.
pub fn quiet_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.poll.agree_verify = 0.0;
    config.poll.disagree_verify = 0.0;
    config
}

pub fn v3_config() -> EngineConfig {
    let mut config = quiet_config();
    config.v3.quorum = 3;
    config
}

pub fn content_spec() -> PollSpec {
    PollSpec::new(AU, PLUGIN, BASE, PollKind::Content)
}

pub fn name_spec() -> PollSpec {
    PollSpec::new(AU, PLUGIN, BASE, PollKind::Name)
}

pub fn v3_spec() -> PollSpec {
    PollSpec::for_au(AU, PLUGIN, PollKind::Poller)
}

pub fn seed(content: &NullContentSource, pages: &[(&str, &str)]) {
    let au = content.add_au(AU, HASH_ESTIMATE);
    for (path, body) in pages {
        au.put(url(path), body.as_bytes().to_vec());
    }
}

/// A simulation of `names`, every node holding [`PAGES`].
pub fn network(config: EngineConfig, names: &[&str]) -> (Simulation, Vec<PeerId>) {
    let mut sim = Simulation::new(config, 42);
    let peers: Vec<PeerId> = names.iter().map(|n| sim.add_node(n).unwrap()).collect();
    for peer in &peers {
        seed(&sim.node(peer).unwrap().content, PAGES);
    }
    (sim, peers)
}

/// Overwrite one page on one simulated node.
pub fn tamper(sim: &Simulation, peer: &PeerId, path: &str, body: &str) {
    sim.node(peer)
        .unwrap()
        .content
        .au(AU)
        .unwrap()
        .put(url(path), body.as_bytes().to_vec());
}

/// A single manager for node "A" holding [`PAGES`].
pub fn single_node(
    config: EngineConfig,
) -> (PollManager, Arc<NullIdentityManager>, Arc<NullContentSource>) {
    let identity = Arc::new(NullIdentityManager::new(PeerId::new("A")));
    let content = Arc::new(NullContentSource::new());
    seed(&content, PAGES);
    let manager =
        PollManager::new(config, identity.clone(), content.clone(), NullRandom::new(7).rng())
            .unwrap();
    (manager, identity, content)
}

pub fn header(
    version: ProtocolVersion,
    opcode: Opcode,
    from: &str,
    url: &str,
    challenge: Nonce,
    now: Timestamp,
) -> MessageHeader {
    MessageHeader {
        version,
        opcode,
        sender: PeerId::new(from),
        au_id: AU.into(),
        plugin_id: PLUGIN.into(),
        url: url.into(),
        lower: None,
        upper: None,
        duration: 20 * MINUTE,
        challenge,
        verifier: random_nonce(),
        hash_algorithm: DEFAULT_ALGORITHM.into(),
        sent_at: now,
    }
}

/// A V3 invitation from `from` over the whole AU.
pub fn invitation(from: &str, now: Timestamp) -> LcapMessage {
    LcapMessage::new(
        header(ProtocolVersion::V3, Opcode::Poll, from, AU_URL, random_nonce(), now),
        MessageBody::Poll {
            vote_deadline: now.plus(10 * MINUTE),
        },
    )
}
