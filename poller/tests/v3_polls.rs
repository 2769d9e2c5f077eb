//! V3 polls: invitations, block votes, repairs and evaluation receipts.

mod common;

use common::*;
use lcap_nullables::Simulation;
use lcap_poller::{IdentityManager, TallyResult};
use lcap_types::PollKind;

#[test]
fn poller_wins_and_receipts_settle_voters() {
    let (mut sim, peers) = network(v3_config(), &["A", "B", "C", "D", "E"]);
    let (a, b, e) = (&peers[0], &peers[1], &peers[4]);
    tamper(&sim, e, "c.html", "tampered");

    let key = sim.call_poll(a, v3_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.kind, PollKind::Poller);
    assert_eq!(outcome.result, TallyResult::Won);
    assert_eq!((outcome.agree, outcome.disagree), (3, 1));
    assert!(outcome.repaired.is_empty());
    let agreement = caller.identity.agreement(e, AU);
    assert!((agreement - 2.0 / 3.0).abs() < 1e-9, "agreement {agreement}");
    assert_eq!(caller.identity.agreement(b, AU), 1.0);

    let voter = sim.node(b).unwrap().outcome(&key).unwrap();
    assert_eq!(voter.kind, PollKind::Voter);
    assert_eq!(voter.result, TallyResult::Won);
    assert!(!voter.caller_is_local);
    assert_eq!(sim.node(b).unwrap().identity.agreement(a, AU), 1.0);

    let dissenter = sim.node(e).unwrap().outcome(&key).unwrap();
    assert_eq!(dissenter.result, TallyResult::Lost);
}

#[test]
fn lost_block_is_repaired_from_an_agreeing_voter() {
    let (mut sim, peers) = network(v3_config(), &["A", "B", "C", "D", "E"]);
    let a = &peers[0];
    tamper(&sim, a, "b.html", "tampered");
    for peer in &peers[1..] {
        sim.node(peer)
            .unwrap()
            .identity
            .record_agreement(a, AU, None, 1.0);
    }

    let key = sim.call_poll(a, v3_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.result, TallyResult::Lost);
    assert_eq!(outcome.repaired, vec![url("b.html")]);
    let au = caller.content.au(AU).unwrap();
    assert_eq!(au.get(&url("b.html")).unwrap(), b"bravo".to_vec());
    assert!(!caller.manager.is_active(&key));
}

#[test]
fn repair_comes_from_the_majority_version() {
    let (mut sim, peers) = network(v3_config(), &["A", "B", "C", "D", "E", "F"]);
    let a = &peers[0];
    tamper(&sim, a, "b.html", "local damage");
    // The first disagreeing voters hold a minority edition.
    for peer in &peers[1..3] {
        tamper(&sim, peer, "b.html", "bravo, reprinted");
    }
    for peer in &peers[1..] {
        sim.node(peer)
            .unwrap()
            .identity
            .record_agreement(a, AU, None, 1.0);
    }

    let key = sim.call_poll(a, v3_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.disagree, 5);
    assert_eq!(outcome.repaired, vec![url("b.html")]);
    let au = caller.content.au(AU).unwrap();
    assert_eq!(au.get(&url("b.html")).unwrap(), b"bravo".to_vec());
}

#[test]
fn repair_refused_without_prior_agreement() {
    let (mut sim, peers) = network(v3_config(), &["A", "B", "C", "D", "E"]);
    let a = &peers[0];
    tamper(&sim, a, "b.html", "tampered");

    let key = sim.call_poll(a, v3_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.result, TallyResult::Lost);
    assert!(outcome.repaired.is_empty());
    let au = caller.content.au(AU).unwrap();
    assert_eq!(au.get(&url("b.html")).unwrap(), b"tampered".to_vec());
}

#[test]
fn open_access_au_is_repaired_without_agreement() {
    let (mut sim, peers) = network(v3_config(), &["A", "B", "C", "D", "E"]);
    let a = &peers[0];
    tamper(&sim, a, "a.html", "tampered");
    for peer in &peers[1..] {
        sim.node(peer).unwrap().content.set_open_access(AU);
    }

    let key = sim.call_poll(a, v3_spec()).unwrap();
    sim.run_to_completion();

    let outcome = sim.node(a).unwrap().outcome(&key).unwrap().clone();
    assert_eq!(outcome.repaired, vec![url("a.html")]);
}

#[test]
fn peer_without_the_au_declines() {
    let mut sim = Simulation::new(v3_config(), 42);
    let peers: Vec<_> = ["A", "B", "C", "D", "E"]
        .iter()
        .map(|n| sim.add_node(n).unwrap())
        .collect();
    for peer in &peers[..4] {
        seed(&sim.node(peer).unwrap().content, PAGES);
    }
    let (a, e) = (&peers[0], &peers[4]);

    let key = sim.call_poll(a, v3_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    assert_eq!(caller.outcome(&key).unwrap().result, TallyResult::Won);
    let snapshot = caller.manager.snapshot(sim.now());
    let row = snapshot.find(&key).unwrap();
    let declined = row.peers.iter().find(|p| &p.peer == e).unwrap();
    assert_eq!(declined.status, "Declined Poll");
    assert!(declined.agreement.is_none());

    // The declining peer never created a poll.
    assert!(sim.node(e).unwrap().outcomes().is_empty());
    assert!(!sim.node(e).unwrap().manager.is_active(&key));
}

#[test]
fn too_few_voters_is_no_quorum() {
    let (mut sim, peers) = network(v3_config(), &["A", "B", "C"]);
    let key = sim.call_poll(&peers[0], v3_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(&peers[0]).unwrap();
    assert_eq!(caller.outcome(&key).unwrap().result, TallyResult::NoQuorum);
    let snapshot = caller.manager.snapshot(sim.now());
    assert_eq!(snapshot.find(&key).unwrap().status, "No Quorum");
}

#[test]
fn offline_voters_are_recorded_as_silent() {
    let (mut sim, peers) = network(v3_config(), &["A", "B", "C", "D", "E"]);
    sim.set_offline(&peers[4], true);

    let key = sim.call_poll(&peers[0], v3_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(&peers[0]).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.result, TallyResult::Won);
    assert_eq!(outcome.agree, 3);
    let snapshot = caller.manager.snapshot(sim.now());
    let row = snapshot.find(&key).unwrap();
    let silent = row.peers.iter().find(|p| p.peer == peers[4]).unwrap();
    assert_eq!(silent.status, "No Response");
}
