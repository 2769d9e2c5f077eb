//! V1 name, content and verify polls run across simulated peers.

mod common;

use common::*;
use lcap_nullables::Simulation;
use lcap_poller::{
    lock_tally, AlertKind, IdentityManager, ReputationDelta, TallyResult,
};
use lcap_types::{PeerId, PollKey, PollKind};
use proptest::prelude::*;

/// Result, counts and per-voter agreement of a poll's tally on `node`.
type TallyView = (TallyResult, usize, usize, Vec<(PeerId, bool, u32)>);

fn tally_view(sim: &Simulation, node: &PeerId, key: &PollKey) -> TallyView {
    let tally = sim.node(node).unwrap().manager.poll(key).unwrap().tally();
    let tally = lock_tally(&tally);
    let records = tally
        .records()
        .iter()
        .map(|r| (r.vote.voter.clone(), r.vote.is_agree(), r.weight))
        .collect();
    (tally.result(), tally.num_agree(), tally.num_disagree(), records)
}

fn replay(sim: &mut Simulation, node: &PeerId, key: &PollKey) {
    sim.on_node(node, |manager, env| manager.replay_poll(key, env))
        .unwrap()
        .unwrap();
    sim.run_to_completion();
}

#[test]
fn content_poll_won_with_one_dissenter() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
    let (a, f) = (&peers[0], &peers[5]);
    tamper(&sim, f, "b.html", "tampered");

    let key = sim.call_poll(a, content_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.result, TallyResult::Won);
    assert_eq!((outcome.agree, outcome.disagree), (4, 1));
    assert!(outcome.caller_is_local);
    assert!(!caller.manager.is_active(&key));

    // Winners gain, the dissenter loses.
    assert_eq!(caller.identity.reputation(&peers[1]), 600);
    assert_eq!(caller.identity.reputation(f), 350);

    // The dissenter sees everyone else disagreeing with it.
    let dissenter = sim.node(f).unwrap().outcome(&key).unwrap();
    assert_eq!(dissenter.result, TallyResult::Lost);
    assert!(!dissenter.caller_is_local);
}

#[test]
fn five_agree_one_disagree_wins() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F", "G"]);
    tamper(&sim, &peers[6], "c.html", "tampered");

    let key = sim.call_poll(&peers[0], content_spec()).unwrap();
    sim.run_to_completion();

    let outcome = sim.node(&peers[0]).unwrap().outcome(&key).unwrap().clone();
    assert_eq!(outcome.result, TallyResult::Won);
    assert_eq!((outcome.agree, outcome.disagree), (5, 1));
}

#[test]
fn one_agree_five_low_weight_disagree_is_untrusted() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F", "G"]);
    let a = &peers[0];
    // A and G share the same damaged copy.
    tamper(&sim, a, "c.html", "tampered");
    tamper(&sim, &peers[6], "c.html", "tampered");
    for peer in &peers[1..] {
        sim.node(a).unwrap().identity.set_reputation(peer, 100);
    }

    let key = sim.call_poll(a, content_spec()).unwrap();
    sim.run_to_completion();

    let outcome = sim.node(a).unwrap().outcome(&key).unwrap().clone();
    assert_eq!((outcome.agree, outcome.disagree), (1, 5));
    assert_eq!(outcome.result, TallyResult::Untrusted);
}

#[test]
fn low_weight_majority_is_untrusted() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
    let a = &peers[0];
    tamper(&sim, a, "a.html", "local damage");
    for peer in &peers[1..] {
        sim.node(a).unwrap().identity.set_reputation(peer, 100);
    }

    let key = sim.call_poll(a, content_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.result, TallyResult::Untrusted);
    assert_eq!(outcome.disagree, 5);
    assert!(caller.identity.deltas().is_empty());
}

#[test]
fn split_population_is_too_close_and_alerts() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
    for peer in &peers[3..] {
        tamper(&sim, peer, "c.html", "other edition");
    }

    let key = sim.call_poll(&peers[0], content_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(&peers[0]).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.result, TallyResult::TooClose);
    assert_eq!((outcome.agree, outcome.disagree), (2, 3));
    let alerts = caller.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::TooClose);
    assert_eq!(alerts[0].key, key);
}

#[test]
fn too_few_voters_is_no_quorum() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C"]);
    let key = sim.call_poll(&peers[0], content_spec()).unwrap();
    sim.run_to_completion();

    let outcome = sim.node(&peers[0]).unwrap().outcome(&key).unwrap().clone();
    assert_eq!(outcome.result, TallyResult::NoQuorum);
    assert_eq!(outcome.agree, 2);
}

#[test]
fn lost_name_poll_reports_missing_entry() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
    let a = &peers[0];
    sim.node(a)
        .unwrap()
        .content
        .au(AU)
        .unwrap()
        .remove(&url("c.html"));

    let key = sim.call_poll(a, name_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    let outcome = caller.outcome(&key).unwrap();
    assert_eq!(outcome.kind, PollKind::Name);
    assert_eq!(outcome.result, TallyResult::Lost);
    assert_eq!(outcome.missing_locally, vec![url("c.html")]);
    assert!(outcome.extra_locally.is_empty());
    // A single disputed entry needs no narrower poll.
    assert_eq!(caller.outcomes().len(), 1);
}

#[test]
fn several_disputed_names_start_a_narrower_poll() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
    for peer in &peers[1..] {
        let au = sim.node(peer).unwrap().content.au(AU).unwrap();
        au.put(url("d.html"), b"delta".to_vec());
    }
    let a = &peers[0];
    sim.node(a)
        .unwrap()
        .content
        .au(AU)
        .unwrap()
        .remove(&url("c.html"));

    let key = sim.call_poll(a, name_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    let first = caller.outcome(&key).unwrap();
    assert_eq!(first.missing_locally, vec![url("c.html"), url("d.html")]);

    let sub = caller
        .outcomes()
        .iter()
        .find(|o| o.key != key)
        .expect("narrower name poll");
    assert_eq!(sub.kind, PollKind::Name);
    assert_eq!(sub.spec.lower.as_deref(), Some("/c.html"));
    assert_eq!(sub.spec.upper.as_deref(), Some("/d.html"));
    assert_eq!(sub.result, TallyResult::Lost);
    // The narrowed range cannot narrow further.
    assert_eq!(caller.outcomes().len(), 2);
}

#[test]
fn disagreeing_trusted_voter_is_verified() {
    let mut config = quiet_config();
    config.poll.disagree_verify = 1.0;
    let (mut sim, peers) = network(config, &["A", "B", "C", "D", "E", "F"]);
    let (a, f) = (&peers[0], &peers[5]);
    tamper(&sim, f, "a.html", "tampered");
    // Full reputation makes the audit of a disagreeing vote certain.
    sim.node(a).unwrap().identity.set_reputation(f, 1000);

    let key = sim.call_poll(a, content_spec()).unwrap();
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    assert_eq!(caller.outcome(&key).unwrap().result, TallyResult::Won);
    let audit = caller
        .outcomes()
        .iter()
        .find(|o| o.kind == PollKind::Verify)
        .expect("verify poll against the dissenter");
    assert_eq!(audit.result, TallyResult::Verified);
    assert!(audit.caller_is_local);

    let deltas = caller.identity.deltas_for(f);
    assert!(deltas.contains(&ReputationDelta::VoteVerified));
    assert!(deltas.contains(&ReputationDelta::DisagreeVote));
}

#[test]
fn replay_reflects_content_changed_since_the_poll() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
    let (a, f) = (&peers[0], &peers[5]);
    tamper(&sim, f, "b.html", "tampered");
    let key = sim.call_poll(a, content_spec()).unwrap();
    sim.run_to_completion();
    assert_eq!(
        sim.node(a).unwrap().outcome(&key).unwrap().result,
        TallyResult::Won
    );

    // Our copy now matches the former dissenter.
    tamper(&sim, a, "b.html", "tampered");
    sim.on_node(a, |manager, env| manager.replay_poll(&key, env))
        .unwrap()
        .unwrap();
    assert!(sim.node(a).unwrap().manager.is_active(&key));
    sim.run_to_completion();

    let caller = sim.node(a).unwrap();
    assert!(!caller.manager.is_active(&key));
    let poll = caller.manager.poll(&key).unwrap();
    assert!(!poll.is_replaying());
    let tally = poll.tally();
    let tally = lock_tally(&tally);
    assert_eq!(tally.result(), TallyResult::Lost);
    assert_eq!((tally.num_agree(), tally.num_disagree()), (1, 4));
    // Replay keeps the weights the votes were counted with.
    assert!(tally.records().iter().all(|r| r.weight == 500));
    assert!(tally.check_consistency());
}

#[test]
fn replay_of_unchanged_content_repeats_the_tally() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
    let a = &peers[0];
    tamper(&sim, &peers[5], "b.html", "tampered");
    let key = sim.call_poll(a, content_spec()).unwrap();
    sim.run_to_completion();
    let before = tally_view(&sim, a, &key);
    assert_eq!(before.0, TallyResult::Won);

    replay(&mut sim, a, &key);

    assert!(!sim.node(a).unwrap().manager.is_active(&key));
    assert_eq!(tally_view(&sim, a, &key), before);
}

#[test]
fn failed_replay_restores_the_tally() {
    let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
    let a = &peers[0];
    tamper(&sim, &peers[5], "b.html", "tampered");
    let key = sim.call_poll(a, content_spec()).unwrap();
    sim.run_to_completion();
    let before = tally_view(&sim, a, &key);

    sim.node(a).unwrap().content.au(AU).unwrap().set_failing(true);
    replay(&mut sim, a, &key);

    let caller = sim.node(a).unwrap();
    assert!(!caller.manager.is_active(&key));
    let poll = caller.manager.poll(&key).unwrap();
    assert!(!poll.is_replaying());
    assert!(lock_tally(&poll.tally()).check_consistency());
    assert_eq!(tally_view(&sim, a, &key), before);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn replay_agrees_with_the_original_tally(dissenters in 0u8..32) {
        let (mut sim, peers) = network(quiet_config(), &["A", "B", "C", "D", "E", "F"]);
        let a = &peers[0];
        for (i, peer) in peers[1..].iter().enumerate() {
            if dissenters & (1 << i) != 0 {
                tamper(&sim, peer, "a.html", "another edition");
            }
        }
        let key = sim.call_poll(a, content_spec()).unwrap();
        sim.run_to_completion();
        let before = tally_view(&sim, a, &key);

        replay(&mut sim, a, &key);

        prop_assert_eq!(tally_view(&sim, a, &key), before);
    }
}
