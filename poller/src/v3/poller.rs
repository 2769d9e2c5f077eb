//! The V3 poller: the node that called the poll.
//!
//! Each invited peer runs its own small handshake tracked by a
//! [`PeerRecord`]. Votes are checked as they arrive by re-hashing our content
//! with the voter's nonce. At the vote deadline the remaining peers are closed
//! out; once every vote check is done the poll is tallied, disputed URLs are
//! repaired from peers holding the majority version, and every voter gets an
//! evaluation receipt.

use std::collections::{BTreeMap, BTreeSet};

use lcap_crypto::DigestAlgorithm;
use lcap_messages::{LcapMessage, MessageBody, NakReason, Opcode, VoteBlock};
use lcap_types::{Digest, Nonce, PeerId, Timestamp};
use tracing::{debug, info, warn};

use super::{PeerStatus, PollerStatus};
use crate::context::PollCtx;
use crate::event::{HashPurpose, PollEvent, PollTimer};
use crate::hashing::{block_digest, blocks_digest, HashOutput};
use crate::poll::{Findings, Poll, PollState, Role};
use crate::tally::{lock_tally, TallyResult};
use crate::vote::Vote;
use crate::PollError;

#[derive(Clone, Debug)]
pub(crate) struct PeerRecord {
    pub(crate) status: PeerStatus,
    pub(crate) voter_nonce: Option<Nonce>,
    pub(crate) blocks: Vec<VoteBlock>,
    /// URL → whether the voter's block matched ours.
    pub(crate) url_agreement: BTreeMap<String, bool>,
    pub(crate) agreement: Option<f64>,
    /// Invited through another voter's nomination.
    pub(crate) outer: bool,
}

impl PeerRecord {
    fn new(status: PeerStatus, outer: bool) -> Self {
        Self {
            status,
            voter_nonce: None,
            blocks: Vec::new(),
            url_agreement: BTreeMap::new(),
            agreement: None,
            outer,
        }
    }

    fn block(&self, url: &str) -> Option<&Digest> {
        self.blocks.iter().find(|b| b.url == url).map(|b| &b.digest)
    }
}

/// A disagreeing voter's block for a disputed URL.
#[derive(Clone, Debug)]
struct Holder {
    peer: PeerId,
    nonce: Nonce,
    block: Digest,
}

/// An outstanding repair for one URL.
///
/// Block digests are seeded with each voter's nonce, so versions cannot be
/// grouped before a copy arrives. Each received copy is hashed against every
/// holder's block; a copy matching a strict majority of holders is stored at
/// once, otherwise the next holder outside the groups seen so far is asked.
#[derive(Clone, Debug)]
struct PendingRepair {
    peer: PeerId,
    holders: Vec<Holder>,
    /// Holders asked, or already matched by a received copy.
    seen: BTreeSet<PeerId>,
    /// Best copy so far with the number of holders it matches.
    best: Option<(usize, Vec<u8>)>,
}

impl PendingRepair {
    fn new(holders: Vec<Holder>) -> Option<Self> {
        let peer = holders.first()?.peer.clone();
        Some(Self {
            seen: BTreeSet::from([peer.clone()]),
            peer,
            holders,
            best: None,
        })
    }

    /// Holders whose block `content` reproduces.
    fn supporters(&self, algorithm: &dyn DigestAlgorithm, challenge: &Nonce, content: &[u8]) -> Vec<PeerId> {
        self.holders
            .iter()
            .filter(|h| block_digest(algorithm, challenge, &h.nonce, content) == h.block)
            .map(|h| h.peer.clone())
            .collect()
    }

    /// Fold in a received copy and decide what to do next.
    fn step(&mut self, supporters: Vec<PeerId>, content: Vec<u8>) -> RepairStep {
        let support = supporters.len();
        self.seen.extend(supporters);
        if support * 2 > self.holders.len() {
            return RepairStep::Store(content, support);
        }
        if support > 0 && self.best.as_ref().map_or(true, |(n, _)| support > *n) {
            self.best = Some((support, content));
        }
        let best = self.best.as_ref().map_or(0, |(n, _)| *n);
        let untried: Vec<PeerId> = self
            .holders
            .iter()
            .filter(|h| !self.seen.contains(&h.peer))
            .map(|h| h.peer.clone())
            .collect();
        match untried.first().cloned() {
            Some(next) if untried.len() > best => {
                self.peer = next.clone();
                self.seen.insert(next.clone());
                RepairStep::Ask(next)
            }
            // No unseen version can outnumber the best copy.
            _ => match self.best.take() {
                Some((n, content)) => RepairStep::Store(content, n),
                None => RepairStep::GiveUp,
            },
        }
    }
}

enum RepairStep {
    Store(Vec<u8>, usize),
    Ask(PeerId),
    GiveUp,
}

pub(crate) struct PollerState {
    pub(crate) status: PollerStatus,
    pub(crate) vote_deadline: Timestamp,
    pub(crate) peers: BTreeMap<PeerId, PeerRecord>,
    repairs: BTreeMap<String, PendingRepair>,
    repaired: Vec<String>,
    /// Tally result held while repairs are outstanding.
    result: Option<TallyResult>,
}

impl PollerState {
    pub(crate) fn new(vote_deadline: Timestamp) -> Self {
        Self {
            status: PollerStatus::Starting,
            vote_deadline,
            peers: BTreeMap::new(),
            repairs: BTreeMap::new(),
            repaired: Vec::new(),
            result: None,
        }
    }

    fn checks_pending(&self) -> bool {
        self.peers.values().any(|p| p.status == PeerStatus::Voted)
    }
}

/// Agreement of a voter's blocks with ours, URL by URL. A URL only one side
/// holds counts as a disagreement.
pub(crate) fn compare_blocks(ours: &[VoteBlock], theirs: &[VoteBlock]) -> BTreeMap<String, bool> {
    let urls: BTreeSet<&String> = ours.iter().chain(theirs).map(|b| &b.url).collect();
    urls.into_iter()
        .map(|url| {
            let mine = ours.iter().find(|b| &b.url == url).map(|b| &b.digest);
            let other = theirs.iter().find(|b| &b.url == url).map(|b| &b.digest);
            let agree = matches!((mine, other), (Some(a), Some(b)) if a == b);
            (url.clone(), agree)
        })
        .collect()
}

/// Fraction of URLs on which the voter agreed; 1.0 for an empty range.
pub(crate) fn agreement_of(urls: &BTreeMap<String, bool>) -> f64 {
    if urls.is_empty() {
        return 1.0;
    }
    urls.values().filter(|a| **a).count() as f64 / urls.len() as f64
}

fn poller_state(poll: &mut Poll) -> Option<&mut PollerState> {
    match &mut poll.role {
        Role::Poller(state) => Some(state),
        _ => None,
    }
}

fn set_status(poll: &mut Poll, status: PollerStatus) {
    if let Some(state) = poller_state(poll) {
        state.status = status;
    }
}

fn set_peer_status(poll: &mut Poll, peer: &PeerId, status: PeerStatus) {
    if let Some(record) = poller_state(poll).and_then(|s| s.peers.get_mut(peer)) {
        record.status = status;
    }
}

fn vote_deadline(poll: &Poll) -> Timestamp {
    match &poll.role {
        Role::Poller(state) => state.vote_deadline,
        _ => poll.deadline,
    }
}

fn status_of(poll: &mut Poll) -> Option<PollerStatus> {
    poller_state(poll).map(|s| s.status)
}

pub(crate) fn handle(poll: &mut Poll, event: PollEvent, ctx: &mut PollCtx<'_>) {
    match event {
        PollEvent::Start => start(poll, ctx),
        PollEvent::Message(msg) => receive(poll, msg, ctx),
        PollEvent::HashDone {
            purpose: HashPurpose::VoteCheck { voter },
            result,
        } => vote_checked(poll, voter, result, ctx),
        PollEvent::Timer(PollTimer::VoteDeadline) => vote_deadline_passed(poll, ctx),
        PollEvent::Timer(PollTimer::Deadline) => deadline_passed(poll, ctx),
        other => debug!(poll = %poll.key, event = ?other, "ignoring event"),
    }
}

fn start(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    if poll.state != PollState::Initing {
        return;
    }
    let estimate = poll.hash_estimate(ctx);
    if !ctx.env.can_hash_before(estimate, poll.deadline) {
        set_status(poll, PollerStatus::NoTimeAvailable);
        poll.fail(PollState::ErrScheduleHash, ctx, "no time to check votes");
        return;
    }

    let mut candidates: Vec<PeerId> = ctx
        .identity
        .known_peers()
        .into_iter()
        .filter(|p| !ctx.identity.is_local(p))
        .collect();
    ctx.shuffle(&mut candidates);
    let v3 = &ctx.config.v3;
    let wanted = (v3.quorum as f64 * v3.invitation_multiplier).ceil() as usize;
    candidates.truncate(wanted);

    poll.state = PollState::WaitVote;
    set_status(poll, PollerStatus::InvitingPeers);
    info!(poll = %poll.key, invitees = candidates.len(), "inviting peers");
    for peer in candidates {
        invite(poll, peer, false, ctx);
    }
    let vote_deadline = vote_deadline(poll);
    ctx.set_timer(&poll.key, vote_deadline, PollTimer::VoteDeadline);
    ctx.set_timer(&poll.key, poll.deadline, PollTimer::Deadline);
}

fn invite(poll: &mut Poll, peer: PeerId, outer: bool, ctx: &mut PollCtx<'_>) {
    let vote_deadline = vote_deadline(poll);
    let msg = poll.message(Opcode::Poll, MessageBody::Poll { vote_deadline }, ctx);
    let status = match ctx.send(msg, Some(&peer)) {
        Ok(()) => PeerStatus::Invited,
        Err(e) => {
            warn!(poll = %poll.key, peer = %peer, error = %e, "invitation not sent");
            PeerStatus::Error
        }
    };
    if let Some(state) = poller_state(poll) {
        state.peers.insert(peer, PeerRecord::new(status, outer));
    }
}

/// Send `body` to one peer; a failed send marks the peer as errored.
fn send_to(
    poll: &mut Poll,
    peer: &PeerId,
    opcode: Opcode,
    body: MessageBody,
    ctx: &mut PollCtx<'_>,
) -> bool {
    let msg = poll.message(opcode, body, ctx);
    match ctx.send(msg, Some(peer)) {
        Ok(()) => true,
        Err(e) => {
            warn!(poll = %poll.key, peer = %peer, error = %e, ?opcode, "send failed");
            set_peer_status(poll, peer, PeerStatus::Error);
            false
        }
    }
}

fn receive(poll: &mut Poll, msg: LcapMessage, ctx: &mut PollCtx<'_>) {
    if poll.state.is_terminal() {
        return;
    }
    let sender = msg.sender().clone();
    let Some(peer_status) = poller_state(poll).and_then(|s| s.peers.get(&sender)).map(|r| r.status)
    else {
        debug!(poll = %poll.key, peer = %sender, "message from uninvited peer");
        return;
    };

    match (msg.body, peer_status) {
        (MessageBody::PollAck { nak: Some(reason), .. }, PeerStatus::Invited) => {
            let status = match reason {
                NakReason::NoTime => PeerStatus::NoTimeAvailable,
                _ => PeerStatus::DeclinedPoll,
            };
            debug!(poll = %poll.key, peer = %sender, ?reason, "invitation declined");
            set_peer_status(poll, &sender, status);
        }
        (MessageBody::PollAck { voter_nonce: Some(nonce), nak: None }, PeerStatus::Invited) => {
            if let Some(record) = poller_state(poll).and_then(|s| s.peers.get_mut(&sender)) {
                record.voter_nonce = Some(nonce);
                record.status = PeerStatus::AcceptedPoll;
            }
            send_to(poll, &sender, Opcode::PollProof, MessageBody::PollProof, ctx);
        }
        (MessageBody::Nominate { nominees }, PeerStatus::AcceptedPoll) => {
            set_peer_status(poll, &sender, PeerStatus::SentNominees);
            invite_nominees(poll, &sender, nominees, ctx);
            if send_to(poll, &sender, Opcode::VoteRequest, MessageBody::Empty, ctx) {
                set_peer_status(poll, &sender, PeerStatus::WaitingForVote);
            }
        }
        (MessageBody::Vote { blocks }, PeerStatus::WaitingForVote) => {
            receive_vote(poll, sender, blocks, ctx);
        }
        (MessageBody::Repair { url, content }, _) => receive_repair(poll, sender, url, content, ctx),
        (body, status) => {
            debug!(poll = %poll.key, peer = %sender, status = status.as_str(), ?body, "unexpected message");
        }
    }
}

/// Outer circle: invite peers nominated by an inner-circle voter.
fn invite_nominees(poll: &mut Poll, nominator: &PeerId, nominees: Vec<PeerId>, ctx: &mut PollCtx<'_>) {
    let v3 = &ctx.config.v3;
    if !v3.enable_outer_circle {
        return;
    }
    let max = v3.max_nominations;
    let Some(state) = poller_state(poll) else {
        return;
    };
    let from_outer = state.peers.get(nominator).is_some_and(|r| r.outer);
    if from_outer || ctx.now() >= state.vote_deadline {
        return;
    }
    let fresh: Vec<PeerId> = nominees
        .into_iter()
        .filter(|p| !ctx.identity.is_local(p) && !state.peers.contains_key(p))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(max)
        .collect();
    for peer in fresh {
        debug!(poll = %poll.key, peer = %peer, by = %nominator, "inviting nominee");
        invite(poll, peer, true, ctx);
    }
}

fn receive_vote(poll: &mut Poll, voter: PeerId, blocks: Vec<VoteBlock>, ctx: &mut PollCtx<'_>) {
    let Some(nonce) = poller_state(poll)
        .and_then(|s| s.peers.get_mut(&voter))
        .and_then(|record| {
            record.blocks = blocks;
            record.status = PeerStatus::Voted;
            record.voter_nonce.clone()
        })
    else {
        return;
    };
    let estimate = poll.hash_estimate(ctx);
    let request = poll.hash_request(
        HashPurpose::VoteCheck {
            voter: voter.clone(),
        },
        nonce,
        estimate,
        poll.deadline,
    );
    if !ctx.schedule_hash(request) {
        warn!(poll = %poll.key, peer = %voter, "no time to check vote");
        set_peer_status(poll, &voter, PeerStatus::Error);
        maybe_tally(poll, ctx);
        return;
    }
    debug!(poll = %poll.key, peer = %voter, "vote received");
}

fn vote_checked(
    poll: &mut Poll,
    voter: PeerId,
    result: Result<HashOutput, PollError>,
    ctx: &mut PollCtx<'_>,
) {
    if poll.state.is_terminal() {
        return;
    }
    let Some(record) = poller_state(poll).and_then(|s| s.peers.get(&voter)).cloned() else {
        return;
    };
    if record.status != PeerStatus::Voted {
        debug!(poll = %poll.key, peer = %voter, "stale vote check");
        return;
    }
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!(poll = %poll.key, peer = %voter, error = %e, "vote check failed");
            set_peer_status(poll, &voter, PeerStatus::Error);
            maybe_tally(poll, ctx);
            return;
        }
    };

    let urls = compare_blocks(&output.blocks, &record.blocks);
    let agreement = agreement_of(&urls);
    for (url, agree) in &urls {
        let value = if *agree { 1.0 } else { 0.0 };
        ctx.identity
            .record_agreement(&voter, &poll.spec.au_id, Some(url), value);
    }

    let Some(nonce) = record.voter_nonce.clone() else {
        return;
    };
    let mut vote = Vote::new(
        poll.challenge.clone(),
        nonce,
        blocks_digest(poll.algorithm, &record.blocks),
        voter.clone(),
        ctx.now(),
    );
    let counted = vote
        .decide(&output.digest)
        .and_then(|_| lock_tally(&poll.tally).add_vote(vote, ctx.identity.reputation(&voter)));
    if let Err(e) = counted {
        debug!(poll = %poll.key, peer = %voter, error = %e, "vote not counted");
    }
    if let Some(record) = poller_state(poll).and_then(|s| s.peers.get_mut(&voter)) {
        record.url_agreement = urls;
        record.agreement = Some(agreement);
        record.status = PeerStatus::Complete;
    }
    debug!(poll = %poll.key, peer = %voter, agreement, "vote checked");
    maybe_tally(poll, ctx);
}

fn vote_deadline_passed(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    if status_of(poll) != Some(PollerStatus::InvitingPeers) {
        return;
    }
    close_out_peers(poll);
    poll.state = PollState::WaitTally;
    set_status(poll, PollerStatus::Tallying);
    maybe_tally(poll, ctx);
}

fn close_out_peers(poll: &mut Poll) {
    if let Some(state) = poller_state(poll) {
        for record in state.peers.values_mut() {
            record.status = record.status.at_vote_deadline();
        }
    }
}

/// Tally once the vote deadline has passed and no vote check is in flight.
fn maybe_tally(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let Some(state) = poller_state(poll) else {
        return;
    };
    if !matches!(state.status, PollerStatus::Tallying | PollerStatus::Hashing) {
        return;
    }
    if state.checks_pending() {
        state.status = PollerStatus::Hashing;
        return;
    }
    state.status = PollerStatus::Tallying;
    tally(poll, ctx);
}

fn tally(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let result = lock_tally(&poll.tally).finish(false);
    if result == TallyResult::NoQuorum {
        finish(poll, result, ctx);
        return;
    }

    let quorum = ctx.config.v3.quorum;
    let max_repairs = ctx.config.v3.max_repairs;
    let plan: Vec<(String, PendingRepair)> = match poller_state(poll) {
        Some(state) => lost_urls(state, quorum)
            .into_iter()
            .filter_map(|url| {
                let holders = state
                    .peers
                    .iter()
                    .filter(|(_, r)| r.url_agreement.get(&url) == Some(&false))
                    .filter_map(|(peer, r)| {
                        Some(Holder {
                            peer: peer.clone(),
                            nonce: r.voter_nonce.clone()?,
                            block: r.block(&url)?.clone(),
                        })
                    })
                    .collect();
                Some((url, PendingRepair::new(holders)?))
            })
            .take(max_repairs)
            .collect(),
        None => Vec::new(),
    };

    for (url, repair) in plan {
        let body = MessageBody::RepairRequest { url: url.clone() };
        let msg = poll.message(Opcode::RepairRequest, body, ctx);
        match ctx.send(msg, Some(&repair.peer)) {
            Ok(()) => {
                debug!(poll = %poll.key, peer = %repair.peer, url, "repair requested");
                if let Some(state) = poller_state(poll) {
                    state.repairs.insert(url, repair);
                }
            }
            Err(e) => warn!(poll = %poll.key, url, error = %e, "repair request not sent"),
        }
    }

    let key = poll.key.clone();
    let Some(state) = poller_state(poll) else {
        return;
    };
    if state.repairs.is_empty() {
        finish(poll, result, ctx);
    } else {
        info!(poll = %key, repairs = state.repairs.len(), "waiting for repairs");
        state.result = Some(result);
        state.status = PollerStatus::WaitingForRepairs;
    }
}

/// URLs where a quorum of checked voters mostly disagreed with us.
fn lost_urls(state: &PollerState, quorum: usize) -> Vec<String> {
    let mut counts: BTreeMap<&String, (usize, usize)> = BTreeMap::new();
    for record in state.peers.values().filter(|r| r.status == PeerStatus::Complete) {
        for (url, agree) in &record.url_agreement {
            let entry = counts.entry(url).or_default();
            if *agree {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
    }
    counts
        .into_iter()
        .filter(|(_, (agree, disagree))| agree + disagree >= quorum && disagree > agree)
        .map(|(url, _)| url.clone())
        .collect()
}

fn receive_repair(poll: &mut Poll, sender: PeerId, url: String, content: Vec<u8>, ctx: &mut PollCtx<'_>) {
    let algorithm = poll.algorithm;
    let challenge = poll.challenge.clone();
    let key = poll.key.clone();
    let Some(state) = poller_state(poll) else {
        return;
    };
    if state.status != PollerStatus::WaitingForRepairs {
        return;
    }
    let Some(pending) = state.repairs.get_mut(&url) else {
        debug!(peer = %sender, url, "unrequested repair");
        return;
    };
    if pending.peer != sender {
        debug!(peer = %sender, url, "repair from unexpected peer");
        return;
    }
    let supporters = pending.supporters(algorithm, &challenge, &content);
    if supporters.is_empty() {
        warn!(poll = %key, peer = %sender, url, "repair does not match any voter's block");
    }
    let step = pending.step(supporters, content);
    if !matches!(step, RepairStep::Ask(_)) {
        state.repairs.remove(&url);
    }

    match step {
        RepairStep::Store(content, support) => match poll.content.store_repair(&url, &content) {
            Ok(()) => {
                info!(poll = %poll.key, peer = %sender, url, support, "repair stored");
                if let Some(state) = poller_state(poll) {
                    state.repaired.push(url);
                }
            }
            Err(e) => warn!(poll = %poll.key, url, error = %e, "repair not stored"),
        },
        RepairStep::Ask(peer) => {
            debug!(poll = %poll.key, from = %sender, peer = %peer, url, "minority copy, asking another voter");
            let body = MessageBody::RepairRequest { url: url.clone() };
            let msg = poll.message(Opcode::RepairRequest, body, ctx);
            if let Err(e) = ctx.send(msg, Some(&peer)) {
                warn!(poll = %poll.key, peer = %peer, url, error = %e, "repair request not sent");
                if let Some(state) = poller_state(poll) {
                    state.repairs.remove(&url);
                }
            }
        }
        RepairStep::GiveUp => warn!(poll = %poll.key, url, "no usable repair"),
    }

    let done = poller_state(poll).map_or(true, |s| s.repairs.is_empty());
    if done {
        let result = poller_state(poll)
            .and_then(|s| s.result)
            .unwrap_or(TallyResult::Error);
        finish(poll, result, ctx);
    }
}

fn deadline_passed(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    if poll.state.is_terminal() {
        return;
    }
    match status_of(poll) {
        Some(PollerStatus::InvitingPeers) => {
            close_out_peers(poll);
            set_status(poll, PollerStatus::Expired);
            let result = lock_tally(&poll.tally).finish(false);
            finish(poll, result, ctx);
        }
        Some(PollerStatus::Hashing | PollerStatus::Tallying) => {
            if let Some(state) = poller_state(poll) {
                for record in state.peers.values_mut() {
                    if record.status == PeerStatus::Voted {
                        record.status = PeerStatus::Error;
                    }
                }
                state.status = PollerStatus::Tallying;
            }
            tally(poll, ctx);
            // Repairs requested now could never arrive in time.
            if status_of(poll) == Some(PollerStatus::WaitingForRepairs) {
                abandon_repairs(poll, ctx);
            }
        }
        Some(PollerStatus::WaitingForRepairs) => abandon_repairs(poll, ctx),
        _ => {}
    }
}

fn abandon_repairs(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let result = match poller_state(poll) {
        Some(state) => {
            warn!(outstanding = state.repairs.len(), "deadline passed with repairs outstanding");
            state.repairs.clear();
            state.result.unwrap_or(TallyResult::Error)
        }
        None => TallyResult::Error,
    };
    finish(poll, result, ctx);
}

fn finish(poll: &mut Poll, result: TallyResult, ctx: &mut PollCtx<'_>) {
    let receipts: Vec<(PeerId, f64)> = poller_state(poll)
        .map(|s| {
            s.peers
                .iter()
                .filter(|(_, r)| r.status == PeerStatus::Complete)
                .filter_map(|(p, r)| Some((p.clone(), r.agreement?)))
                .collect()
        })
        .unwrap_or_default();
    for (peer, agreement) in receipts {
        ctx.identity
            .record_agreement(&peer, &poll.spec.au_id, None, agreement);
        let body = MessageBody::EvaluationReceipt { agreement };
        let msg = poll.message(Opcode::EvaluationReceipt, body, ctx);
        if let Err(e) = ctx.send(msg, Some(&peer)) {
            warn!(poll = %poll.key, peer = %peer, error = %e, "receipt not sent");
        }
    }

    let repaired = match poller_state(poll) {
        Some(state) => {
            if state.status != PollerStatus::Expired {
                state.status = if result == TallyResult::NoQuorum {
                    PollerStatus::NoQuorum
                } else {
                    PollerStatus::Complete
                };
            }
            std::mem::take(&mut state.repaired)
        }
        None => Vec::new(),
    };
    poll.conclude(
        result,
        ctx,
        Findings {
            repaired,
            ..Findings::default()
        },
    );
}
