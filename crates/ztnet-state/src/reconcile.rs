//! Reconciliation pipeline
//!
//! A pass over one network runs in stages:
//! 1. Validate the network catalog (failure aborts the pass)
//! 2. Diff network configuration against the observed snapshot
//! 3. Per member: validate, resolve, diff, advance the phase
//!
//! Member failures are isolated: a member that fails validation is skipped
//! and every other member still gets its batch. The reconciler never talks to
//! the controller itself; callers apply the planned batches and report each
//! outcome back through [`Reconciler::record_member_result`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use ztnet_core::{
    ConvergenceError, Member, MemberBatch, MemberId, MemberIntent, Network, NetworkId, NetworkIntent,
    PolicyWarning, ValidationError, ZtResult,
};
use ztnet_policy::{validate_member_held, validate_network, CapabilityResolver};

use crate::{diff_member, diff_network, MemberDiff, MemberPhase, ObservedSnapshot, ObservedState, PhaseChange, PhaseEvent};

/// Work planned for one network
#[derive(Debug, Clone, PartialEq)]
pub struct PassPlan {
    pub nwid: NetworkId,
    /// Network configuration intents, applied before member batches
    pub network_intents: Vec<NetworkIntent>,
    pub member_batches: Vec<MemberBatch>,
    /// Members skipped because they failed validation
    pub rejected: Vec<(MemberId, ValidationError)>,
    pub warnings: Vec<PolicyWarning>,
    pub changes: Vec<PhaseChange>,
    /// Locally known members the controller no longer lists
    pub orphaned: Vec<MemberId>,
    /// Controller members with no local record
    pub unmanaged: Vec<MemberId>,
}

impl PassPlan {
    fn new(nwid: NetworkId) -> Self {
        PassPlan {
            nwid,
            network_intents: Vec::new(),
            member_batches: Vec::new(),
            rejected: Vec::new(),
            warnings: Vec::new(),
            changes: Vec::new(),
            orphaned: Vec::new(),
            unmanaged: Vec::new(),
        }
    }

    /// Check if the pass has nothing to send
    pub fn is_empty(&self) -> bool {
        self.network_intents.is_empty() && self.member_batches.is_empty()
    }

    pub fn intent_count(&self) -> usize {
        self.network_intents.len() + self.member_batches.iter().map(|b| b.intents.len()).sum::<usize>()
    }
}

/// Reconciler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub passes: u64,
    pub intents_planned: u64,
    pub batches_applied: u64,
    pub batches_partial: u64,
    pub batches_failed: u64,
    pub validation_failures: u64,
    pub drift_detected: u64,
    pub orphaned: u64,
}

/// Controller reconciler
///
/// Owns the per-network observed snapshots and member phases. Safe to share
/// across tasks; callers serialize passes per network.
#[derive(Debug, Default)]
pub struct Reconciler {
    observed: ObservedState,
    phases: RwLock<HashMap<NetworkId, HashMap<MemberId, MemberPhase>>>,
    stats: Mutex<ReconcilerStats>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed(&self) -> &ObservedState {
        &self.observed
    }

    pub fn phase(&self, nwid: NetworkId, member: MemberId) -> MemberPhase {
        self.phases
            .read()
            .get(&nwid)
            .and_then(|members| members.get(&member))
            .copied()
            .unwrap_or_default()
    }

    /// All tracked phases for a network
    pub fn phases(&self, nwid: NetworkId) -> BTreeMap<MemberId, MemberPhase> {
        self.phases
            .read()
            .get(&nwid)
            .map(|members| members.iter().map(|(id, phase)| (*id, *phase)).collect())
            .unwrap_or_default()
    }

    /// Record a registration or add event
    pub fn register(&self, nwid: NetworkId, member: MemberId) -> MemberPhase {
        self.phases.write().entry(nwid).or_default();
        self.step(nwid, member, PhaseEvent::Registered);
        self.phase(nwid, member)
    }

    /// Advance a member's phase; undefined transitions leave it unchanged
    fn step(&self, nwid: NetworkId, member: MemberId, event: PhaseEvent) -> Option<PhaseChange> {
        let mut phases = self.phases.write();
        let members = phases.get_mut(&nwid)?;
        let phase = members.get(&member).copied().unwrap_or_default();

        match phase.transition(event) {
            Ok(next) if next != phase => {
                let change = PhaseChange {
                    member,
                    from: phase,
                    to: next,
                };
                members.insert(member, next);
                debug!(%nwid, %member, from = %change.from, to = %change.to, "Member phase changed");
                Some(change)
            }
            Ok(_) => None,
            Err(e) => {
                debug!(%nwid, %member, error = %e, "Phase event ignored");
                None
            }
        }
    }

    /// Store a confirmed controller read
    pub fn observe(&self, nwid: NetworkId, snapshot: ObservedSnapshot) -> u64 {
        self.phases.write().entry(nwid).or_default();
        let snapshot = self.observed.record(nwid, snapshot);
        debug!(%nwid, sequence = snapshot.sequence, members = snapshot.members.len(), "Recorded controller read");
        snapshot.sequence
    }

    /// Plan a pass against the latest snapshot
    pub fn plan(&self, network: &Network, members: &[Member], now_ms: i64) -> ZtResult<PassPlan> {
        let plan = self.pass(network, members, now_ms)?;

        let mut stats = self.stats.lock();
        stats.passes += 1;
        stats.intents_planned += plan.intent_count() as u64;
        stats.validation_failures += plan.rejected.len() as u64;
        Ok(plan)
    }

    /// Advance phases against the latest snapshot without planning work
    ///
    /// Used after a batch was applied and the controller re-read, to confirm
    /// convergence.
    pub fn evaluate(&self, network: &Network, members: &[Member], now_ms: i64) -> ZtResult<Vec<PhaseChange>> {
        Ok(self.pass(network, members, now_ms)?.changes)
    }

    fn pass(&self, network: &Network, members: &[Member], now_ms: i64) -> ZtResult<PassPlan> {
        validate_network(network)?;
        let snapshot = self
            .observed
            .get(network.nwid)
            .ok_or(ConvergenceError::NotObserved(network.nwid))?;

        let mut plan = PassPlan::new(network.nwid);
        plan.network_intents = diff_network(network, &snapshot.network);

        let resolver = CapabilityResolver::new(network);
        for member in members {
            // Tags on the stored record were checked strictly when assigned
            let held: BTreeSet<String> = member.tags.keys().cloned().collect();
            if let Err(e) = validate_member_held(member, network, &held) {
                warn!(nwid = %network.nwid, member = %member.id, error = %e, "Member skipped");
                plan.rejected.push((member.id, e));
                continue;
            }

            plan.warnings.extend(resolver.resolve(member).warnings);

            if let Some(diff) = self.assess(network, member, &snapshot, now_ms, &mut plan.changes) {
                plan.warnings.extend(diff.warnings);
                if !diff.batch.is_empty() {
                    plan.member_batches.push(diff.batch);
                }
            }

            if self.phase(network.nwid, member.id).is_orphaned() {
                plan.orphaned.push(member.id);
            }
        }

        // Without a local record nothing backs an authorization
        let local: BTreeSet<MemberId> = members.iter().map(|m| m.id).collect();
        for (id, state) in snapshot.members.iter().filter(|(id, _)| !local.contains(id)) {
            plan.unmanaged.push(*id);
            if state.authorized {
                warn!(nwid = %network.nwid, member = %id, "Authorized member has no local record, deauthorizing");
                plan.member_batches.push(MemberBatch {
                    nwid: network.nwid,
                    member: *id,
                    intents: vec![MemberIntent::SetAuthorized(false)],
                });
            }
        }

        Ok(plan)
    }

    /// Advance one member's phase from the snapshot and diff it
    ///
    /// Returns `None` for orphaned members; nothing is sent on their behalf.
    fn assess(
        &self,
        network: &Network,
        member: &Member,
        snapshot: &ObservedSnapshot,
        now_ms: i64,
        changes: &mut Vec<PhaseChange>,
    ) -> Option<MemberDiff> {
        let nwid = network.nwid;
        let observed = snapshot.member(member.id);
        let mut record = |event| {
            if let Some(change) = self.step(nwid, member.id, event) {
                changes.push(change);
                Some(change)
            } else {
                None
            }
        };

        match self.phase(nwid, member.id) {
            MemberPhase::Unknown => {
                record(PhaseEvent::Registered);
            }
            MemberPhase::Orphaned if observed.is_none() => return None,
            MemberPhase::Orphaned => {
                record(PhaseEvent::Reappeared);
            }
            _ => {}
        }

        let diff = diff_member(member, network, observed, now_ms);
        let event = match observed {
            None => PhaseEvent::Missing,
            Some(state) if diff.batch.is_empty() => PhaseEvent::Confirmed {
                authorized: state.authorized,
            },
            Some(_) => PhaseEvent::Diverged,
        };

        match record(event) {
            Some(change) if change.to == MemberPhase::Drifted => {
                self.stats.lock().drift_detected += 1;
                warn!(%nwid, member = %member.id, "Controller drift detected");
            }
            Some(change) if change.to == MemberPhase::Orphaned => {
                self.stats.lock().orphaned += 1;
                warn!(%nwid, member = %member.id, "Member missing from controller, marked orphaned");
                return None;
            }
            _ => {}
        }

        Some(diff)
    }

    /// Record the outcome of applying a member batch
    ///
    /// Success changes nothing until a re-read confirms it. A partial
    /// application leaves the member drifted; any other failure leaves its
    /// phase as it was.
    pub fn record_member_result(
        &self,
        nwid: NetworkId,
        member: MemberId,
        result: &Result<(), ConvergenceError>,
    ) -> Option<PhaseChange> {
        match result {
            Ok(()) => {
                self.stats.lock().batches_applied += 1;
                None
            }
            Err(ConvergenceError::PartialApplication) => {
                self.stats.lock().batches_partial += 1;
                warn!(%nwid, %member, "Batch partially applied");
                self.step(nwid, member, PhaseEvent::BatchPartial)
            }
            Err(e) => {
                self.stats.lock().batches_failed += 1;
                warn!(%nwid, %member, error = %e, transient = e.is_transient(), "Batch failed");
                self.step(nwid, member, PhaseEvent::BatchFailed)
            }
        }
    }

    /// Record the outcome of applying network intents
    pub fn record_network_result(&self, nwid: NetworkId, result: &Result<(), ConvergenceError>) {
        let mut stats = self.stats.lock();
        match result {
            Ok(()) => stats.batches_applied += 1,
            Err(ConvergenceError::PartialApplication) => {
                stats.batches_partial += 1;
                warn!(%nwid, "Network intents partially applied");
            }
            Err(e) => {
                stats.batches_failed += 1;
                warn!(%nwid, error = %e, "Network intents failed");
            }
        }
    }

    /// Drop a member's phase after administrative cleanup
    pub fn remove_member(&self, nwid: NetworkId, member: MemberId) -> Option<MemberPhase> {
        self.phases.write().get_mut(&nwid)?.remove(&member)
    }

    /// Drop everything known about a deleted network
    pub fn forget_network(&self, nwid: NetworkId) {
        self.phases.write().remove(&nwid);
        self.observed.forget(nwid);
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats.lock().clone()
    }
}
