//! Policy engine
//!
//! Glues the store, the controller and the invitation service to the
//! allocator, the authorization gate and the reconciler. Every mutating
//! operation ends by triggering a pass for the affected network.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use ztnet_alloc::{AllocatorStats, NetworkAllocator};
use ztnet_controller::{
    Actor, ApplyOutcome, CallStats, ControllerApi, InvitationResolver, InviteError, PolicyStore,
    TimedController,
};
use ztnet_core::{
    unix_millis, ControllerNetworkState, Member, MemberId, MemberIntent, Network, NetworkField,
    NetworkId, NetworkIntent, ZtError, ZtResult,
};
use ztnet_gate::{AuthorizationGate, Decision, GateContext, GateStats, InviteStatus};
use ztnet_policy::{validate_member, validate_member_held, validate_network};
use ztnet_state::{
    diff_network, MemberPhase, ObservedSnapshot, PassPlan, PhaseChange, Reconciler, ReconcilerStats,
};

use crate::{PassScheduler, PassTicket, RuntimeConfig, SchedulerStats};

/// Fields of the "add member" form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemberAddRequest {
    pub name: String,
    pub tags: BTreeMap<String, u32>,
    pub ip_assignments: Vec<IpAddr>,
    pub active_bridge: bool,
    pub no_auto_assign_ips: bool,
    pub authentication_expiry_time: i64,
    /// The operator approves the member as part of adding it
    pub authorize: bool,
}

/// Result of adding or registering a member
#[derive(Debug, Clone, PartialEq)]
pub struct MemberAdded {
    pub member: Member,
    pub decision: Decision,
    /// Address taken from a pool, if any
    pub assigned: Option<IpAddr>,
    /// The pass triggered by the add; its failure does not undo the add
    pub pass: ZtResult<PassReport>,
}

/// What one reconcile call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub nwid: NetworkId,
    /// Folded into a pass already in flight
    pub coalesced: bool,
    /// Passes run, including coalesced re-runs
    pub passes: u32,
    pub network_intents: usize,
    pub batches_applied: usize,
    pub batches_failed: usize,
    pub rejected: Vec<MemberId>,
    pub warnings: usize,
    pub orphaned: Vec<MemberId>,
    pub unmanaged: Vec<MemberId>,
    pub changes: Vec<PhaseChange>,
    /// The network was deleted while the pass ran
    pub cancelled: bool,
    /// A trigger arrived after the re-run limit; another pass is due
    pub pending: bool,
}

impl PassReport {
    fn new(nwid: NetworkId) -> Self {
        PassReport {
            nwid,
            passes: 1,
            ..Default::default()
        }
    }

    fn coalesced(nwid: NetworkId) -> Self {
        PassReport {
            nwid,
            coalesced: true,
            ..Default::default()
        }
    }

    fn record_plan(&mut self, plan: &PassPlan) {
        self.network_intents = plan.network_intents.len();
        self.rejected = plan.rejected.iter().map(|(id, _)| *id).collect();
        self.warnings = plan.warnings.len();
        self.orphaned = plan.orphaned.clone();
        self.unmanaged = plan.unmanaged.clone();
        self.changes.extend(plan.changes.iter().copied());
    }

    /// Fold a re-run into this report; member lists reflect the latest pass
    fn absorb(&mut self, next: PassReport) {
        self.passes += next.passes;
        self.network_intents += next.network_intents;
        self.batches_applied += next.batches_applied;
        self.batches_failed += next.batches_failed;
        self.warnings += next.warnings;
        self.rejected = next.rejected;
        self.orphaned = next.orphaned;
        self.unmanaged = next.unmanaged;
        self.changes.extend(next.changes);
        self.cancelled |= next.cancelled;
    }

    /// Check if every batch sent in this call was applied
    pub fn is_clean(&self) -> bool {
        self.batches_failed == 0 && self.rejected.is_empty()
    }
}

/// Engine-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub scheduler: SchedulerStats,
    pub reconciler: ReconcilerStats,
    pub allocator: AllocatorStats,
    pub gate: GateStats,
    pub controller: CallStats,
}

/// Member ids with an admission in progress
#[derive(Default)]
struct Admissions(Mutex<HashSet<(NetworkId, MemberId)>>);

impl Admissions {
    fn enter(&self, nwid: NetworkId, member: MemberId) -> Option<AdmissionGuard<'_>> {
        if !self.0.lock().insert((nwid, member)) {
            return None;
        }
        Some(AdmissionGuard {
            admissions: self,
            key: (nwid, member),
        })
    }
}

struct AdmissionGuard<'a> {
    admissions: &'a Admissions,
    key: (NetworkId, MemberId),
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.admissions.0.lock().remove(&self.key);
    }
}

/// The policy engine
pub struct Engine {
    config: RuntimeConfig,
    store: Arc<dyn PolicyStore>,
    controller: TimedController<Arc<dyn ControllerApi>>,
    invites: Arc<dyn InvitationResolver>,
    allocator: NetworkAllocator,
    reconciler: Reconciler,
    gate: AuthorizationGate,
    scheduler: PassScheduler,
    admissions: Admissions,
}

impl Engine {
    pub fn new(
        config: RuntimeConfig,
        controller: Arc<dyn ControllerApi>,
        store: Arc<dyn PolicyStore>,
        invites: Arc<dyn InvitationResolver>,
    ) -> Self {
        info!(
            timeout = %humantime::format_duration(config.controller_timeout),
            central_api_mode = config.central_api_mode,
            "Starting policy engine"
        );

        Engine {
            controller: TimedController::new(controller, config.controller_timeout),
            gate: AuthorizationGate::new(config.gate),
            scheduler: PassScheduler::new(config.max_coalesced_reruns),
            admissions: Admissions::default(),
            allocator: NetworkAllocator::new(),
            reconciler: Reconciler::new(),
            store,
            invites,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Rebuild address books from the store
    ///
    /// Conflicting stored addresses are logged and left to the operator.
    pub async fn restore(&self) -> ZtResult<usize> {
        let networks = self.store.list_networks().await?;
        for nwid in &networks {
            let members = self.store.load_members(*nwid).await?;
            for conflict in self.allocator.load(*nwid, &members) {
                warn!(%nwid, error = %conflict, "Conflicting stored address");
            }
        }
        info!(networks = networks.len(), "Restored address books");
        Ok(networks.len())
    }

    async fn load_network(&self, nwid: NetworkId) -> ZtResult<Network> {
        self.store.load_network(nwid).await?.ok_or(ZtError::NetworkNotFound(nwid))
    }

    async fn load_member(&self, nwid: NetworkId, member: MemberId) -> ZtResult<Member> {
        self.store
            .load_member(nwid, member)
            .await?
            .ok_or(ZtError::MemberNotFound { nwid, member })
    }

    /// Validate a network and settle its routes
    fn check_network(&self, mut network: Network) -> ZtResult<Network> {
        validate_network(&network)?;
        network.routes = self.allocator.validate_addressing(&network)?;
        Ok(network)
    }

    /// Create a network locally and on the controller
    pub async fn create_network(&self, actor: &Actor, network: Network) -> ZtResult<PassReport> {
        actor.ensure_can_modify()?;
        let network = self.check_network(network)?;
        let nwid = network.nwid;

        if self.store.load_network(nwid).await?.is_some() {
            return Err(ZtError::NetworkExists(nwid));
        }
        self.store.save_network(&network).await?;

        let mut intents = diff_network(&network, &ControllerNetworkState::new(nwid));
        if !intents.iter().any(|i| i.field() == NetworkField::Settings) {
            intents.push(NetworkIntent::SetNetworkConfig(network.settings));
        }
        let created = self
            .controller
            .apply_network_intents(nwid, &intents)
            .await
            .and_then(ApplyOutcome::into_result);
        if let Err(e) = created {
            self.store.delete_network(nwid).await?;
            warn!(%nwid, error = %e, "Controller refused new network");
            return Err(e.into());
        }

        info!(%actor, %nwid, name = %network.name, "Network created");
        self.reconcile(nwid).await
    }

    /// Replace a network's policy
    ///
    /// `network.revision` must match the stored revision.
    pub async fn update_network(&self, actor: &Actor, network: Network) -> ZtResult<PassReport> {
        actor.ensure_can_modify()?;
        let current = self.load_network(network.nwid).await?;
        if network.revision != current.revision {
            return Err(ZtError::Store(format!(
                "stale network write: revision {} is not stored {}",
                network.revision, current.revision
            )));
        }

        let mut network = self.check_network(network)?;
        network.revision += 1;
        self.store.save_network(&network).await?;

        info!(%actor, nwid = %network.nwid, revision = network.revision, "Network updated");
        self.reconcile(network.nwid).await
    }

    /// Delete a network
    ///
    /// A pass in flight finishes its current batch and drops the rest.
    pub async fn delete_network(&self, actor: &Actor, nwid: NetworkId) -> ZtResult<bool> {
        actor.ensure_can_modify()?;

        // Cancel after the delete so a pass started in between fails to load
        let existed = self.store.delete_network(nwid).await?;
        let in_flight = self.scheduler.cancel(nwid);
        self.allocator.forget(nwid);
        self.reconciler.forget_network(nwid);

        info!(%actor, %nwid, in_flight, existed, "Network deleted");
        Ok(existed)
    }

    /// Add a member by node id on an operator's behalf
    pub async fn add_member(
        &self,
        actor: &Actor,
        nwid: NetworkId,
        member_id: &str,
        request: MemberAddRequest,
    ) -> ZtResult<MemberAdded> {
        actor.ensure_can_modify()?;
        info!(%actor, %nwid, member = member_id, "Adding member");
        self.admit(nwid, member_id, request, InviteStatus::NotPresented).await
    }

    /// Self-service registration, optionally with an invite code
    pub async fn register_member(
        &self,
        nwid: NetworkId,
        member_id: &str,
        invite_code: Option<&str>,
    ) -> ZtResult<MemberAdded> {
        let invite = match invite_code {
            None => InviteStatus::NotPresented,
            Some(code) => match self.invites.resolve_invite(code).await {
                Ok(resolution) if resolution.valid => InviteStatus::Valid(resolution.role),
                Ok(_) => InviteStatus::Invalid,
                Err(InviteError::Unavailable(reason)) => return Err(ZtError::Invitation(reason)),
                Err(e) => {
                    debug!(%nwid, member = member_id, error = %e, "Invite not usable");
                    InviteStatus::Invalid
                }
            },
        };

        self.admit(nwid, member_id, MemberAddRequest::default(), invite).await
    }

    async fn admit(
        &self,
        nwid: NetworkId,
        member_id: &str,
        request: MemberAddRequest,
        invite: InviteStatus,
    ) -> ZtResult<MemberAdded> {
        let id: MemberId = member_id.parse()?;
        // Addresses are booked per member id, so one admission per id at a time
        let Some(admission) = self.admissions.enter(nwid, id) else {
            return Err(ZtError::MemberExists { nwid, member: id });
        };
        let network = self.load_network(nwid).await?;
        if self.store.load_member(nwid, id).await?.is_some() {
            return Err(ZtError::MemberExists { nwid, member: id });
        }

        let mut member = Member::new(nwid, id).with_name(request.name);
        member.tags = request.tags;
        member.active_bridge = request.active_bridge;
        member.no_auto_assign_ips = request.no_auto_assign_ips;
        member.authentication_expiry_time = request.authentication_expiry_time;
        for addr in request.ip_assignments {
            member = member.with_ip(addr);
        }
        validate_member(&member, &network)?;

        // Denied members never take an address
        let context = GateContext::new(invite, self.config.central_api_mode, network.requires_approval());
        let mut decision = self.gate.admit(&mut member, &context);
        if decision == Decision::Deny {
            warn!(%nwid, member = %id, ?invite, "Member denied");
            return Err(ZtError::Invitation(format!("member {} denied for network {}", id, nwid)));
        }
        if request.authorize && decision == Decision::RequireManualReview {
            decision = self.gate.review(&mut member, true);
        }

        self.allocator.reassign(nwid, id, &member.ip_assignments)?;
        let assigned = match self.allocator.auto_assign(&member, &network) {
            Ok(assigned) => assigned,
            Err(e) => {
                self.allocator.release(nwid, id);
                return Err(e.into());
            }
        };
        if let Some(addr) = assigned {
            member.ip_assignments.push(addr);
        }

        if let Err(e) = self.store.insert_member(&member).await {
            self.allocator.release(nwid, id);
            return Err(e);
        }
        self.reconciler.register(nwid, id);
        drop(admission);
        info!(%nwid, member = %id, ?decision, ?assigned, "Member admitted");

        let pass = self.reconcile(nwid).await;
        Ok(MemberAdded {
            member,
            decision,
            assigned,
            pass,
        })
    }

    /// Replace a member's tag assignments
    ///
    /// New assignments must name catalog tags. An assignment the member
    /// already held unchanged may stay even if its tag left the catalog.
    pub async fn set_member_tags(
        &self,
        actor: &Actor,
        nwid: NetworkId,
        member: MemberId,
        tags: BTreeMap<String, u32>,
    ) -> ZtResult<PassReport> {
        actor.ensure_can_modify()?;
        let network = self.load_network(nwid).await?;
        let mut record = self.load_member(nwid, member).await?;

        let held: BTreeSet<String> = record
            .tags
            .iter()
            .filter(|(name, value)| tags.get(*name) == Some(*value))
            .map(|(name, _)| name.clone())
            .collect();
        record.tags = tags;
        validate_member_held(&record, &network, &held)?;
        record.touch();
        self.store.save_member(&record).await?;

        info!(%actor, %nwid, %member, tags = ?record.tags, "Member tags set");
        self.reconcile(nwid).await
    }

    /// Record the operator's approval of a member held for review
    pub async fn approve_member(&self, actor: &Actor, nwid: NetworkId, member: MemberId) -> ZtResult<PassReport> {
        self.review(actor, nwid, member, true).await
    }

    /// Revoke or refuse a member's authorization; the record is kept
    pub async fn deny_member(&self, actor: &Actor, nwid: NetworkId, member: MemberId) -> ZtResult<PassReport> {
        self.review(actor, nwid, member, false).await
    }

    async fn review(&self, actor: &Actor, nwid: NetworkId, member: MemberId, approve: bool) -> ZtResult<PassReport> {
        actor.ensure_can_modify()?;
        let mut record = self.load_member(nwid, member).await?;
        self.gate.review(&mut record, approve);
        self.store.save_member(&record).await?;

        info!(%actor, %nwid, %member, approve, "Member reviewed");
        self.reconcile(nwid).await
    }

    /// Delete a member record
    ///
    /// A member the controller knows is deauthorized there first; if that
    /// fails the local record is kept. Waits for a pass in flight, so no pass
    /// plans against the record being removed.
    pub async fn remove_member(&self, actor: &Actor, nwid: NetworkId, member: MemberId) -> ZtResult<()> {
        actor.ensure_can_modify()?;
        let ticket = self.scheduler.claim(nwid).await;
        let removed = self.remove_claimed(nwid, member).await;
        self.settle(ticket).await;

        removed?;
        info!(%actor, %nwid, %member, "Member removed");
        Ok(())
    }

    async fn remove_claimed(&self, nwid: NetworkId, member: MemberId) -> ZtResult<()> {
        self.load_member(nwid, member).await?;

        let known = self
            .reconciler
            .observed()
            .get(nwid)
            .map_or(false, |snapshot| snapshot.member(member).is_some());
        if known {
            self.controller
                .apply_member_intents(nwid, member, &[MemberIntent::SetAuthorized(false)])
                .await
                .and_then(ApplyOutcome::into_result)?;
        }

        self.store.delete_member(nwid, member).await?;
        let released = self.allocator.release(nwid, member);
        self.reconciler.remove_member(nwid, member);
        debug!(%nwid, %member, released = released.len(), "Member record deleted");
        Ok(())
    }

    /// Run the passes triggered while a claim was held, then free the network
    async fn settle(&self, mut ticket: PassTicket<'_>) {
        let nwid = ticket.nwid();
        while ticket.rerun() {
            if let Err(e) = self.run_pass(&ticket).await {
                warn!(%nwid, error = %e, "Pass after claim failed");
            }
        }
        if ticket.pending() {
            debug!(%nwid, "Triggers left after claim");
        }
    }

    /// Run a pass for a network, or fold into the one in flight
    ///
    /// Triggers folded in while a pass runs get their re-run even when that
    /// pass fails; only the last outcome is returned in that case.
    pub async fn reconcile(&self, nwid: NetworkId) -> ZtResult<PassReport> {
        let Some(mut ticket) = self.scheduler.begin(nwid) else {
            return Ok(PassReport::coalesced(nwid));
        };

        let mut passes = 1;
        let mut outcome = self.run_pass(&ticket).await;
        while ticket.rerun() {
            debug!(%nwid, "Re-running coalesced pass");
            passes += 1;
            let next = self.run_pass(&ticket).await;
            outcome = match (outcome, next) {
                (Ok(mut report), Ok(next)) => {
                    report.absorb(next);
                    Ok(report)
                }
                (Err(e), next) => {
                    warn!(%nwid, error = %e, "Pass failed, coalesced re-run took over");
                    next
                }
                (Ok(_), Err(e)) => Err(e),
            };
        }

        let pending = ticket.pending();
        outcome.map(|mut report| {
            report.passes = passes;
            report.pending = pending;
            report
        })
    }

    /// Spawn a pass onto the runtime
    pub fn trigger(self: &Arc<Self>, nwid: NetworkId) -> JoinHandle<ZtResult<PassReport>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.reconcile(nwid).await })
    }

    /// Spawn a pass for every stored network; passes run concurrently
    pub async fn trigger_all(self: &Arc<Self>) -> ZtResult<Vec<JoinHandle<ZtResult<PassReport>>>> {
        let networks = self.store.list_networks().await?;
        Ok(networks.into_iter().map(|nwid| self.trigger(nwid)).collect())
    }

    async fn run_pass(&self, ticket: &PassTicket<'_>) -> ZtResult<PassReport> {
        let nwid = ticket.nwid();

        async move {
            let network = self.check_network(self.load_network(nwid).await?)?;
            let members = self.store.load_members(nwid).await?;
            let mut report = PassReport::new(nwid);

            if !self.refresh(ticket).await? {
                report.cancelled = true;
                return Ok(report);
            }
            let Some(plan) = ticket.while_live(|| self.reconciler.plan(&network, &members, unix_millis())) else {
                report.cancelled = true;
                return Ok(report);
            };
            let plan = plan?;
            report.record_plan(&plan);

            if !plan.network_intents.is_empty() {
                let result = self
                    .controller
                    .apply_network_intents(nwid, &plan.network_intents)
                    .await
                    .and_then(ApplyOutcome::into_result);
                ticket.while_live(|| self.reconciler.record_network_result(nwid, &result));
                match result {
                    Ok(()) => report.batches_applied += 1,
                    Err(_) => report.batches_failed += 1,
                }
            }

            for batch in &plan.member_batches {
                if ticket.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                debug!(member = %batch.member, fields = ?batch.fields(), "Applying member batch");
                let result = self
                    .controller
                    .apply_member_intents(nwid, batch.member, &batch.intents)
                    .await
                    .and_then(ApplyOutcome::into_result);
                let change = ticket.while_live(|| self.reconciler.record_member_result(nwid, batch.member, &result));
                if let Some(change) = change.flatten() {
                    report.changes.push(change);
                }
                match result {
                    Ok(()) => report.batches_applied += 1,
                    Err(_) => report.batches_failed += 1,
                }
            }

            if report.cancelled || ticket.is_cancelled() {
                report.cancelled = true;
                info!(applied = report.batches_applied, "Pass cancelled, remaining work dropped");
                return Ok(report);
            }

            if !plan.is_empty() {
                if !self.refresh(ticket).await? {
                    report.cancelled = true;
                    return Ok(report);
                }
                match ticket.while_live(|| self.reconciler.evaluate(&network, &members, unix_millis())) {
                    Some(changes) => report.changes.extend(changes?),
                    None => {
                        report.cancelled = true;
                        return Ok(report);
                    }
                }
            }

            info!(
                network_intents = report.network_intents,
                applied = report.batches_applied,
                failed = report.batches_failed,
                rejected = report.rejected.len(),
                orphaned = report.orphaned.len(),
                "Pass complete"
            );
            Ok(report)
        }
        .instrument(info_span!("reconcile", %nwid))
        .await
    }

    /// Read the controller and record the snapshot
    ///
    /// Returns false if the network was deleted meanwhile; nothing is recorded.
    async fn refresh(&self, ticket: &PassTicket<'_>) -> ZtResult<bool> {
        let nwid = ticket.nwid();
        let network = self.controller.read_network(nwid).await?;
        let members = self.controller.read_members(nwid).await?;

        let snapshot = ObservedSnapshot::new(network, members);
        Ok(ticket.while_live(|| self.reconciler.observe(nwid, snapshot)).is_some())
    }

    pub fn member_phase(&self, nwid: NetworkId, member: MemberId) -> MemberPhase {
        self.reconciler.phase(nwid, member)
    }

    pub fn member_phases(&self, nwid: NetworkId) -> BTreeMap<MemberId, MemberPhase> {
        self.reconciler.phases(nwid)
    }

    /// Addresses currently held in a network
    pub fn held_addresses(&self, nwid: NetworkId) -> BTreeMap<IpAddr, MemberId> {
        self.allocator.held(nwid)
    }

    pub fn is_pass_running(&self, nwid: NetworkId) -> bool {
        self.scheduler.is_running(nwid)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            scheduler: self.scheduler.stats(),
            reconciler: self.reconciler.stats(),
            allocator: self.allocator.stats(),
            gate: self.gate.stats(),
            controller: self.controller.stats(),
        }
    }
}
