//! End-to-end Scenarios
//!
//! Each scenario drives a full engine through [`ControllerSimulator`] and
//! collects violations instead of panicking, so the same functions serve
//! tests and ad-hoc runs.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use ztnet_controller::{Actor, PolicyStore};
use ztnet_core::{CapabilityDefinition, MemberId, Network, NetworkId, Route, TagDefinition, ZtError};
use ztnet_gate::{Decision, GatePolicy};
use ztnet_policy::resolve_capabilities;
use ztnet_runtime::{MemberAddRequest, RuntimeConfig};
use ztnet_state::MemberPhase;

use crate::{ControllerSimulator, SimulationConfig};

// ============================================================================
// RESULT
// ============================================================================

/// Outcome of one scenario
#[derive(Clone, Debug, Default)]
pub struct ScenarioResult {
    pub name: &'static str,
    /// Reconcile passes driven by the scenario
    pub passes: u32,
    pub violations: Vec<String>,
}

impl ScenarioResult {
    fn new(name: &'static str) -> Self {
        ScenarioResult {
            name,
            ..Default::default()
        }
    }

    fn check(&mut self, holds: bool, what: impl Into<String>) {
        if !holds {
            self.violations.push(what.into());
        }
    }

    fn fail(mut self, what: impl std::fmt::Display) -> Self {
        self.violations.push(what.to_string());
        self
    }

    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

const NWID: NetworkId = NetworkId(0x8056_c2e2_1c00_0001);

fn addr(s: &str) -> IpAddr {
    s.parse().unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

/// Public network with one /24 pool
pub fn lan_network() -> Network {
    let mut network = Network::new(NWID, "lan").public();
    network = network.with_pool(addr("10.147.17.1"), addr("10.147.17.254"));
    if let Ok(target) = "10.147.17.0/24".parse() {
        network = network.with_route(Route::lan(target));
    }
    network
}

/// Network whose "internet" capability requires the exit-node tag
pub fn exit_node_network() -> Network {
    lan_network()
        .with_tag(
            "exit-node",
            TagDefinition::new(100).with_enum("no", 0).with_enum("yes", 1).with_default(0),
        )
        .with_capability("internet", CapabilityDefinition::new(1).with_rule_set([("exit-node", 1u32)]))
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// A member gains "internet" only once it is tagged as an exit node
pub async fn scenario_exit_node_internet() -> ScenarioResult {
    let mut result = ScenarioResult::new("exit_node_internet");
    let mut sim = ControllerSimulator::new(SimulationConfig::calm());
    let network = exit_node_network();

    if let Err(e) = sim.create_network(network.clone()).await {
        return result.fail(e);
    }
    let added = match sim.add_member(NWID, MemberAddRequest::default()).await {
        Ok(added) => added,
        Err(e) => return result.fail(e),
    };
    result.passes += 1;
    let id = added.member.id;

    let before = resolve_capabilities(&added.member, &network);
    result.check(!before.grants("internet"), "default exit-node=0 granted internet");
    result.check(before.effective_tags.get("exit-node") == Some(&0), "default value not in effect");
    result.check(
        sim.hosted().member(NWID, id).map_or(false, |m| m.tags.is_empty()),
        "default tag value was sent to the controller",
    );

    let tags = BTreeMap::from([("exit-node".to_string(), 1)]);
    if let Err(e) = sim.engine().set_member_tags(&Actor::system(), NWID, id, tags).await {
        return result.fail(e);
    }
    result.passes += 1;

    let stored = match sim.store().load_member(NWID, id).await {
        Ok(Some(member)) => member,
        Ok(None) => return result.fail("member vanished from the store"),
        Err(e) => return result.fail(e),
    };
    result.check(resolve_capabilities(&stored, &network).grants("internet"), "exit-node=1 did not grant internet");
    result.check(
        sim.hosted().member(NWID, id).map_or(false, |m| m.tags.get(&100) == Some(&1)),
        "exit-node assignment not on the controller",
    );

    result
}

/// An invalid invite is denied even in central API mode unless the policy
/// lets central mode override it
pub async fn scenario_central_invalid_invite() -> ScenarioResult {
    let mut result = ScenarioResult::new("central_invalid_invite");

    let strict = ControllerSimulator::new(SimulationConfig::calm().with_runtime(RuntimeConfig::central()));
    if let Err(e) = strict.create_network(lan_network()).await {
        return result.fail(e);
    }
    let denied = strict.engine().register_member(NWID, "a1b2c3d4e5", Some("no-such-code")).await;
    result.check(matches!(denied, Err(ZtError::Invitation(_))), format!("expected denial, got {:?}", denied));
    result.check(strict.engine().held_addresses(NWID).is_empty(), "denied member took an address");

    let runtime = RuntimeConfig {
        gate: GatePolicy {
            central_overrides_invalid_invite: true,
            ..Default::default()
        },
        ..RuntimeConfig::central()
    };
    let lenient = ControllerSimulator::new(SimulationConfig::calm().with_runtime(runtime));
    if let Err(e) = lenient.create_network(lan_network()).await {
        return result.fail(e);
    }
    match lenient.engine().register_member(NWID, "a1b2c3d4e5", Some("no-such-code")).await {
        Ok(added) => {
            result.passes += 1;
            result.check(added.decision == Decision::Authorize, format!("override gave {:?}", added.decision));
            result.check(
                lenient.hosted().member(NWID, added.member.id).map_or(false, |m| m.authorized),
                "override member not authorized on the controller",
            );
        }
        Err(e) => return result.fail(e),
    }

    result
}

/// Out-of-band edits are detected and undone by the next pass
pub async fn scenario_drift_recovery() -> ScenarioResult {
    let mut result = ScenarioResult::new("drift_recovery");
    let mut sim = ControllerSimulator::new(SimulationConfig::calm());

    if let Err(e) = sim.create_network(lan_network()).await {
        return result.fail(e);
    }
    let ids = match sim.add_members(NWID, 3, MemberAddRequest::default()).await {
        Ok(ids) => ids,
        Err(e) => return result.fail(e),
    };
    result.passes += 3;
    let victim = ids[1];

    sim.hosted().edit_member(NWID, victim, |m| {
        m.authorized = false;
        m.active_bridge = true;
    });

    let report = match sim.engine().reconcile(NWID).await {
        Ok(report) => report,
        Err(e) => return result.fail(e),
    };
    result.passes += report.passes;

    result.check(
        report.changes.iter().any(|c| c.member == victim && c.to == MemberPhase::Drifted),
        "drift not detected",
    );
    result.check(report.batches_applied == 1, format!("{} batches sent for one drifted member", report.batches_applied));
    result.check(sim.engine().member_phase(NWID, victim) == MemberPhase::Authorized, "member not re-authorized");
    match sim.drift(NWID).await {
        Ok(drifted) => result.check(drifted.is_empty(), format!("still drifted: {:?}", drifted)),
        Err(e) => return result.fail(e),
    }

    result
}

/// A member deleted on the controller keeps its local record and is left alone
pub async fn scenario_orphan_retained() -> ScenarioResult {
    let mut result = ScenarioResult::new("orphan_retained");
    let mut sim = ControllerSimulator::new(SimulationConfig::calm());

    if let Err(e) = sim.create_network(lan_network()).await {
        return result.fail(e);
    }
    let added = match sim.add_member(NWID, MemberAddRequest::default()).await {
        Ok(added) => added,
        Err(e) => return result.fail(e),
    };
    result.passes += 1;
    let id = added.member.id;

    sim.hosted().remove_member(NWID, id);
    for _ in 0..2 {
        let report = match sim.engine().reconcile(NWID).await {
            Ok(report) => report,
            Err(e) => return result.fail(e),
        };
        result.passes += report.passes;
        result.check(report.orphaned == vec![id], format!("orphaned list {:?}", report.orphaned));
        result.check(report.batches_applied == 0, "intents sent for an orphaned member");
    }

    result.check(sim.engine().member_phase(NWID, id).is_orphaned(), "member not orphaned");
    result.check(sim.hosted().member(NWID, id).is_none(), "orphan re-created on the controller");
    result.check(
        matches!(sim.store().load_member(NWID, id).await, Ok(Some(_))),
        "orphaned member dropped from the store",
    );
    result.check(
        sim.engine().held_addresses(NWID).values().any(|holder| *holder == id),
        "orphaned member lost its address",
    );

    result
}

/// Members added at the same time never share an address
pub async fn scenario_concurrent_allocation(members: usize) -> ScenarioResult {
    let mut result = ScenarioResult::new("concurrent_allocation");
    let sim = ControllerSimulator::new(SimulationConfig::calm());

    if let Err(e) = sim.create_network(lan_network()).await {
        return result.fail(e);
    }

    let mut handles = Vec::with_capacity(members);
    for n in 0..members {
        let engine = Arc::clone(sim.engine());
        let id = format!("{:010x}", 0xbb_0000_0000u64 + n as u64);
        handles.push(tokio::spawn(async move {
            engine.add_member(&Actor::system(), NWID, &id, MemberAddRequest::default()).await
        }));
    }

    let mut assigned = BTreeSet::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(added)) => match added.assigned {
                Some(addr) => result.check(assigned.insert(addr), format!("{} assigned twice", addr)),
                None => result.violations.push(format!("{} got no address", added.member.id)),
            },
            Ok(Err(e)) => result.violations.push(e.to_string()),
            Err(e) => result.violations.push(format!("add task failed: {}", e)),
        }
    }
    result.check(assigned.len() == members, format!("{} of {} members addressed", assigned.len(), members));

    match sim.converge(NWID).await {
        Ok(outcome) => {
            result.passes += outcome.passes;
            result.check(outcome.converged, format!("not converged: {:?}", outcome.remaining));
        }
        Err(e) => return result.fail(e),
    }

    let mut on_controller = BTreeSet::new();
    for id in sim.engine().member_phases(NWID).keys() {
        for addr in sim.hosted().member(NWID, *id).map(|m| m.ip_assignments).unwrap_or_default() {
            result.check(on_controller.insert(addr), format!("{} duplicated on the controller", addr));
        }
    }

    result
}

/// A hostile controller is survived and the network converges once it heals
pub async fn scenario_chaos_convergence(members: usize, hostile_passes: u32) -> ScenarioResult {
    let mut result = ScenarioResult::new("chaos_convergence");
    let mut sim = ControllerSimulator::new(SimulationConfig::hostile());

    if let Err(e) = sim.create_network(lan_network()).await {
        return result.fail(e);
    }
    let ids: Vec<MemberId> = match sim.add_members(NWID, members, MemberAddRequest::default()).await {
        Ok(ids) => ids,
        Err(e) => return result.fail(e),
    };

    for _ in 0..hostile_passes {
        result.passes += 1;
        match sim.engine().reconcile(NWID).await {
            Ok(_) | Err(ZtError::Convergence(_)) => {}
            Err(e) => return result.fail(e),
        }
    }
    result.check(sim.controller().stats().faults() > 0, "no faults injected");

    sim.heal();
    match sim.converge(NWID).await {
        Ok(outcome) => {
            result.passes += outcome.passes;
            result.check(outcome.converged, format!("not converged after heal: {:?}", outcome));
        }
        Err(e) => return result.fail(e),
    }

    for id in ids {
        let phase = sim.engine().member_phase(NWID, id);
        result.check(phase == MemberPhase::Authorized, format!("{} left {}", id, phase));
    }
    let held = sim.engine().held_addresses(NWID);
    result.check(held.len() == members, format!("{} addresses held by {} members", held.len(), members));

    result
}

/// Run every scenario with its default size
pub async fn run_all() -> Vec<ScenarioResult> {
    vec![
        scenario_exit_node_internet().await,
        scenario_central_invalid_invite().await,
        scenario_drift_recovery().await,
        scenario_orphan_retained().await,
        scenario_concurrent_allocation(32).await,
        scenario_chaos_convergence(16, 30).await,
    ]
}
