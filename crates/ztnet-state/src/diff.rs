//! Field-by-field diff between desired and observed records
//!
//! Each differing field yields exactly one intent. Member batches are ordered
//! so that authorization opens last and closes first: tags, addresses and
//! bridging are settled before a member is let in, and access is revoked
//! before anything else changes.

use std::collections::BTreeMap;
use std::net::IpAddr;

use ztnet_core::{
    ControllerMemberState, ControllerNetworkState, Member, MemberBatch, MemberIntent, Network,
    NetworkIntent, PolicyWarning, Route,
};
use ztnet_policy::CapabilityResolver;

/// What the controller should hold for one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredMember {
    pub authorized: bool,
    pub tags: BTreeMap<u32, u32>,
    pub ip_assignments: Vec<IpAddr>,
    pub active_bridge: bool,
}

impl DesiredMember {
    /// Project a member record onto controller fields at `now_ms`
    ///
    /// Tag ids the controller holds that no catalog entry maps to are kept as
    /// they are and reported; they are never silently dropped.
    pub fn project(
        member: &Member,
        network: &Network,
        observed: Option<&ControllerMemberState>,
        now_ms: i64,
    ) -> (DesiredMember, Vec<PolicyWarning>) {
        let mut tags = CapabilityResolver::new(network).controller_tags(member);
        let mut warnings = Vec::new();

        if let Some(observed) = observed {
            for (id, value) in &observed.tags {
                if network.tag_by_id(*id).is_none() {
                    tags.entry(*id).or_insert(*value);
                    warnings.push(PolicyWarning::StaleTagId {
                        member: member.id,
                        id: *id,
                        value: *value,
                    });
                }
            }
        }

        let desired = DesiredMember {
            authorized: member.effective_authorized(now_ms),
            tags,
            ip_assignments: sorted(&member.ip_assignments),
            active_bridge: member.active_bridge,
        };
        (desired, warnings)
    }
}

fn sorted(addrs: &[IpAddr]) -> Vec<IpAddr> {
    let mut addrs = addrs.to_vec();
    addrs.sort();
    addrs.dedup();
    addrs
}

/// Member diff result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDiff {
    pub batch: MemberBatch,
    pub warnings: Vec<PolicyWarning>,
}

/// Diff a member against the controller's record
///
/// A member the controller has never reported is diffed against a fresh,
/// unauthorized record.
pub fn diff_member(
    member: &Member,
    network: &Network,
    observed: Option<&ControllerMemberState>,
    now_ms: i64,
) -> MemberDiff {
    let (desired, warnings) = DesiredMember::project(member, network, observed, now_ms);
    let blank = ControllerMemberState::new(member.nwid, member.id);
    let observed = observed.unwrap_or(&blank);

    let mut intents = Vec::new();
    let authorize = desired.authorized != observed.authorized;

    if authorize && !desired.authorized {
        intents.push(MemberIntent::SetAuthorized(false));
    }
    if desired.tags != observed.tags {
        intents.push(MemberIntent::SetTags(desired.tags));
    }
    if desired.ip_assignments != sorted(&observed.ip_assignments) {
        intents.push(MemberIntent::SetIpAssignments(desired.ip_assignments));
    }
    if desired.active_bridge != observed.active_bridge {
        intents.push(MemberIntent::SetActiveBridge(desired.active_bridge));
    }
    if authorize && desired.authorized {
        intents.push(MemberIntent::SetAuthorized(true));
    }

    MemberDiff {
        batch: MemberBatch {
            nwid: member.nwid,
            member: member.id,
            intents,
        },
        warnings,
    }
}

fn same_routes(a: &[Route], b: &[Route]) -> bool {
    a.len() == b.len() && a.iter().all(|r| b.contains(r))
}

/// Diff network configuration against the controller's record
///
/// Pools compare positionally since allocation walks them in order. Routes
/// compare as a set. The rule program compares positionally and is re-sent
/// whole on any difference, so unchanged rules keep their relative order.
pub fn diff_network(network: &Network, observed: &ControllerNetworkState) -> Vec<NetworkIntent> {
    let mut intents = Vec::new();

    if network.ip_assignment_pools != observed.ip_assignment_pools {
        intents.push(NetworkIntent::SetIpPools(network.ip_assignment_pools.clone()));
    }
    if !same_routes(&network.routes, &observed.routes) {
        intents.push(NetworkIntent::SetRoutes(network.routes.clone()));
    }
    if network.dns != observed.dns {
        intents.push(NetworkIntent::SetDns(network.dns.clone()));
    }
    if network.settings != observed.settings {
        intents.push(NetworkIntent::SetNetworkConfig(network.settings));
    }
    if network.rules != observed.rules {
        intents.push(NetworkIntent::SetRules(network.rules.clone()));
    }

    intents
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztnet_core::{FlowRule, MemberField, MemberId, NetworkField, NetworkId, TagDefinition};

    fn network() -> Network {
        Network::new(NetworkId::new(0x8056_c2e2_1c00_0001), "lab")
            .with_pool("10.0.0.1".parse().unwrap(), "10.0.0.254".parse().unwrap())
            .with_tag("exit-node", TagDefinition::new(1000).with_enum("no", 0).with_enum("yes", 1).with_default(0))
    }

    fn member(network: &Network) -> Member {
        Member::new(network.nwid, MemberId::new(0xefcc1b0947))
    }

    fn converged(member: &Member, network: &Network) -> ControllerMemberState {
        let mut state = ControllerMemberState::new(member.nwid, member.id);
        for intent in diff_member(member, network, None, 0).batch.intents {
            state.apply(&intent);
        }
        state
    }

    #[test]
    fn test_authorize_goes_last() {
        let network = network();
        let m = member(&network)
            .authorized()
            .with_tag("exit-node", 1)
            .with_ip("10.0.0.5".parse().unwrap());

        let diff = diff_member(&m, &network, None, 0);
        assert_eq!(
            diff.batch.fields(),
            vec![MemberField::Tags, MemberField::IpAssignments, MemberField::Authorized]
        );
        assert_eq!(diff.batch.intents[0], MemberIntent::SetTags(BTreeMap::from([(1000, 1)])));
    }

    #[test]
    fn test_deauthorize_goes_first() {
        let network = network();
        let m = member(&network).authorized();
        let mut observed = converged(&m, &network);
        observed.active_bridge = true;

        let mut m = m;
        m.authorized = false;
        let diff = diff_member(&m, &network, Some(&observed), 0);
        assert_eq!(diff.batch.fields(), vec![MemberField::Authorized, MemberField::ActiveBridge]);
    }

    #[test]
    fn test_no_diff_when_converged() {
        let network = network();
        let m = member(&network).authorized().with_tag("exit-node", 1);
        let observed = converged(&m, &network);

        assert!(diff_member(&m, &network, Some(&observed), 0).batch.is_empty());
    }

    #[test]
    fn test_address_order_ignored() {
        let network = network();
        let m = member(&network)
            .with_ip("10.0.0.9".parse().unwrap())
            .with_ip("10.0.0.2".parse().unwrap());
        let mut observed = converged(&m, &network);
        observed.ip_assignments.reverse();

        assert!(diff_member(&m, &network, Some(&observed), 0).batch.is_empty());
    }

    #[test]
    fn test_stale_controller_tag_preserved() {
        let network = network();
        let m = member(&network).with_tag("exit-node", 1);
        let mut observed = converged(&m, &network);
        observed.tags.insert(4242, 7);

        let diff = diff_member(&m, &network, Some(&observed), 0);
        assert!(diff.batch.is_empty());
        assert_eq!(
            diff.warnings,
            vec![PolicyWarning::StaleTagId { member: m.id, id: 4242, value: 7 }]
        );
    }

    #[test]
    fn test_expired_member_deauthorized() {
        let network = network();
        let mut m = member(&network).authorized();
        let observed = converged(&m, &network);
        m.authentication_expiry_time = 1_000;

        let diff = diff_member(&m, &network, Some(&observed), 2_000);
        assert_eq!(diff.batch.intents, vec![MemberIntent::SetAuthorized(false)]);
    }

    #[test]
    fn test_network_diff_order() {
        let network = network()
            .with_route(Route::lan("10.0.0.0/24".parse().unwrap()))
            .with_rules(vec![FlowRule::action_drop()]);
        let mut observed = ControllerNetworkState::from_desired(&network);
        assert!(diff_network(&network, &observed).is_empty());

        observed.routes.clear();
        observed.rules = vec![FlowRule::action_accept()];
        observed.settings.mtu = 1400;

        let fields: Vec<_> = diff_network(&network, &observed).iter().map(NetworkIntent::field).collect();
        assert_eq!(fields, vec![NetworkField::Routes, NetworkField::Settings, NetworkField::Rules]);
    }

    #[test]
    fn test_rule_reorder_resends_program() {
        let rules = vec![
            FlowRule::new("MATCH_ETHERTYPE").with_field("etherType", 2048).negated(),
            FlowRule::action_drop(),
            FlowRule::action_accept(),
        ];
        let network = network().with_rules(rules.clone());
        let mut observed = ControllerNetworkState::from_desired(&network);
        observed.rules.swap(1, 2);

        assert_eq!(diff_network(&network, &observed), vec![NetworkIntent::SetRules(rules)]);
    }

    #[test]
    fn test_route_order_ignored() {
        let network = network()
            .with_route(Route::lan("10.0.0.0/24".parse().unwrap()))
            .with_route(Route::via("0.0.0.0/0".parse().unwrap(), "10.0.0.1".parse().unwrap()));
        let mut observed = ControllerNetworkState::from_desired(&network);
        observed.routes.reverse();

        assert!(diff_network(&network, &observed).is_empty());
    }
}
