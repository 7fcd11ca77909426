//! Authorization decision
//!
//! Default priority, first match wins:
//! 1. An invite was presented and is invalid or expired: deny
//! 2. Central API mode: authorize (the controller auto-authorizes)
//! 3. The network does not require approval: authorize
//! 4. Otherwise: hold for manual review
//!
//! Whether central mode outranks an invalid invite is not settled, so it is a
//! policy switch rather than a fixed order.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ztnet_core::{Member, Role};

/// Invite presented with a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InviteStatus {
    NotPresented,
    Valid(Role),
    /// Unknown, expired or otherwise unusable
    Invalid,
}

impl InviteStatus {
    pub fn is_presented(self) -> bool {
        self != InviteStatus::NotPresented
    }
}

/// Inputs to one decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GateContext {
    pub invite: InviteStatus,
    pub central_api_mode: bool,
    pub network_requires_approval: bool,
}

impl GateContext {
    pub fn new(invite: InviteStatus, central_api_mode: bool, network_requires_approval: bool) -> Self {
        GateContext {
            invite,
            central_api_mode,
            network_requires_approval,
        }
    }
}

/// Gate outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Authorize,
    Deny,
    RequireManualReview,
}

/// Tunable precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    /// Central API mode authorizes even when an invalid invite was presented
    pub central_overrides_invalid_invite: bool,
    /// A valid invite from a role that may modify counts as approval
    pub invite_preapproves: bool,
}

impl GatePolicy {
    /// Decide for one member
    pub fn decide(&self, member: &Member, context: &GateContext) -> Decision {
        let invalid_invite = context.invite == InviteStatus::Invalid;

        let decision = if invalid_invite && !(self.central_overrides_invalid_invite && context.central_api_mode) {
            Decision::Deny
        } else if context.central_api_mode || !context.network_requires_approval {
            Decision::Authorize
        } else {
            match context.invite {
                InviteStatus::Valid(role) if self.invite_preapproves && role.can_modify() => Decision::Authorize,
                _ => Decision::RequireManualReview,
            }
        };

        debug!(nwid = %member.nwid, member = %member.id, ?context, ?decision, "Gate decision");
        decision
    }
}

/// Decide with the default policy
pub fn decide(member: &Member, context: &GateContext) -> Decision {
    GatePolicy::default().decide(member, context)
}

/// Gate statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub authorized: u64,
    pub denied: u64,
    pub held_for_review: u64,
}

/// The single writer of `Member::authorized`
#[derive(Debug, Default)]
pub struct AuthorizationGate {
    policy: GatePolicy,
    stats: Mutex<GateStats>,
}

impl AuthorizationGate {
    pub fn new(policy: GatePolicy) -> Self {
        AuthorizationGate {
            policy,
            stats: Mutex::new(GateStats::default()),
        }
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// Decide and write the result onto the member
    ///
    /// Manual review leaves the member unauthorized until an operator acts.
    pub fn admit(&self, member: &mut Member, context: &GateContext) -> Decision {
        let decision = self.policy.decide(member, context);
        self.record(member, decision);
        decision
    }

    /// Apply an operator's review outcome
    pub fn review(&self, member: &mut Member, approve: bool) -> Decision {
        let decision = if approve { Decision::Authorize } else { Decision::Deny };
        self.record(member, decision);
        decision
    }

    fn record(&self, member: &mut Member, decision: Decision) {
        let mut stats = self.stats.lock();
        let authorized = match decision {
            Decision::Authorize => {
                stats.authorized += 1;
                true
            }
            Decision::Deny => {
                stats.denied += 1;
                false
            }
            Decision::RequireManualReview => {
                stats.held_for_review += 1;
                false
            }
        };

        if member.authorized != authorized {
            member.authorized = authorized;
            member.touch();
            info!(nwid = %member.nwid, member = %member.id, authorized, "Member authorization changed");
        }
    }

    pub fn stats(&self) -> GateStats {
        *self.stats.lock()
    }
}
