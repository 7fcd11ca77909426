//! Engine simulator
//!
//! Runs a full [`Engine`] against a [`ChaosController`] with in-memory store
//! and invites, and measures how far the controller is from desired state.

use std::sync::Arc;

use ztnet_controller::{Actor, MemoryController, MemoryInvites, MemoryStore, PolicyStore};
use ztnet_core::{unix_millis, MemberId, Network, NetworkId, ZtError, ZtResult};
use ztnet_runtime::{Engine, MemberAddRequest, MemberAdded, RuntimeConfig};
use ztnet_state::{diff_member, diff_network};

use crate::{ChaosConfig, ChaosController};

/// Simulation parameters
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub chaos: ChaosConfig,
    pub runtime: RuntimeConfig,
    /// Upper bound on passes in [`ControllerSimulator::converge`]
    pub max_passes: u32,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            chaos: ChaosConfig::default(),
            runtime: RuntimeConfig::default(),
            max_passes: 50,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    pub fn calm() -> Self {
        SimulationConfig {
            chaos: ChaosConfig::calm(),
            ..Default::default()
        }
    }

    pub fn flaky() -> Self {
        SimulationConfig {
            chaos: ChaosConfig::flaky(),
            ..Default::default()
        }
    }

    pub fn hostile() -> Self {
        SimulationConfig {
            chaos: ChaosConfig::hostile(),
            max_passes: 200,
            ..Default::default()
        }
    }

    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }
}

/// Result of driving a network to convergence
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Convergence {
    pub passes: u32,
    /// Passes that ended in a convergence error
    pub failed_passes: u32,
    pub converged: bool,
    /// Members still differing from desired when the loop stopped
    pub remaining: Vec<MemberId>,
}

/// Engine plus simulated controller
pub struct ControllerSimulator {
    engine: Arc<Engine>,
    controller: Arc<ChaosController>,
    store: Arc<MemoryStore>,
    invites: Arc<MemoryInvites>,
    config: SimulationConfig,
    next_member: u64,
}

impl ControllerSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        let hosted = Arc::new(MemoryController::new());
        let controller = Arc::new(ChaosController::new(hosted, config.chaos.clone(), config.seed));
        let store = Arc::new(MemoryStore::new());
        let invites = Arc::new(MemoryInvites::new());
        let engine = Arc::new(Engine::new(
            config.runtime.clone(),
            controller.clone(),
            store.clone(),
            invites.clone(),
        ));

        ControllerSimulator {
            engine,
            controller,
            store,
            invites,
            config,
            next_member: 0,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn controller(&self) -> &Arc<ChaosController> {
        &self.controller
    }

    /// The controller's own records, without fault injection
    pub fn hosted(&self) -> &Arc<MemoryController> {
        self.controller.inner()
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn invites(&self) -> &Arc<MemoryInvites> {
        &self.invites
    }

    /// Stop injecting faults
    pub fn heal(&self) {
        self.controller.set_config(ChaosConfig::calm());
    }

    /// Create a network with faults paused, so setup always lands
    pub async fn create_network(&self, network: Network) -> ZtResult<()> {
        self.controller.set_config(ChaosConfig::calm());
        let created = self.engine.create_network(&Actor::system(), network).await;
        self.controller.set_config(self.config.chaos.clone());
        created.map(|_| ())
    }

    fn next_id(&mut self) -> String {
        self.next_member += 1;
        format!("{:010x}", 0xaa_0000_0000u64 + self.next_member)
    }

    /// Add a member with a fresh node id
    pub async fn add_member(&mut self, nwid: NetworkId, request: MemberAddRequest) -> ZtResult<MemberAdded> {
        let id = self.next_id();
        self.engine.add_member(&Actor::system(), nwid, &id, request).await
    }

    /// Add `count` members, returning their ids
    pub async fn add_members(&mut self, nwid: NetworkId, count: usize, request: MemberAddRequest) -> ZtResult<Vec<MemberId>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.add_member(nwid, request.clone()).await?.member.id);
        }
        Ok(ids)
    }

    /// Members whose controller record differs from desired
    ///
    /// Orphaned members are skipped; they have no controller record to match.
    pub async fn drift(&self, nwid: NetworkId) -> ZtResult<Vec<MemberId>> {
        let network = self.store.load_network(nwid).await?.ok_or(ZtError::NetworkNotFound(nwid))?;
        let now = unix_millis();

        let mut drifted = Vec::new();
        for member in self.store.load_members(nwid).await? {
            if self.engine.member_phase(nwid, member.id).is_orphaned() {
                continue;
            }
            let observed = self.hosted().member(nwid, member.id);
            if !diff_member(&member, &network, observed.as_ref(), now).batch.is_empty() {
                drifted.push(member.id);
            }
        }
        Ok(drifted)
    }

    /// Check if network configuration matches the controller
    pub async fn network_converged(&self, nwid: NetworkId) -> ZtResult<bool> {
        let network = self.store.load_network(nwid).await?.ok_or(ZtError::NetworkNotFound(nwid))?;
        Ok(self
            .hosted()
            .network(nwid)
            .map_or(false, |hosted| diff_network(&network, &hosted).is_empty()))
    }

    /// Run passes until nothing differs or the pass budget is spent
    ///
    /// Convergence errors count as failed passes; anything else aborts.
    pub async fn converge(&self, nwid: NetworkId) -> ZtResult<Convergence> {
        let mut outcome = Convergence::default();

        while outcome.passes < self.config.max_passes {
            outcome.passes += 1;
            match self.engine.reconcile(nwid).await {
                Ok(report) if report.is_clean() => {}
                Ok(_) => outcome.failed_passes += 1,
                Err(ZtError::Convergence(_)) => outcome.failed_passes += 1,
                Err(e) => return Err(e),
            }

            outcome.remaining = self.drift(nwid).await?;
            if outcome.remaining.is_empty() && self.network_converged(nwid).await? {
                outcome.converged = true;
                break;
            }
        }

        Ok(outcome)
    }
}
