//! Controller chaos
//!
//! Wraps a [`MemoryController`] and injects the failures a real controller
//! produces:
//! - Stalled calls, which surface as timeouts through the engine
//! - Batches applied only in part
//! - Rejected batches
//! - Out-of-band edits right after a successful write

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;
use ztnet_controller::{ApplyOutcome, ControllerApi, MemoryController};
use ztnet_core::{
    ControllerMemberState, ControllerNetworkState, ConvergenceError, MemberId, MemberIntent,
    NetworkId, NetworkIntent,
};

/// Fault probabilities, each 0.0 - 1.0
#[derive(Clone, Debug, PartialEq)]
pub struct ChaosConfig {
    /// A call hangs for `stall`
    pub stall_prob: f64,
    pub stall: Duration,
    /// A write lands only in part
    pub partial_prob: f64,
    /// A write is refused outright
    pub reject_prob: f64,
    /// Someone edits the member on the controller right after a write
    pub drift_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            stall_prob: 0.02,
            stall: Duration::from_secs(60),
            partial_prob: 0.05,
            reject_prob: 0.02,
            drift_prob: 0.02,
        }
    }
}

impl ChaosConfig {
    /// No faults
    pub fn calm() -> Self {
        ChaosConfig {
            stall_prob: 0.0,
            partial_prob: 0.0,
            reject_prob: 0.0,
            drift_prob: 0.0,
            ..Default::default()
        }
    }

    /// Overloaded self-hosted controller
    pub fn flaky() -> Self {
        ChaosConfig {
            stall_prob: 0.1,
            partial_prob: 0.1,
            reject_prob: 0.05,
            drift_prob: 0.05,
            ..Default::default()
        }
    }

    /// Controller shared with other writers on a bad link
    pub fn hostile() -> Self {
        ChaosConfig {
            stall_prob: 0.2,
            partial_prob: 0.25,
            reject_prob: 0.15,
            drift_prob: 0.1,
            ..Default::default()
        }
    }
}

/// Injected fault counts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub calls: u64,
    pub stalls: u64,
    pub partials: u64,
    pub rejects: u64,
    pub drifts: u64,
}

impl ChaosStats {
    pub fn faults(&self) -> u64 {
        self.stalls + self.partials + self.rejects + self.drifts
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    None,
    Stall,
    Partial,
    Reject,
}

/// Controller with seeded fault injection
pub struct ChaosController {
    inner: Arc<MemoryController>,
    config: Mutex<ChaosConfig>,
    rng: Mutex<StdRng>,
    stats: Mutex<ChaosStats>,
}

impl ChaosController {
    pub fn new(inner: Arc<MemoryController>, config: ChaosConfig, seed: u64) -> Self {
        ChaosController {
            inner,
            config: Mutex::new(config),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            stats: Mutex::new(ChaosStats::default()),
        }
    }

    pub fn calm(inner: Arc<MemoryController>) -> Self {
        Self::new(inner, ChaosConfig::calm(), 0)
    }

    pub fn inner(&self) -> &Arc<MemoryController> {
        &self.inner
    }

    /// Change fault rates mid-run, e.g. to let a network heal
    pub fn set_config(&self, config: ChaosConfig) {
        *self.config.lock() = config;
    }

    pub fn stats(&self) -> ChaosStats {
        self.stats.lock().clone()
    }

    fn roll_read(&self) -> Fault {
        let config = self.config.lock().clone();
        let mut stats = self.stats.lock();
        stats.calls += 1;
        if self.rng.lock().gen::<f64>() < config.stall_prob {
            stats.stalls += 1;
            return Fault::Stall;
        }
        Fault::None
    }

    fn roll_write(&self) -> Fault {
        let config = self.config.lock().clone();
        let roll: f64 = self.rng.lock().gen();
        let mut stats = self.stats.lock();
        stats.calls += 1;

        if roll < config.stall_prob {
            stats.stalls += 1;
            Fault::Stall
        } else if roll < config.stall_prob + config.reject_prob {
            stats.rejects += 1;
            Fault::Reject
        } else if roll < config.stall_prob + config.reject_prob + config.partial_prob {
            stats.partials += 1;
            Fault::Partial
        } else {
            Fault::None
        }
    }

    fn roll_drift(&self) -> bool {
        let drift_prob = self.config.lock().drift_prob;
        let drift = self.rng.lock().gen::<f64>() < drift_prob;
        if drift {
            self.stats.lock().drifts += 1;
        }
        drift
    }

    /// Intents that land before a partial write gives up
    fn partial_len(&self, len: usize) -> usize {
        if len <= 1 {
            0
        } else {
            self.rng.lock().gen_range(1..len)
        }
    }

    async fn stall(&self) {
        let stall = self.config.lock().stall;
        tokio::time::sleep(stall).await;
    }
}

#[async_trait]
impl ControllerApi for ChaosController {
    async fn read_network(&self, nwid: NetworkId) -> Result<ControllerNetworkState, ConvergenceError> {
        if self.roll_read() == Fault::Stall {
            self.stall().await;
        }
        self.inner.read_network(nwid).await
    }

    async fn read_members(&self, nwid: NetworkId) -> Result<Vec<ControllerMemberState>, ConvergenceError> {
        if self.roll_read() == Fault::Stall {
            self.stall().await;
        }
        self.inner.read_members(nwid).await
    }

    async fn apply_member_intents(
        &self,
        nwid: NetworkId,
        member: MemberId,
        intents: &[MemberIntent],
    ) -> Result<ApplyOutcome, ConvergenceError> {
        match self.roll_write() {
            Fault::Stall => {
                self.stall().await;
                self.inner.apply_member_intents(nwid, member, intents).await
            }
            Fault::Reject => {
                debug!(%nwid, %member, "Injected rejection");
                Ok(ApplyOutcome::Rejected("injected rejection".to_string()))
            }
            Fault::Partial => {
                let landed = self.partial_len(intents.len());
                debug!(%nwid, %member, landed, of = intents.len(), "Injected partial write");
                self.inner.apply_member_intents(nwid, member, &intents[..landed]).await?;
                Ok(ApplyOutcome::Partial)
            }
            Fault::None => {
                let outcome = self.inner.apply_member_intents(nwid, member, intents).await?;
                if self.roll_drift() {
                    debug!(%nwid, %member, "Injected out-of-band edit");
                    self.inner.edit_member(nwid, member, |m| m.active_bridge = !m.active_bridge);
                }
                Ok(outcome)
            }
        }
    }

    async fn apply_network_intents(
        &self,
        nwid: NetworkId,
        intents: &[NetworkIntent],
    ) -> Result<ApplyOutcome, ConvergenceError> {
        match self.roll_write() {
            Fault::Stall => {
                self.stall().await;
                self.inner.apply_network_intents(nwid, intents).await
            }
            Fault::Reject => Ok(ApplyOutcome::Rejected("injected rejection".to_string())),
            Fault::Partial => {
                let landed = self.partial_len(intents.len());
                self.inner.apply_network_intents(nwid, &intents[..landed]).await?;
                Ok(ApplyOutcome::Partial)
            }
            Fault::None => self.inner.apply_network_intents(nwid, intents).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nwid() -> NetworkId {
        NetworkId::new(0x8056_c2e2_1c00_0001)
    }

    fn chaos(config: ChaosConfig) -> ChaosController {
        let inner = Arc::new(MemoryController::new());
        inner.create_network(nwid());
        ChaosController::new(inner, config, 7)
    }

    #[tokio::test]
    async fn test_calm_is_transparent() {
        let controller = chaos(ChaosConfig::calm());
        let id = MemberId::new(0x42);

        for _ in 0..100 {
            let outcome = controller
                .apply_member_intents(nwid(), id, &[MemberIntent::SetAuthorized(true)])
                .await
                .unwrap();
            assert_eq!(outcome, ApplyOutcome::Accepted);
        }
        assert_eq!(controller.stats().faults(), 0);
        assert_eq!(controller.stats().calls, 100);
    }

    #[tokio::test]
    async fn test_reject_applies_nothing() {
        let controller = chaos(ChaosConfig {
            reject_prob: 1.0,
            ..ChaosConfig::calm()
        });
        let id = MemberId::new(0x42);

        let outcome = controller
            .apply_member_intents(nwid(), id, &[MemberIntent::SetAuthorized(true)])
            .await
            .unwrap();

        assert!(matches!(outcome, ApplyOutcome::Rejected(_)));
        assert!(controller.inner().member(nwid(), id).is_none());
    }

    #[tokio::test]
    async fn test_partial_applies_prefix() {
        let controller = chaos(ChaosConfig {
            partial_prob: 1.0,
            ..ChaosConfig::calm()
        });
        let id = MemberId::new(0x42);
        let intents = [MemberIntent::SetActiveBridge(true), MemberIntent::SetAuthorized(true)];

        let outcome = controller.apply_member_intents(nwid(), id, &intents).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Partial);
        let state = controller.inner().member(nwid(), id).unwrap();
        assert!(state.active_bridge);
        assert!(!state.authorized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_exceeds_timeout() {
        let controller = chaos(ChaosConfig {
            stall_prob: 1.0,
            ..ChaosConfig::calm()
        });

        let read = tokio::time::timeout(Duration::from_secs(5), controller.read_network(nwid())).await;
        assert!(read.is_err());
        assert_eq!(controller.stats().stalls, 1);
    }

    #[tokio::test]
    async fn test_drift_edits_member() {
        let controller = chaos(ChaosConfig {
            drift_prob: 1.0,
            ..ChaosConfig::calm()
        });
        let id = MemberId::new(0x42);

        controller.apply_member_intents(nwid(), id, &[]).await.unwrap();
        assert!(controller.inner().member(nwid(), id).unwrap().active_bridge);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_faults() {
        let run = |seed| async move {
            let inner = Arc::new(MemoryController::new());
            inner.create_network(nwid());
            let controller = ChaosController::new(inner, ChaosConfig::hostile(), seed);
            let mut outcomes = Vec::new();
            for n in 0..50 {
                let outcome = controller
                    .apply_member_intents(nwid(), MemberId::new(n), &[MemberIntent::SetAuthorized(true)])
                    .await;
                outcomes.push(outcome);
            }
            outcomes
        };

        assert_eq!(run(3).await, run(3).await);
    }
}
