//! Bounded controller calls
//!
//! Every call through [`TimedController`] is wrapped in a tokio timeout. An
//! elapsed call becomes [`ConvergenceError::Timeout`], which callers treat as
//! transient: nothing is assumed to have changed on the controller.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::warn;
use ztnet_core::{
    ControllerMemberState, ControllerNetworkState, ConvergenceError, MemberId, MemberIntent,
    NetworkId, NetworkIntent,
};

use crate::{ApplyOutcome, ControllerApi};

/// Call statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub calls: u64,
    pub timeouts: u64,
    pub errors: u64,
}

/// Controller wrapper enforcing a per-call timeout
pub struct TimedController<C> {
    inner: C,
    timeout: Duration,
    stats: Mutex<CallStats>,
}

impl<C: ControllerApi> TimedController<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        TimedController {
            inner,
            timeout,
            stats: Mutex::new(CallStats::default()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> CallStats {
        *self.stats.lock()
    }

    async fn bounded<T, F>(&self, op: &'static str, nwid: NetworkId, call: F) -> Result<T, ConvergenceError>
    where
        F: Future<Output = Result<T, ConvergenceError>> + Send,
    {
        self.stats.lock().calls += 1;

        match timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.stats.lock().errors += 1;
                Err(e)
            }
            Err(_) => {
                self.stats.lock().timeouts += 1;
                warn!(%nwid, op, timeout = ?self.timeout, "Controller call timed out");
                Err(ConvergenceError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl<C: ControllerApi> ControllerApi for TimedController<C> {
    async fn read_network(&self, nwid: NetworkId) -> Result<ControllerNetworkState, ConvergenceError> {
        self.bounded("read_network", nwid, self.inner.read_network(nwid)).await
    }

    async fn read_members(&self, nwid: NetworkId) -> Result<Vec<ControllerMemberState>, ConvergenceError> {
        self.bounded("read_members", nwid, self.inner.read_members(nwid)).await
    }

    async fn apply_member_intents(
        &self,
        nwid: NetworkId,
        member: MemberId,
        intents: &[MemberIntent],
    ) -> Result<ApplyOutcome, ConvergenceError> {
        self.bounded(
            "apply_member_intents",
            nwid,
            self.inner.apply_member_intents(nwid, member, intents),
        )
        .await
    }

    async fn apply_network_intents(
        &self,
        nwid: NetworkId,
        intents: &[NetworkIntent],
    ) -> Result<ApplyOutcome, ConvergenceError> {
        self.bounded(
            "apply_network_intents",
            nwid,
            self.inner.apply_network_intents(nwid, intents),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztnet_core::Network;

    /// Controller that answers after a fixed delay
    struct SlowController {
        delay: Duration,
    }

    #[async_trait]
    impl ControllerApi for SlowController {
        async fn read_network(&self, nwid: NetworkId) -> Result<ControllerNetworkState, ConvergenceError> {
            tokio::time::sleep(self.delay).await;
            Ok(ControllerNetworkState::from_desired(&Network::new(nwid, "slow")))
        }

        async fn read_members(&self, _nwid: NetworkId) -> Result<Vec<ControllerMemberState>, ConvergenceError> {
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        }

        async fn apply_member_intents(
            &self,
            _nwid: NetworkId,
            _member: MemberId,
            _intents: &[MemberIntent],
        ) -> Result<ApplyOutcome, ConvergenceError> {
            tokio::time::sleep(self.delay).await;
            Ok(ApplyOutcome::Accepted)
        }

        async fn apply_network_intents(
            &self,
            nwid: NetworkId,
            _intents: &[NetworkIntent],
        ) -> Result<ApplyOutcome, ConvergenceError> {
            Err(ConvergenceError::NetworkGone(nwid))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_convergence_error() {
        let controller = TimedController::new(
            SlowController { delay: Duration::from_secs(30) },
            Duration::from_secs(5),
        );

        let result = controller.read_network(NetworkId::new(1)).await;
        assert_eq!(result, Err(ConvergenceError::Timeout(Duration::from_secs(5))));
        assert!(result.unwrap_err().is_transient());
        assert_eq!(controller.stats().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let controller = TimedController::new(
            SlowController { delay: Duration::from_millis(10) },
            Duration::from_secs(5),
        );

        let outcome = controller
            .apply_member_intents(NetworkId::new(1), MemberId::new(2), &[MemberIntent::SetAuthorized(true)])
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Accepted);

        assert!(controller.apply_network_intents(NetworkId::new(1), &[]).await.is_err());
        assert_eq!(controller.stats(), CallStats { calls: 2, timeouts: 0, errors: 1 });
    }
}
