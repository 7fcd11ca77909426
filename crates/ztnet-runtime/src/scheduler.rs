//! Per-network pass scheduling
//!
//! At most one pass runs per network. A trigger that arrives while a pass is
//! in flight marks the network dirty and returns; the running pass re-runs once
//! it completes, up to a configured number of times. Deleting a network
//! cancels its in-flight pass. Administrative steps that must not interleave
//! with a pass wait for the network with [`PassScheduler::claim`].

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;
use ztnet_core::NetworkId;

#[derive(Debug, Default)]
struct Slot {
    dirty: bool,
    cancelled: bool,
    reruns: u32,
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: u64,
    pub claimed: u64,
    pub coalesced: u64,
    pub reruns: u64,
    pub cancelled: u64,
    /// Triggers still pending when the rerun budget ran out
    pub deferred: u64,
}

/// Tracks which networks have a pass in flight
#[derive(Debug)]
pub struct PassScheduler {
    slots: Mutex<HashMap<NetworkId, Slot>>,
    released: Notify,
    max_reruns: u32,
    stats: Mutex<SchedulerStats>,
}

impl PassScheduler {
    pub fn new(max_reruns: u32) -> Self {
        PassScheduler {
            slots: Mutex::new(HashMap::new()),
            released: Notify::new(),
            max_reruns,
            stats: Mutex::new(SchedulerStats::default()),
        }
    }

    fn ticket(&self, nwid: NetworkId) -> PassTicket<'_> {
        PassTicket {
            scheduler: self,
            nwid,
            released: false,
            pending: false,
        }
    }

    /// Claim the network for a pass
    ///
    /// Returns `None` when a pass is already in flight; the trigger is folded
    /// into that pass.
    pub fn begin(&self, nwid: NetworkId) -> Option<PassTicket<'_>> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&nwid) {
            if !slot.cancelled {
                slot.dirty = true;
            }
            self.stats.lock().coalesced += 1;
            debug!(%nwid, "Pass already in flight, trigger coalesced");
            return None;
        }

        slots.insert(nwid, Slot::default());
        self.stats.lock().started += 1;
        Some(self.ticket(nwid))
    }

    /// Wait until no pass is in flight, then hold the network
    ///
    /// Triggers arriving while the ticket is held coalesce into it as they do
    /// for a pass.
    pub async fn claim(&self, nwid: NetworkId) -> PassTicket<'_> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut slots = self.slots.lock();
                if !slots.contains_key(&nwid) {
                    slots.insert(nwid, Slot::default());
                    self.stats.lock().claimed += 1;
                    return self.ticket(nwid);
                }
            }

            debug!(%nwid, "Waiting for in-flight pass");
            released.await;
        }
    }

    /// Cancel the network's in-flight pass, if any
    pub fn cancel(&self, nwid: NetworkId) -> bool {
        match self.slots.lock().get_mut(&nwid) {
            Some(slot) => {
                slot.cancelled = true;
                slot.dirty = false;
                self.stats.lock().cancelled += 1;
                debug!(%nwid, "In-flight pass cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, nwid: NetworkId) -> bool {
        self.slots.lock().contains_key(&nwid)
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock()
    }

    fn release(&self, slots: &mut HashMap<NetworkId, Slot>, nwid: NetworkId) {
        slots.remove(&nwid);
        self.released.notify_waiters();
    }
}

/// Exclusive right to run passes for one network
///
/// Dropping the ticket frees the network, including when the pass future is
/// dropped midway.
#[derive(Debug)]
pub struct PassTicket<'a> {
    scheduler: &'a PassScheduler,
    nwid: NetworkId,
    released: bool,
    pending: bool,
}

impl PassTicket<'_> {
    pub fn nwid(&self) -> NetworkId {
        self.nwid
    }

    pub fn is_cancelled(&self) -> bool {
        self.released
            || self
                .scheduler
                .slots
                .lock()
                .get(&self.nwid)
                .map_or(true, |slot| slot.cancelled)
    }

    /// Run `f` unless the pass was cancelled
    ///
    /// Cancellation waits for `f` to finish, so state recorded by `f` is
    /// never left behind for a deleted network. `f` must not call back into
    /// the scheduler.
    pub fn while_live<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if self.released {
            return None;
        }
        let slots = self.scheduler.slots.lock();
        match slots.get(&self.nwid) {
            Some(slot) if !slot.cancelled => Some(f()),
            _ => None,
        }
    }

    /// Check whether a coalesced trigger asks for another pass
    ///
    /// Returns false once the work is over and frees the network in the same
    /// step, so no trigger can land between the check and the release.
    pub fn rerun(&mut self) -> bool {
        if self.released {
            return false;
        }

        let mut slots = self.scheduler.slots.lock();
        if let Some(slot) = slots.get_mut(&self.nwid) {
            if slot.dirty && !slot.cancelled {
                if slot.reruns < self.scheduler.max_reruns {
                    slot.dirty = false;
                    slot.reruns += 1;
                    self.scheduler.stats.lock().reruns += 1;
                    return true;
                }
                debug!(nwid = %self.nwid, reruns = slot.reruns, "Rerun limit reached");
                self.scheduler.stats.lock().deferred += 1;
                self.pending = true;
            }
        }

        self.scheduler.release(&mut slots, self.nwid);
        self.released = true;
        false
    }

    /// A trigger arrived after the rerun budget was spent
    pub fn pending(&self) -> bool {
        self.pending
    }
}

impl Drop for PassTicket<'_> {
    fn drop(&mut self) {
        if !self.released {
            let mut slots = self.scheduler.slots.lock();
            self.scheduler.release(&mut slots, self.nwid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn nwid() -> NetworkId {
        NetworkId::new(0x8056_c2e2_1c00_0001)
    }

    #[test]
    fn test_single_pass_per_network() {
        let scheduler = PassScheduler::new(1);
        let ticket = scheduler.begin(nwid()).unwrap();

        assert!(scheduler.begin(nwid()).is_none());
        // Other networks are independent
        assert!(scheduler.begin(NetworkId::new(2)).is_some());

        drop(ticket);
        assert!(scheduler.begin(nwid()).is_some());
    }

    #[test]
    fn test_coalesced_triggers_rerun_once() {
        let scheduler = PassScheduler::new(1);
        let mut ticket = scheduler.begin(nwid()).unwrap();

        assert!(scheduler.begin(nwid()).is_none());
        assert!(scheduler.begin(nwid()).is_none());
        assert!(ticket.rerun());

        assert!(scheduler.begin(nwid()).is_none());
        assert!(!ticket.rerun());
        assert!(ticket.pending());

        let stats = scheduler.stats();
        assert_eq!(stats.coalesced, 3);
        assert_eq!(stats.reruns, 1);
        assert_eq!(stats.deferred, 1);
    }

    #[test]
    fn test_finished_ticket_frees_network_at_once() {
        let scheduler = PassScheduler::new(1);
        let mut ticket = scheduler.begin(nwid()).unwrap();

        assert!(!ticket.rerun());
        assert!(!ticket.pending());
        assert!(!scheduler.is_running(nwid()));

        // A later pass is not torn down by the finished ticket
        let next = scheduler.begin(nwid()).unwrap();
        drop(ticket);
        assert!(scheduler.is_running(nwid()));
        drop(next);
    }

    #[test]
    fn test_cancel_stops_reruns() {
        let scheduler = PassScheduler::new(3);
        let mut ticket = scheduler.begin(nwid()).unwrap();
        assert!(scheduler.begin(nwid()).is_none());

        assert!(scheduler.cancel(nwid()));
        assert!(ticket.is_cancelled());
        assert!(!ticket.rerun());
        assert!(!ticket.pending());
        assert!(!scheduler.cancel(NetworkId::new(2)));
    }

    #[test]
    fn test_while_live_skips_after_cancel() {
        let scheduler = PassScheduler::new(1);
        let ticket = scheduler.begin(nwid()).unwrap();

        assert_eq!(ticket.while_live(|| 7), Some(7));
        scheduler.cancel(nwid());
        assert_eq!(ticket.while_live(|| 7), None);
    }

    #[test]
    fn test_drop_frees_network() {
        let scheduler = PassScheduler::new(1);
        {
            let _ticket = scheduler.begin(nwid()).unwrap();
            assert!(scheduler.is_running(nwid()));
        }
        assert!(!scheduler.is_running(nwid()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_waits_for_pass() {
        let scheduler = Arc::new(PassScheduler::new(1));
        let ticket = scheduler.begin(nwid()).unwrap();

        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let mut claimed = scheduler.claim(nwid()).await;
                // Triggers during the claim coalesce into it
                let coalesced = scheduler.begin(nwid()).is_none();
                (coalesced, claimed.rerun())
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(ticket);
        assert_eq!(waiter.await.unwrap(), (true, true));
        assert_eq!(scheduler.stats().claimed, 1);
    }
}
