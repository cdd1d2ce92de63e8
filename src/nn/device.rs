//! Device manager: multiplexes model replicas between inference and learning.
//!
//! One replica per compute device. Replica 0 is the learner's device. Callers
//! never touch a replica directly; they borrow it through a `DeviceLoan`,
//! which is returned when dropped.
//!
//! While the learning-exclusive flag is set, no new inference loan is granted
//! on replica 0. Inference callers that do not name a device are routed to
//! the other replicas; callers that must use replica 0 wait.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use super::traits::ValueEstimator;
use crate::core::Result;

/// What a loan is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoanKind {
    Inference,
    Learning,
}

#[derive(Debug, Default)]
struct LoanState {
    /// Outstanding loans per replica.
    active: Vec<usize>,
    /// Replica 0 refuses new inference loans.
    learning_exclusive: bool,
    /// A learning loan on replica 0 is outstanding.
    learning_loan: bool,
}

/// Owns one model replica per device and hands out scoped loans.
pub struct DeviceManager {
    replicas: Vec<Arc<dyn ValueEstimator>>,
    state: Mutex<LoanState>,
    released: Condvar,
}

impl fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let devices: Vec<&str> = self.replicas.iter().map(|r| r.device()).collect();
        f.debug_struct("DeviceManager")
            .field("devices", &devices)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            replicas: Vec::new(),
            state: Mutex::new(LoanState::default()),
            released: Condvar::new(),
        }
    }

    /// Append a replica. Setup only; devices are fixed once loans start.
    pub fn add_device(&mut self, replica: Arc<dyn ValueEstimator>) {
        self.replicas.push(replica);
        self.state.get_mut().active.push(0);
    }

    /// Number of replicas.
    #[must_use]
    pub fn count(&self) -> usize {
        self.replicas.len()
    }

    /// Device names, in replica order.
    pub fn device_names(&self) -> Vec<String> {
        self.replicas.iter().map(|r| r.device().to_owned()).collect()
    }

    /// Borrow a replica for inference.
    ///
    /// `device` pins the replica; `None` picks the least loaded one, avoiding
    /// replica 0 while it is learning-exclusive. `batch_hint` is advisory.
    ///
    /// # Panics
    /// Panics if there are no replicas or `device` is out of range.
    pub fn get(&self, batch_hint: usize, device: Option<usize>) -> DeviceLoan<'_> {
        assert!(!self.replicas.is_empty(), "DeviceManager has no devices");
        if let Some(index) = device {
            assert!(
                index < self.replicas.len(),
                "Device index {index} out of range ({} devices)",
                self.replicas.len()
            );
        }

        let mut state = self.state.lock();
        let index = loop {
            let candidate = match device {
                Some(index) => index,
                None => Self::least_loaded(&state),
            };
            if candidate != 0 || !state.learning_exclusive {
                break candidate;
            }
            self.released.wait(&mut state);
        };
        state.active[index] += 1;
        drop(state);

        trace!("inference loan on replica {index} (batch {batch_hint})");
        DeviceLoan {
            manager: self,
            index,
            kind: LoanKind::Inference,
        }
    }

    /// Borrow replica 0 for a training step.
    ///
    /// Never waits on the learning-exclusive flag: the learner owns it.
    ///
    /// # Panics
    /// Panics if a learning loan is already outstanding.
    pub fn learn(&self, batch_hint: usize) -> DeviceLoan<'_> {
        assert!(!self.replicas.is_empty(), "DeviceManager has no devices");
        let mut state = self.state.lock();
        assert!(
            !state.learning_loan,
            "Replica 0 already has an outstanding learning loan"
        );
        state.learning_loan = true;
        state.active[0] += 1;
        drop(state);

        debug!("learning loan on {} (batch {batch_hint})", self.replicas[0].device());
        DeviceLoan {
            manager: self,
            index: 0,
            kind: LoanKind::Learning,
        }
    }

    /// Mark replica 0 learning-exclusive (or release it).
    pub fn set_learning(&self, learning: bool) {
        let mut state = self.state.lock();
        state.learning_exclusive = learning;
        if !learning {
            self.released.notify_all();
        }
    }

    #[must_use]
    pub fn is_learning(&self) -> bool {
        self.state.lock().learning_exclusive
    }

    /// Outstanding loans on replica `index`. Racy; for telemetry.
    #[must_use]
    pub fn active_requests(&self, index: usize) -> usize {
        self.state.lock().active.get(index).copied().unwrap_or(0)
    }

    /// Load `locator` into every replica, optionally skipping replica 0.
    ///
    /// Replicas are loaded in order through inference loans. Loans are
    /// shared, so batches already running on a replica are not waited for:
    /// a load is atomic only as far as the replica's own synchronisation
    /// makes it.
    pub fn load_checkpoint_all(&self, locator: &str, skip_primary: bool) -> Result<()> {
        let first = usize::from(skip_primary);
        for index in first..self.count() {
            self.get(0, Some(index)).load_checkpoint(locator)?;
        }
        Ok(())
    }

    /// Replica 0 is skipped when it is learning-exclusive and another exists.
    fn least_loaded(state: &LoanState) -> usize {
        let skip_primary = state.learning_exclusive && state.active.len() > 1;
        state
            .active
            .iter()
            .enumerate()
            .filter(|&(i, _)| !(skip_primary && i == 0))
            .min_by_key(|&(_, &n)| n)
            .map_or(0, |(i, _)| i)
    }

    fn release(&self, index: usize, kind: LoanKind) {
        let mut state = self.state.lock();
        state.active[index] -= 1;
        if kind == LoanKind::Learning {
            state.learning_loan = false;
        }
        self.released.notify_all();
    }
}

/// A scoped claim on one replica. Dereferences to the replica.
pub struct DeviceLoan<'a> {
    manager: &'a DeviceManager,
    index: usize,
    kind: LoanKind,
}

impl DeviceLoan<'_> {
    /// Replica index this loan holds.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn kind(&self) -> LoanKind {
        self.kind
    }
}

impl Deref for DeviceLoan<'_> {
    type Target = dyn ValueEstimator;

    fn deref(&self) -> &Self::Target {
        self.manager.replicas[self.index].as_ref()
    }
}

impl fmt::Debug for DeviceLoan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLoan")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for DeviceLoan<'_> {
    fn drop(&mut self) {
        self.manager.release(self.index, self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{CheckpointId, LossInfo};
    use crate::training::TrainingExample;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct Named(String);

    impl ValueEstimator for Named {
        fn device(&self) -> &str {
            &self.0
        }
        fn evaluate(&self, observations: &[Vec<f32>]) -> Vec<f32> {
            vec![0.0; observations.len()]
        }
        fn learn(&self, _batch: &[TrainingExample]) -> LossInfo {
            LossInfo::new(0.0, 0.0)
        }
        fn save_checkpoint(&self, id: CheckpointId) -> Result<String> {
            Ok(self.checkpoint_locator(id))
        }
        fn load_checkpoint(&self, _locator: &str) -> Result<()> {
            Ok(())
        }
        fn checkpoint_locator(&self, id: CheckpointId) -> String {
            format!("{}/{}", self.0, id)
        }
    }

    fn manager(n: usize) -> DeviceManager {
        let mut manager = DeviceManager::new();
        for i in 0..n {
            manager.add_device(Arc::new(Named(format!("dev{i}"))));
        }
        manager
    }

    #[test]
    fn test_loan_counts() {
        let manager = manager(2);
        {
            let a = manager.get(1, Some(1));
            let _b = manager.get(1, Some(1));
            assert_eq!(a.device(), "dev1");
            assert_eq!(manager.active_requests(1), 2);
        }
        assert_eq!(manager.active_requests(1), 0);
    }

    #[test]
    fn test_least_loaded_selection() {
        let manager = manager(3);
        let a = manager.get(1, None);
        let b = manager.get(1, None);
        let c = manager.get(1, None);

        let mut used = vec![a.index(), b.index(), c.index()];
        used.sort_unstable();
        assert_eq!(used, vec![0, 1, 2]);
    }

    #[test]
    fn test_unpinned_skips_learning_primary() {
        let manager = manager(2);
        manager.set_learning(true);
        for _ in 0..4 {
            assert_eq!(manager.get(1, None).index(), 1);
        }
    }

    #[test]
    fn test_pinned_primary_waits_for_learning() {
        let manager = Arc::new(manager(2));
        manager.set_learning(true);

        let (tx, rx) = mpsc::channel();
        let handle = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let loan = manager.get(1, Some(0));
                tx.send(loan.index()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        manager.set_learning(false);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_learning_loan_ignores_flag() {
        let manager = manager(1);
        manager.set_learning(true);
        let loan = manager.learn(32);
        assert_eq!(loan.kind(), LoanKind::Learning);
        assert_eq!(loan.index(), 0);
    }

    #[test]
    #[should_panic(expected = "outstanding learning loan")]
    fn test_double_learning_loan_panics() {
        let manager = manager(1);
        let _a = manager.learn(1);
        let _b = manager.learn(1);
    }

    #[test]
    fn test_learning_loan_released_on_drop() {
        let manager = manager(1);
        drop(manager.learn(1));
        let _again = manager.learn(1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        let manager = manager(2);
        let _ = manager.get(1, Some(2));
    }

    #[test]
    fn test_load_checkpoint_all() {
        let manager = manager(3);
        assert!(manager.load_checkpoint_all("x", true).is_ok());
        assert!(manager.load_checkpoint_all("x", false).is_ok());
        assert_eq!(manager.device_names(), vec!["dev0", "dev1", "dev2"]);
    }
}
