//! How the current environment is tracked.

use crate::environment::manager::Environment;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Decides which environment is current for the caller.
///
/// A manager has at most one policy. The policy owns the notion of "current";
/// the manager owns the environments themselves.
pub trait EnvironmentPolicy: Send + Sync {
    /// Called once when the policy is installed.
    fn on_policy_registered(&self) {}

    /// Called once when the policy is removed, after every environment was
    /// destroyed.
    fn on_policy_cleared(&self) {}

    /// Environment current for the caller, if any.
    fn current_environment(&self) -> Option<Environment>;

    /// Make `environment` current for the caller and return the previous one.
    fn set_environment(&self, environment: Option<Environment>) -> Option<Environment>;
}

thread_local! {
    static CURRENT: RefCell<HashMap<u64, Environment>> = RefCell::new(HashMap::new());
}

static NEXT_POLICY_ID: AtomicU64 = AtomicU64::new(0);

/// One current environment per thread.
///
/// Instances are independent: two policies on the same thread track
/// separate current environments.
pub struct ThreadLocalPolicy {
    id: u64,
}

impl ThreadLocalPolicy {
    /// Create a policy with its own per-thread slot.
    pub fn new() -> Self {
        Self {
            id: NEXT_POLICY_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for ThreadLocalPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentPolicy for ThreadLocalPolicy {
    fn on_policy_cleared(&self) {
        // Other threads drop their slots when their guards unwind.
        let stale = CURRENT.with(|current| current.borrow_mut().remove(&self.id));
        drop(stale);
    }

    fn current_environment(&self) -> Option<Environment> {
        CURRENT.with(|current| current.borrow().get(&self.id).cloned())
    }

    fn set_environment(&self, environment: Option<Environment>) -> Option<Environment> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            match environment {
                Some(environment) => current.insert(self.id, environment),
                None => current.remove(&self.id),
            }
        })
    }
}
