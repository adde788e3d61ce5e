//! Isolated execution contexts.
//!
//! An [`Environment`] owns a [`Core`](crate::execution::engine::Core) plus
//! per-environment [`Local`] values and on-destroy callbacks. Which one is
//! current is decided by the manager's [`EnvironmentPolicy`]; the default
//! tracks it per thread. [`Environment::enter`] returns a guard that makes it
//! current for a scope.

pub mod local;
pub mod manager;
pub mod policy;

pub use local::Local;
pub use manager::{
    CallbackHandle, Environment, EnvironmentGuard, EnvironmentManager, EnvironmentState,
};
pub use policy::{EnvironmentPolicy, ThreadLocalPolicy};

use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<EnvironmentManager> = OnceLock::new();

/// Process-wide manager with a [`ThreadLocalPolicy`] installed.
pub fn global() -> &'static EnvironmentManager {
    GLOBAL.get_or_init(|| EnvironmentManager::with_policy(Arc::new(ThreadLocalPolicy::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_shared() {
        assert!(global().has_policy());
        let env = global().create_environment().unwrap();
        assert!(global().get(env.id()).is_some());
        assert!(env.destroy());
    }
}
