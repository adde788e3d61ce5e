//! Environments and the manager that owns them.

use crate::core::config::CoreConfig;
use crate::core::error::{EnvironmentError, EnvironmentResult, FramegraphResult};
use crate::environment::local::Local;
use crate::environment::policy::EnvironmentPolicy;
use crate::execution::engine::Core;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

type DestroyCallback = Box<dyn FnOnce() + Send>;

/// Handle identifying a registered on-destroy callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

/// Lifecycle of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    /// Never entered.
    Created,
    /// Current on at least one thread.
    Active,
    /// Entered before, current nowhere now.
    Idle,
    /// Torn down; callbacks have run.
    Destroyed,
}

struct EnvironmentInner {
    id: u64,
    core: RwLock<Option<Core>>,
    callbacks: Mutex<Vec<(CallbackHandle, DestroyCallback)>>,
    next_callback: AtomicU64,
    locals: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
    destroyed: AtomicBool,
    entered: AtomicBool,
    active: AtomicUsize,
    manager: Weak<ManagerInner>,
}

impl EnvironmentInner {
    /// Flip to destroyed and run callbacks. Returns `false` if already done.
    fn teardown(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for (_, callback) in callbacks {
            callback();
        }
        let core = self.core.write().take();
        let locals = std::mem::take(&mut *self.locals.lock());
        drop(core);
        drop(locals);
        if let Some(manager) = self.manager.upgrade() {
            manager.environments.lock().shift_remove(&self.id);
        }
        true
    }
}

impl Drop for EnvironmentInner {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::Acquire) {
            log::warn!(
                "An environment is getting collected before it was destroyed: environment {}",
                self.id
            );
            self.teardown();
        }
    }
}

/// An isolated execution context with its own core.
///
/// Cloning shares the environment. When the last handle goes away without
/// [`destroy`](Environment::destroy) having been called, the environment is
/// torn down anyway and a warning is logged.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

impl Environment {
    /// Identifier, unique within its manager.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The core owned by this environment.
    pub fn core(&self) -> EnvironmentResult<Core> {
        self.inner
            .core
            .read()
            .clone()
            .ok_or(EnvironmentError::Destroyed(self.inner.id))
    }

    /// Whether [`destroy`](Environment::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EnvironmentState {
        if self.is_destroyed() {
            EnvironmentState::Destroyed
        } else if self.inner.active.load(Ordering::Acquire) > 0 {
            EnvironmentState::Active
        } else if self.inner.entered.load(Ordering::Acquire) {
            EnvironmentState::Idle
        } else {
            EnvironmentState::Created
        }
    }

    /// Whether both handles refer to the same environment.
    pub fn ptr_eq(a: &Environment, b: &Environment) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Make this environment current until the guard is dropped.
    ///
    /// Guards nest: dropping one restores whatever was current before it,
    /// including nothing.
    pub fn enter(&self) -> EnvironmentResult<EnvironmentGuard> {
        if self.is_destroyed() {
            return Err(EnvironmentError::Destroyed(self.inner.id));
        }
        let policy = self
            .inner
            .manager
            .upgrade()
            .and_then(|manager| manager.policy.read().clone())
            .ok_or(EnvironmentError::NoPolicy)?;
        let previous = policy.set_environment(Some(self.clone()));
        self.inner.entered.store(true, Ordering::Release);
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        log::trace!("entered environment {}", self.inner.id);
        Ok(EnvironmentGuard {
            environment: self.clone(),
            previous,
            policy,
        })
    }

    /// Run `callback` once when the environment is destroyed.
    ///
    /// Callbacks run in registration order. Hold only weak references to
    /// anything the environment should not keep alive.
    pub fn on_destroy<F>(&self, callback: F) -> EnvironmentResult<CallbackHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self.inner.callbacks.lock();
        if self.is_destroyed() {
            return Err(EnvironmentError::Destroyed(self.inner.id));
        }
        let handle = CallbackHandle(self.inner.next_callback.fetch_add(1, Ordering::Relaxed));
        callbacks.push((handle, Box::new(callback)));
        Ok(handle)
    }

    /// Unregister a callback. Returns `false` if it is not pending.
    pub fn remove_on_destroy(&self, handle: CallbackHandle) -> bool {
        let removed = {
            let mut callbacks = self.inner.callbacks.lock();
            callbacks
                .iter()
                .position(|(h, _)| *h == handle)
                .map(|index| callbacks.remove(index))
        };
        removed.is_some()
    }

    /// Tear down: run callbacks, release the core and drop locals.
    ///
    /// Returns `false` if the environment was already destroyed.
    pub fn destroy(&self) -> bool {
        let destroyed = self.inner.teardown();
        if destroyed {
            log::debug!("destroyed environment {}", self.inner.id);
        }
        destroyed
    }

    pub(crate) fn get_local<T>(&self, name: &str) -> EnvironmentResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let locals = self.inner.locals.lock();
        let value = locals
            .get(name)
            .ok_or_else(|| EnvironmentError::AttributeNotSet(name.to_string()))?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| EnvironmentError::LocalTypeMismatch(name.to_string()))
    }

    pub(crate) fn set_local<T>(&self, name: &str, value: T) -> EnvironmentResult<()>
    where
        T: Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Err(EnvironmentError::Destroyed(self.inner.id));
        }
        let previous = self
            .inner
            .locals
            .lock()
            .insert(name.to_string(), Box::new(value));
        drop(previous);
        Ok(())
    }

    pub(crate) fn delete_local(&self, name: &str) -> EnvironmentResult<()> {
        let removed = self.inner.locals.lock().remove(name);
        removed
            .map(drop)
            .ok_or_else(|| EnvironmentError::AttributeNotSet(name.to_string()))
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Restores the previously current environment when dropped.
#[must_use = "the environment is only current while the guard is alive"]
pub struct EnvironmentGuard {
    environment: Environment,
    previous: Option<Environment>,
    policy: Arc<dyn EnvironmentPolicy>,
}

impl EnvironmentGuard {
    /// The environment this guard made current.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        let displaced = self.policy.set_environment(self.previous.take());
        self.environment.inner.active.fetch_sub(1, Ordering::AcqRel);
        log::trace!("left environment {}", self.environment.inner.id);
        drop(displaced);
    }
}

struct ManagerInner {
    policy: RwLock<Option<Arc<dyn EnvironmentPolicy>>>,
    environments: Mutex<IndexMap<u64, Weak<EnvironmentInner>>>,
    next_id: AtomicU64,
}

/// Registry of environments plus the policy that tracks the current one.
#[derive(Clone)]
pub struct EnvironmentManager {
    inner: Arc<ManagerInner>,
}

impl EnvironmentManager {
    /// Manager with no policy installed.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                policy: RwLock::new(None),
                environments: Mutex::new(IndexMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Manager with `policy` already installed.
    pub fn with_policy(policy: Arc<dyn EnvironmentPolicy>) -> Self {
        let manager = Self::new();
        policy.on_policy_registered();
        *manager.inner.policy.write() = Some(policy);
        manager
    }

    /// Install a policy.
    pub fn register_policy(&self, policy: Arc<dyn EnvironmentPolicy>) -> EnvironmentResult<()> {
        {
            let mut slot = self.inner.policy.write();
            if slot.is_some() {
                return Err(EnvironmentError::PolicyAlreadyRegistered);
            }
            *slot = Some(Arc::clone(&policy));
        }
        policy.on_policy_registered();
        log::debug!("environment policy registered");
        Ok(())
    }

    /// Remove the policy, destroying every live environment first.
    pub fn unregister_policy(&self) -> EnvironmentResult<()> {
        if !self.has_policy() {
            return Err(EnvironmentError::NoPolicy);
        }
        for environment in self.environments() {
            environment.destroy();
        }
        let policy = self
            .inner
            .policy
            .write()
            .take()
            .ok_or(EnvironmentError::NoPolicy)?;
        policy.on_policy_cleared();
        log::debug!("environment policy cleared");
        Ok(())
    }

    /// Whether a policy is installed.
    pub fn has_policy(&self) -> bool {
        self.inner.policy.read().is_some()
    }

    /// Create an environment with a default-configured core.
    pub fn create_environment(&self) -> FramegraphResult<Environment> {
        self.create_environment_with(CoreConfig::default())
    }

    /// Create an environment whose core uses `config`.
    pub fn create_environment_with(&self, config: CoreConfig) -> FramegraphResult<Environment> {
        if !self.has_policy() {
            return Err(EnvironmentError::NoPolicy.into());
        }
        let core = Core::with_config(config)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let environment = Environment {
            inner: Arc::new(EnvironmentInner {
                id,
                core: RwLock::new(Some(core)),
                callbacks: Mutex::new(Vec::new()),
                next_callback: AtomicU64::new(0),
                locals: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
                entered: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                manager: Arc::downgrade(&self.inner),
            }),
        };
        self.inner
            .environments
            .lock()
            .insert(id, Arc::downgrade(&environment.inner));
        log::debug!("created environment {}", id);
        Ok(environment)
    }

    /// The environment current for the caller.
    pub fn current(&self) -> EnvironmentResult<Environment> {
        let policy = self
            .inner
            .policy
            .read()
            .clone()
            .ok_or(EnvironmentError::NoPolicy)?;
        policy
            .current_environment()
            .ok_or(EnvironmentError::NoCurrentEnvironment)
    }

    /// The core of the current environment.
    pub fn current_core(&self) -> EnvironmentResult<Core> {
        self.current()?.core()
    }

    /// Look up a live environment.
    pub fn get(&self, id: u64) -> Option<Environment> {
        let weak = self.inner.environments.lock().get(&id).cloned()?;
        weak.upgrade().map(|inner| Environment { inner })
    }

    /// Every environment that is neither destroyed nor collected, oldest
    /// first.
    pub fn environments(&self) -> Vec<Environment> {
        // Upgrade outside the lock; a handle dropped here may re-enter it.
        let weak: Vec<Weak<EnvironmentInner>> =
            self.inner.environments.lock().values().cloned().collect();
        weak.into_iter()
            .filter_map(|weak| weak.upgrade())
            .map(|inner| Environment { inner })
            .collect()
    }

    /// A typed per-environment slot named `name`.
    pub fn local<T>(&self, name: &str) -> Local<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Local::new(self.clone(), name)
    }
}

impl Default for EnvironmentManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::policy::ThreadLocalPolicy;

    fn manager() -> EnvironmentManager {
        EnvironmentManager::with_policy(Arc::new(ThreadLocalPolicy::new()))
    }

    fn small(manager: &EnvironmentManager) -> Environment {
        manager
            .create_environment_with(CoreConfig::new().with_threads(1))
            .unwrap()
    }

    #[test]
    fn test_no_current_environment() {
        let manager = manager();
        assert_eq!(
            manager.current().unwrap_err(),
            EnvironmentError::NoCurrentEnvironment
        );
    }

    #[test]
    fn test_enter_nests_and_restores() {
        let manager = manager();
        let a = small(&manager);
        let b = small(&manager);
        assert_eq!(a.state(), EnvironmentState::Created);
        {
            let _outer = a.enter().unwrap();
            assert_eq!(manager.current().unwrap().id(), a.id());
            assert_eq!(a.state(), EnvironmentState::Active);
            {
                let _inner = b.enter().unwrap();
                assert_eq!(manager.current().unwrap().id(), b.id());
            }
            assert_eq!(manager.current().unwrap().id(), a.id());
            assert_eq!(b.state(), EnvironmentState::Idle);
        }
        assert!(manager.current().is_err());
        assert_eq!(a.state(), EnvironmentState::Idle);
    }

    #[test]
    fn test_guard_restores_on_error_path() {
        fn fails(env: &Environment) -> EnvironmentResult<()> {
            let _guard = env.enter()?;
            Err(EnvironmentError::AttributeNotSet("x".to_string()))
        }
        let manager = manager();
        let env = small(&manager);
        assert!(fails(&env).is_err());
        assert!(manager.current().is_err());
    }

    #[test]
    fn test_callbacks_run_once_in_order() {
        let manager = manager();
        let env = small(&manager);
        let log = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = Arc::clone(&log);
                env.on_destroy(move || log.lock().push(i)).unwrap()
            })
            .collect();
        assert!(env.remove_on_destroy(handles[2]));
        assert!(!env.remove_on_destroy(handles[2]));

        assert!(env.destroy());
        assert!(!env.destroy());
        assert_eq!(*log.lock(), vec![0, 1, 3]);
        assert_eq!(env.state(), EnvironmentState::Destroyed);
        assert_eq!(env.core().unwrap_err(), EnvironmentError::Destroyed(env.id()));
        assert!(env.enter().is_err());
        assert!(env.on_destroy(|| {}).is_err());
    }

    #[test]
    fn test_collected_environment_runs_callbacks() {
        let manager = manager();
        let env = small(&manager);
        let id = env.id();
        let flag = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&flag);
        env.on_destroy(move || seen.store(true, Ordering::SeqCst)).unwrap();
        assert!(manager.get(id).is_some());
        drop(env);
        assert!(flag.load(Ordering::SeqCst));
        assert!(manager.get(id).is_none());
        assert!(manager.environments().is_empty());
    }

    #[test]
    fn test_policy_registration() {
        let manager = EnvironmentManager::new();
        assert!(matches!(
            manager.create_environment(),
            Err(crate::core::error::FramegraphError::Environment(EnvironmentError::NoPolicy))
        ));
        assert_eq!(manager.current().unwrap_err(), EnvironmentError::NoPolicy);
        manager
            .register_policy(Arc::new(ThreadLocalPolicy::new()))
            .unwrap();
        assert_eq!(
            manager
                .register_policy(Arc::new(ThreadLocalPolicy::new()))
                .unwrap_err(),
            EnvironmentError::PolicyAlreadyRegistered
        );
    }

    #[test]
    fn test_unregister_destroys_everything() {
        let manager = manager();
        let a = small(&manager);
        let b = small(&manager);
        let count = Arc::new(AtomicUsize::new(0));
        for env in [&a, &b] {
            let count = Arc::clone(&count);
            env.on_destroy(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(manager.environments().len(), 2);
        manager.unregister_policy().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(a.is_destroyed() && b.is_destroyed());
        assert!(!manager.has_policy());
        assert_eq!(manager.unregister_policy().unwrap_err(), EnvironmentError::NoPolicy);
    }

    #[test]
    fn test_environments_have_separate_cores() {
        let manager = manager();
        let a = small(&manager);
        let b = small(&manager);
        let core_a = a.core().unwrap();
        assert!(!Core::ptr_eq(&core_a, &b.core().unwrap()));
        let _guard = a.enter().unwrap();
        assert!(Core::ptr_eq(&manager.current_core().unwrap(), &core_a));
    }

    #[test]
    fn test_current_is_per_thread() {
        let manager = manager();
        let env = small(&manager);
        let _guard = env.enter().unwrap();
        let other = manager.clone();
        let seen = std::thread::spawn(move || other.current().is_err())
            .join()
            .unwrap();
        assert!(seen);
        assert_eq!(manager.current().unwrap().id(), env.id());
    }
}
