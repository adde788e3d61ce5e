//! Values that live inside whichever environment is current.

use crate::core::error::EnvironmentResult;
use crate::environment::manager::EnvironmentManager;
use std::marker::PhantomData;

/// A named slot resolved against the current environment on every access.
///
/// The same handle reads and writes a different value in each environment.
/// Two handles with the same name share the slot.
pub struct Local<T> {
    manager: EnvironmentManager,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Local<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(manager: EnvironmentManager, name: impl Into<String>) -> Self {
        Self {
            manager,
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Slot name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value in the current environment.
    pub fn get(&self) -> EnvironmentResult<T> {
        self.manager.current()?.get_local(&self.name)
    }

    /// Store a value in the current environment.
    pub fn set(&self, value: T) -> EnvironmentResult<()> {
        self.manager.current()?.set_local(&self.name, value)
    }

    /// Remove the value from the current environment.
    pub fn delete(&self) -> EnvironmentResult<()> {
        self.manager.current()?.delete_local(&self.name)
    }

    /// Whether the current environment holds a value.
    pub fn is_set(&self) -> bool {
        self.get().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::CoreConfig;
    use crate::core::error::EnvironmentError;
    use crate::environment::manager::EnvironmentManager;
    use crate::environment::policy::ThreadLocalPolicy;
    use std::sync::Arc;

    #[test]
    fn test_values_are_per_environment() {
        let manager = EnvironmentManager::with_policy(Arc::new(ThreadLocalPolicy::new()));
        let config = CoreConfig::new().with_threads(1);
        let a = manager.create_environment_with(config.clone()).unwrap();
        let b = manager.create_environment_with(config).unwrap();
        let value = manager.local::<i64>("value");

        {
            let _guard = a.enter().unwrap();
            value.set(1).unwrap();
            assert_eq!(value.get().unwrap(), 1);
        }
        {
            let _guard = b.enter().unwrap();
            assert_eq!(
                value.get().unwrap_err(),
                EnvironmentError::AttributeNotSet("value".to_string())
            );
            value.set(2).unwrap();
        }
        let _guard = a.enter().unwrap();
        assert_eq!(value.get().unwrap(), 1);
        value.delete().unwrap();
        assert!(!value.is_set());
        assert!(value.delete().is_err());
    }

    #[test]
    fn test_type_mismatch_and_no_environment() {
        let manager = EnvironmentManager::with_policy(Arc::new(ThreadLocalPolicy::new()));
        let env = manager
            .create_environment_with(CoreConfig::new().with_threads(1))
            .unwrap();
        let number = manager.local::<i64>("shared");
        let text = manager.local::<String>("shared");
        assert_eq!(number.get().unwrap_err(), EnvironmentError::NoCurrentEnvironment);

        let _guard = env.enter().unwrap();
        number.set(5).unwrap();
        assert_eq!(
            text.get().unwrap_err(),
            EnvironmentError::LocalTypeMismatch("shared".to_string())
        );
        text.set("five".to_string()).unwrap();
        assert_eq!(text.get().unwrap(), "five");
        assert_eq!(text.name(), "shared");
    }
}
