//! Filter registry for looking up filters by name.
//!
//! Each entry pairs an argument [`Signature`] with a constructor. Arguments
//! are validated against the signature before the constructor runs.

use crate::core::args::Signature;
use crate::core::error::{ArgumentError, ArgumentResult};
use crate::core::node::Node;
use crate::core::props::PropertyMap;
use crate::execution::engine::Core;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Constructor building a node from validated arguments.
pub type FilterConstructor = Arc<dyn Fn(&Core, &PropertyMap) -> ArgumentResult<Node> + Send + Sync>;

/// Broad grouping of filters, used for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Filters that produce frames without input clips.
    Source,
    /// Per-pixel arithmetic.
    Math,
    /// Filters that only attach measurements as properties.
    Analysis,
    /// Plane and color family rearrangement.
    Channel,
    /// Anything else.
    Other,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Source => "Source",
            Category::Math => "Math",
            Category::Analysis => "Analysis",
            Category::Channel => "Channel",
            Category::Other => "Other",
        };
        write!(f, "{}", name)
    }
}

/// Registry entry: signature, constructor and metadata.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Accepted arguments.
    pub signature: Signature,
    /// Node constructor.
    pub constructor: FilterConstructor,
    /// Listing category.
    pub category: Category,
    /// One-line description.
    pub description: String,
}

impl RegistryEntry {
    /// Validate `args` and construct the node.
    pub fn invoke(&self, core: &Core, args: &PropertyMap) -> ArgumentResult<Node> {
        let args = self.signature.validate(args)?;
        (self.constructor)(core, &args)
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("signature", &self.signature.to_string())
            .field("category", &self.category)
            .finish()
    }
}

/// Registry of named filters.
pub struct FilterRegistry {
    filters: IndexMap<String, RegistryEntry>,
}

impl FilterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            filters: IndexMap::new(),
        }
    }

    /// Create a registry holding the built-in filters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::filters::builtin::register_all(&mut registry);
        registry
    }

    /// Register a filter, replacing any previous entry with the same name.
    pub fn register<F>(
        &mut self,
        name: &str,
        signature: &str,
        category: Category,
        description: &str,
        constructor: F,
    ) -> ArgumentResult<()>
    where
        F: Fn(&Core, &PropertyMap) -> ArgumentResult<Node> + Send + Sync + 'static,
    {
        let signature = Signature::parse(name, signature)?;
        let entry = RegistryEntry {
            signature,
            constructor: Arc::new(constructor),
            category,
            description: description.to_string(),
        };
        if self.filters.insert(name.to_string(), entry).is_some() {
            log::debug!("filter {} re-registered", name);
        }
        Ok(())
    }

    /// Look up an entry.
    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.filters.get(name)
    }

    /// Validate arguments and construct a node.
    pub fn create(&self, core: &Core, name: &str, args: &PropertyMap) -> ArgumentResult<Node> {
        self.filters
            .get(name)
            .ok_or_else(|| ArgumentError::UnknownFilter(name.to_string()))?
            .invoke(core, args)
    }

    /// Check if a filter is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(|s| s.as_str())
    }

    /// Names of filters in `category`.
    pub fn by_category(&self, category: Category) -> Vec<&str> {
        self.filters
            .iter()
            .filter(|(_, e)| e.category == category)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Case-insensitive search over names and descriptions.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.filters
            .iter()
            .filter(|(name, entry)| {
                name.to_lowercase().contains(&query)
                    || entry.description.to_lowercase().contains(&query)
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Remove a filter.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.filters.shift_remove(name).is_some()
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = FilterRegistry::with_builtins();
        for name in ["BlankClip", "Expr", "PlaneStats", "PlaneDifference", "ShufflePlanes"] {
            assert!(registry.contains(name), "{} missing", name);
        }
        assert_eq!(registry.by_category(Category::Source), vec!["BlankClip"]);
        assert!(registry.search("plane").contains(&"PlaneStats"));
    }

    #[test]
    fn test_unknown_filter() {
        let core = Core::with_threads(1).unwrap();
        let registry = FilterRegistry::new();
        assert!(registry.is_empty());
        let err = registry
            .create(&core, "Nope", &PropertyMap::new())
            .unwrap_err();
        assert_eq!(err, ArgumentError::UnknownFilter("Nope".to_string()));
    }

    #[test]
    fn test_validation_runs_before_constructor() {
        let core = Core::with_threads(1).unwrap();
        let mut registry = FilterRegistry::new();
        registry
            .register("Never", "clip:vnode;", Category::Other, "", |_, _| {
                panic!("constructor must not run")
            })
            .unwrap();
        let err = registry
            .create(&core, "Never", &PropertyMap::new())
            .unwrap_err();
        assert!(matches!(err, ArgumentError::MissingArgument { .. }));
        assert!(registry.unregister("Never"));
        assert!(!registry.unregister("Never"));
    }

    #[test]
    fn test_bad_signature_rejected() {
        let mut registry = FilterRegistry::new();
        let result = registry.register("Bad", "x:matrix;", Category::Other, "", |core, _| {
            core.invoke("BlankClip", &PropertyMap::new())
        });
        assert!(result.is_err());
        assert!(!registry.contains("Bad"));
    }
}
