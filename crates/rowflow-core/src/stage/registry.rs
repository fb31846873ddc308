//! Stage type registry.

use std::fmt;
use std::sync::Arc;

use fxhash::FxHashMap;

use super::builtin::{Discard, Passthrough, RejectFilter, RowGenerator};
use super::error::StageError;
use super::Stage;
use crate::graph::StageNode;

/// Creates stage instances for one stage type.
pub trait StageFactory: Send + Sync {
    /// Creates the instance for copy `copy` of `node`.
    ///
    /// # Errors
    ///
    /// Returns a `StageError` if the node's settings are unusable.
    fn create(&self, node: &StageNode, copy: usize) -> Result<Box<dyn Stage>, StageError>;
}

impl<F> StageFactory for F
where
    F: Fn(&StageNode, usize) -> Result<Box<dyn Stage>, StageError> + Send + Sync,
{
    fn create(&self, node: &StageNode, copy: usize) -> Result<Box<dyn Stage>, StageError> {
        self(node, copy)
    }
}

/// Maps stage type tags to factories.
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: FxHashMap<String, Arc<dyn StageFactory>>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in stage types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_fn(RowGenerator::TYPE, |node, _| {
            Ok(Box::new(RowGenerator::from_node(node)?) as Box<dyn Stage>)
        });
        registry.register_fn(Passthrough::TYPE, |_, _| {
            Ok(Box::new(Passthrough) as Box<dyn Stage>)
        });
        registry.register_fn(Discard::TYPE, |_, _| Ok(Box::new(Discard) as Box<dyn Stage>));
        registry.register_fn(RejectFilter::TYPE, |node, _| {
            Ok(Box::new(RejectFilter::from_node(node)?) as Box<dyn Stage>)
        });
        registry
    }

    /// Registers `factory` for `tag`, returning the factory it replaced.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        factory: Arc<dyn StageFactory>,
    ) -> Option<Arc<dyn StageFactory>> {
        self.factories.insert(tag.into(), factory)
    }

    /// Registers a closure as the factory for `tag`.
    pub fn register_fn<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&StageNode, usize) -> Result<Box<dyn Stage>, StageError> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Arc::new(factory));
    }

    /// Returns true if `tag` has a factory.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Number of registered tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Creates the instance for copy `copy` of `node`.
    ///
    /// # Errors
    ///
    /// Returns `StageError::UnknownStageType` for an unregistered tag, or
    /// the factory's error.
    pub fn create(&self, node: &StageNode, copy: usize) -> Result<Box<dyn Stage>, StageError> {
        let factory = self
            .factories
            .get(&node.stage_type)
            .ok_or_else(|| StageError::UnknownStageType(node.stage_type.clone()))?;
        factory.create(node, copy)
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
