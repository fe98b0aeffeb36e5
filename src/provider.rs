use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::definition::FeatureDefinition;
use crate::targeting::TargetingContext;

/// Supplies immutable feature definition snapshots to the engine.
///
/// Ordinarily this is backed by a configuration system; the engine only ever
/// reads through this interface and never mutates what it is handed.
#[async_trait]
pub trait FeatureDefinitionProvider: Send + Sync {
    /// Retrieve the definition for `name`. Lookup is case-insensitive.
    async fn definition(&self, name: &str) -> Option<Arc<FeatureDefinition>>;

    /// A snapshot of every known definition.
    async fn definitions(&self) -> Vec<Arc<FeatureDefinition>>;

    /// Whether snapshots are stable enough for the engine to cache state
    /// derived from them, such as bound filter settings. Providers that
    /// rebuild parameter trees unpredictably should keep the default.
    fn is_cacheable(&self) -> bool {
        false
    }
}

/// Resolves a targeting context for evaluations the caller did not supply
/// one to, e.g. from ambient request state.
#[async_trait]
pub trait TargetingContextAccessor: Send + Sync {
    async fn targeting_context(&self) -> Option<TargetingContext>;
}

/// Looks up configuration sub-trees referenced by variant definitions.
pub trait ConfigurationAccessor: Send + Sync {
    fn section(&self, reference: &str) -> Option<serde_json::Value>;
}

/// The reference provider: a fixed set of definitions held in memory.
pub struct InMemoryFeatureProvider {
    definitions: HashMap<String, Arc<FeatureDefinition>>,
}

impl InMemoryFeatureProvider {
    pub fn new(definitions: impl IntoIterator<Item = FeatureDefinition>) -> Self {
        InMemoryFeatureProvider {
            definitions: definitions
                .into_iter()
                .map(|d| (d.name.to_lowercase(), Arc::new(d)))
                .collect(),
        }
    }
}

#[async_trait]
impl FeatureDefinitionProvider for InMemoryFeatureProvider {
    async fn definition(&self, name: &str) -> Option<Arc<FeatureDefinition>> {
        self.definitions.get(&name.to_lowercase()).cloned()
    }

    async fn definitions(&self) -> Vec<Arc<FeatureDefinition>> {
        self.definitions.values().cloned().collect()
    }

    fn is_cacheable(&self) -> bool {
        true
    }
}
