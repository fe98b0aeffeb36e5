#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::definition::FeatureDefinition;
use crate::error::Error;
use crate::filter::{ContextualFeatureFilter, FeatureFilter, FilterContext};
use crate::provider::{
    ConfigurationAccessor, FeatureDefinitionProvider, InMemoryFeatureProvider,
    TargetingContextAccessor,
};
use crate::session::SessionManager;
use crate::targeting::TargetingContext;
use crate::telemetry::{EvaluationEvent, TelemetryPublisher};

pub fn definition_from_json(json: &str) -> FeatureDefinition {
    serde_json::from_str(json).expect("test definition should parse")
}

pub fn provider_from_json(definitions: &[&str]) -> InMemoryFeatureProvider {
    InMemoryFeatureProvider::new(definitions.iter().map(|json| definition_from_json(json)))
}

/// A filter that always answers the same and counts how often it was asked.
pub struct FixedFilter {
    result: bool,
    calls: Arc<AtomicUsize>,
}

impl FixedFilter {
    pub fn new(result: bool) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            FixedFilter {
                result,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl FeatureFilter for FixedFilter {
    async fn evaluate(&self, _context: &FilterContext) -> Result<bool, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result)
    }
}

/// A custom app context type for contextual-dispatch tests.
#[derive(Debug, PartialEq)]
pub struct TenantContext {
    pub tenant: String,
}

/// Contextual filter enabled for exactly one tenant.
pub struct TenantFilter {
    pub allowed: &'static str,
}

#[async_trait]
impl ContextualFeatureFilter<TenantContext> for TenantFilter {
    async fn evaluate(
        &self,
        _context: &FilterContext,
        app_context: &TenantContext,
    ) -> Result<bool, Error> {
        Ok(app_context.tenant == self.allowed)
    }
}

/// Collects published telemetry events for assertions.
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<EvaluationEvent>>>,
}

impl RecordingPublisher {
    pub fn new() -> (Self, Arc<Mutex<Vec<EvaluationEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            RecordingPublisher {
                events: events.clone(),
            },
            events,
        )
    }
}

#[async_trait]
impl TelemetryPublisher for RecordingPublisher {
    async fn publish(&self, event: &EvaluationEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A session manager over a shared map, so tests can preload and inspect it.
pub struct InMemorySessionManager {
    values: Arc<Mutex<HashMap<String, bool>>>,
}

impl InMemorySessionManager {
    pub fn new() -> (Self, Arc<Mutex<HashMap<String, bool>>>) {
        let values = Arc::new(Mutex::new(HashMap::new()));
        (
            InMemorySessionManager {
                values: values.clone(),
            },
            values,
        )
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn get(&self, feature_name: &str) -> Option<bool> {
        self.values.lock().unwrap().get(feature_name).copied()
    }

    async fn set(&self, feature_name: &str, enabled: bool) {
        self.values
            .lock()
            .unwrap()
            .insert(feature_name.to_string(), enabled);
    }
}

/// Hands out one fixed targeting context.
pub struct StaticContextAccessor {
    pub context: TargetingContext,
}

#[async_trait]
impl TargetingContextAccessor for StaticContextAccessor {
    async fn targeting_context(&self) -> Option<TargetingContext> {
        Some(self.context.clone())
    }
}

/// Configuration sections behind string references.
pub struct MapConfiguration {
    sections: HashMap<String, serde_json::Value>,
}

impl MapConfiguration {
    pub fn new(sections: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> Self {
        MapConfiguration {
            sections: sections
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }
}

impl ConfigurationAccessor for MapConfiguration {
    fn section(&self, reference: &str) -> Option<serde_json::Value> {
        self.sections.get(reference).cloned()
    }
}

/// Wraps a provider, withdrawing the cacheable capability.
pub struct NonCacheableProvider<P>(pub P);

#[async_trait]
impl<P: FeatureDefinitionProvider> FeatureDefinitionProvider for NonCacheableProvider<P> {
    async fn definition(&self, name: &str) -> Option<Arc<FeatureDefinition>> {
        self.0.definition(name).await
    }

    async fn definitions(&self) -> Vec<Arc<FeatureDefinition>> {
        self.0.definitions().await
    }

    fn is_cacheable(&self) -> bool {
        false
    }
}
