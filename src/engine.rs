use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};

use crate::allocation::Allocation;
use crate::allocator::{
    AllocationContext, AllocationResult, AllocatorEntry, ContextualAllocatorAdapter,
    ContextualVariantAllocator, ErasedContextualAllocator, TargetingAllocator, VariantAllocator,
};
use crate::binder::BinderCache;
use crate::definition::{FeatureDefinition, FeatureStatus, FilterConfiguration, RequirementType};
use crate::error::Error;
use crate::filter::{
    ContextualFeatureFilter, ContextualFilterAdapter, ErasedContextualFilter, FeatureFilter,
    FilterContext, FilterEntry,
};
use crate::provider::{ConfigurationAccessor, FeatureDefinitionProvider, TargetingContextAccessor};
use crate::registry::{Named, Registry, Resolution, ALLOCATOR_SUFFIXES, FILTER_SUFFIXES};
use crate::session::SessionManager;
use crate::targeting::TargetingContext;
use crate::telemetry::{EvaluationEvent, TelemetryPublisher};
use crate::variant::{AssignmentReason, StatusOverride, Variant, VariantDefinition};

/// The allocator name consulted by the variant engine.
const TARGETING_ALLOCATOR: &str = "Targeting";

/// Options governing how strictly the engine treats configuration gaps.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeatureManagerOptions {
    /// Treat evaluation of unknown features as disabled instead of failing
    /// with [Error::MissingFeature].
    pub ignore_missing_features: bool,
    /// Skip filters with no registered implementation instead of failing
    /// with [Error::MissingFeatureFilter]. Rejected for features with
    /// [RequirementType::All], where skipping would change the result.
    pub ignore_missing_filters: bool,
}

/// An application-supplied context, type-erased for dispatch to contextual
/// filters and allocators.
#[derive(Clone, Copy)]
struct AppContext<'a> {
    value: &'a (dyn Any + Send + Sync),
    type_id: TypeId,
}

impl<'a> AppContext<'a> {
    fn new<C: Any + Send + Sync>(value: &'a C) -> Self {
        AppContext {
            value,
            type_id: TypeId::of::<C>(),
        }
    }

    fn downcast_ref<C: Any>(&self) -> Option<&'a C> {
        self.value.downcast_ref()
    }
}

/// Builds a [FeatureManager].
///
/// Filters and allocators are registered under their canonical names; the
/// registries match configured references against those names with
/// case-insensitive, namespace-aware, suffix-trimming semantics, so a filter
/// registered as `"PercentageFilter"` is found by `"Percentage"`.
pub struct FeatureManagerBuilder {
    provider: Arc<dyn FeatureDefinitionProvider>,
    options: FeatureManagerOptions,
    filters: Vec<FilterEntry>,
    allocators: Vec<AllocatorEntry>,
    session_managers: Vec<Arc<dyn SessionManager>>,
    publishers: Vec<Arc<dyn TelemetryPublisher>>,
    context_accessor: Option<Arc<dyn TargetingContextAccessor>>,
    configuration: Option<Arc<dyn ConfigurationAccessor>>,
}

impl FeatureManagerBuilder {
    pub fn new(provider: impl FeatureDefinitionProvider + 'static) -> Self {
        FeatureManagerBuilder {
            provider: Arc::new(provider),
            options: FeatureManagerOptions::default(),
            filters: Vec::new(),
            allocators: Vec::new(),
            session_managers: Vec::new(),
            publishers: Vec::new(),
            context_accessor: None,
            configuration: None,
        }
    }

    pub fn options(mut self, options: FeatureManagerOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a filter under its canonical name.
    pub fn filter(mut self, name: impl Into<String>, filter: impl FeatureFilter + 'static) -> Self {
        self.filter_entry(name.into()).plain = Some(Arc::new(filter));
        self
    }

    /// Register a contextual filter under its canonical name, fixing the
    /// app context type it applies to.
    pub fn contextual_filter<C, F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        C: Any + Send + Sync,
        F: ContextualFeatureFilter<C> + 'static,
    {
        self.filter_entry(name.into()).contextual =
            Some(Arc::new(ContextualFilterAdapter::<C, F>::new(filter)));
        self
    }

    /// Register a variant allocator under its canonical name.
    pub fn allocator(
        mut self,
        name: impl Into<String>,
        allocator: impl VariantAllocator + 'static,
    ) -> Self {
        self.allocator_entry(name.into()).plain = Some(Arc::new(allocator));
        self
    }

    /// Register a contextual variant allocator under its canonical name.
    pub fn contextual_allocator<C, A>(mut self, name: impl Into<String>, allocator: A) -> Self
    where
        C: Any + Send + Sync,
        A: ContextualVariantAllocator<C> + 'static,
    {
        self.allocator_entry(name.into()).contextual =
            Some(Arc::new(ContextualAllocatorAdapter::<C, A>::new(allocator)));
        self
    }

    /// Register the built-in [TargetingAllocator] under the name the variant
    /// engine consults. Without this (or a custom allocator answering to
    /// `"Targeting"`), allocating a variant for an enabled feature fails.
    pub fn targeting_allocator(self) -> Self {
        self.contextual_allocator::<TargetingContext, _>(
            TARGETING_ALLOCATOR,
            TargetingAllocator::default(),
        )
    }

    pub fn session_manager(mut self, manager: impl SessionManager + 'static) -> Self {
        self.session_managers.push(Arc::new(manager));
        self
    }

    pub fn telemetry_publisher(mut self, publisher: impl TelemetryPublisher + 'static) -> Self {
        self.publishers.push(Arc::new(publisher));
        self
    }

    pub fn targeting_context_accessor(
        mut self,
        accessor: impl TargetingContextAccessor + 'static,
    ) -> Self {
        self.context_accessor = Some(Arc::new(accessor));
        self
    }

    pub fn configuration(mut self, configuration: impl ConfigurationAccessor + 'static) -> Self {
        self.configuration = Some(Arc::new(configuration));
        self
    }

    pub fn build(self) -> FeatureManager {
        let mut filters = Registry::new(FILTER_SUFFIXES);
        for entry in self.filters {
            filters.register(entry);
        }
        let mut allocators = Registry::new(ALLOCATOR_SUFFIXES);
        for entry in self.allocators {
            allocators.register(entry);
        }

        FeatureManager {
            provider: self.provider,
            options: self.options,
            filters,
            allocators,
            session_managers: self.session_managers,
            publishers: self.publishers,
            context_accessor: self.context_accessor,
            configuration: self.configuration,
            binder_cache: BinderCache::new(),
            filter_applicability: DashMap::new(),
            allocator_applicability: DashMap::new(),
        }
    }

    // Registrations under one name merge into one entry, so the same name
    // can carry both a plain and a contextual capability.
    fn filter_entry(&mut self, name: String) -> &mut FilterEntry {
        let index = match self
            .filters
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(&name))
        {
            Some(index) => index,
            None => {
                self.filters.push(FilterEntry::new(name));
                self.filters.len() - 1
            }
        };
        &mut self.filters[index]
    }

    fn allocator_entry(&mut self, name: String) -> &mut AllocatorEntry {
        let index = match self
            .allocators
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(&name))
        {
            Some(index) => index,
            None => {
                self.allocators.push(AllocatorEntry::new(name));
                self.allocators.len() - 1
            }
        };
        &mut self.allocators[index]
    }
}

/// The result of one full feature evaluation: the enabled verdict together
/// with the variant that was co-determined with it.
struct FeatureEvaluation {
    definition: Option<Arc<FeatureDefinition>>,
    enabled: bool,
    variant: Option<VariantDefinition>,
    reason: AssignmentReason,
}

/// Evaluates feature state and allocates variants.
///
/// One instance is meant to be shared across concurrent evaluations; every
/// internal cache supports concurrent compute-once access, and evaluation
/// itself holds no state between calls.
pub struct FeatureManager {
    provider: Arc<dyn FeatureDefinitionProvider>,
    options: FeatureManagerOptions,
    filters: Registry<FilterEntry>,
    allocators: Registry<AllocatorEntry>,
    session_managers: Vec<Arc<dyn SessionManager>>,
    publishers: Vec<Arc<dyn TelemetryPublisher>>,
    context_accessor: Option<Arc<dyn TargetingContextAccessor>>,
    configuration: Option<Arc<dyn ConfigurationAccessor>>,
    binder_cache: BinderCache,
    // Whether a named contextual implementation applies to a given app
    // context type; stable for the lifetime of the registered set.
    filter_applicability: DashMap<(String, TypeId), bool>,
    allocator_applicability: DashMap<(String, TypeId), bool>,
}

impl FeatureManager {
    pub fn builder(provider: impl FeatureDefinitionProvider + 'static) -> FeatureManagerBuilder {
        FeatureManagerBuilder::new(provider)
    }

    /// Whether the feature is enabled, without an app context.
    pub async fn is_enabled(&self, feature_name: &str) -> Result<bool, Error> {
        self.is_enabled_core(feature_name, None).await
    }

    /// Whether the feature is enabled for the given app context. Contextual
    /// filters registered for `C` see the context; other filters evaluate as
    /// usual.
    pub async fn is_enabled_for<C: Any + Send + Sync>(
        &self,
        feature_name: &str,
        app_context: &C,
    ) -> Result<bool, Error> {
        self.is_enabled_core(feature_name, Some(AppContext::new(app_context)))
            .await
    }

    /// The variant assigned to the feature, resolving the targeting context
    /// through the configured accessor.
    pub async fn variant(&self, feature_name: &str) -> Result<Option<Variant>, Error> {
        self.variant_core(feature_name, None).await
    }

    /// The variant assigned to the feature for the given targeting context.
    pub async fn variant_for(
        &self,
        feature_name: &str,
        context: &TargetingContext,
    ) -> Result<Option<Variant>, Error> {
        self.variant_core(feature_name, Some(context)).await
    }

    /// The names of every feature known to the provider.
    pub async fn feature_names(&self) -> Vec<String> {
        self.provider
            .definitions()
            .await
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    async fn is_enabled_core(
        &self,
        feature_name: &str,
        app_context: Option<AppContext<'_>>,
    ) -> Result<bool, Error> {
        for manager in &self.session_managers {
            if let Some(enabled) = manager.get(feature_name).await {
                return Ok(enabled);
            }
        }

        let evaluation = self.evaluate_feature(feature_name, app_context, None).await?;

        for manager in &self.session_managers {
            manager.set(feature_name, evaluation.enabled).await;
        }
        self.publish(&evaluation).await;

        Ok(evaluation.enabled)
    }

    async fn variant_core(
        &self,
        feature_name: &str,
        targeting: Option<&TargetingContext>,
    ) -> Result<Option<Variant>, Error> {
        // The targeting context doubles as the app context, so contextual
        // filters participate in the enabled decision backing the variant.
        let app_context = targeting.map(AppContext::new);
        let evaluation = self
            .evaluate_feature(feature_name, app_context, targeting)
            .await?;
        self.publish(&evaluation).await;

        Ok(self.resolve_variant(evaluation.variant))
    }

    async fn evaluate_feature(
        &self,
        feature_name: &str,
        app_context: Option<AppContext<'_>>,
        targeting: Option<&TargetingContext>,
    ) -> Result<FeatureEvaluation, Error> {
        let definition = match self.provider.definition(feature_name).await {
            Some(definition) => definition,
            None if self.options.ignore_missing_features => {
                warn!(
                    "the feature declaration for '{}' was not found; treating it as disabled",
                    feature_name
                );
                return Ok(FeatureEvaluation {
                    definition: None,
                    enabled: false,
                    variant: None,
                    reason: AssignmentReason::None,
                });
            }
            None => return Err(Error::MissingFeature(feature_name.to_string())),
        };

        let mut enabled = self.evaluate_filters(&definition, app_context).await?;
        let mut variant = None;
        let mut reason = AssignmentReason::None;

        if let Some(allocation) = &definition.allocation {
            if !definition.variants.is_empty() {
                let result = self
                    .allocate_variant(&definition, allocation, app_context, targeting, enabled)
                    .await?;
                variant = result.variant;
                reason = result.reason;

                // An assigned variant can override the filter verdict, but a
                // hard-disabled feature stays off.
                if definition.status != FeatureStatus::Disabled {
                    match variant.as_ref().map(|v| v.status_override) {
                        Some(StatusOverride::Enabled) => enabled = true,
                        Some(StatusOverride::Disabled) => enabled = false,
                        _ => {}
                    }
                }
            }
        }

        Ok(FeatureEvaluation {
            definition: Some(definition),
            enabled,
            variant,
            reason,
        })
    }

    async fn evaluate_filters(
        &self,
        definition: &FeatureDefinition,
        app_context: Option<AppContext<'_>>,
    ) -> Result<bool, Error> {
        // Skipping missing filters under All would silently change the
        // result, so that combination is rejected before anything runs.
        if definition.requirement_type == RequirementType::All
            && self.options.ignore_missing_filters
        {
            return Err(Error::Conflict(format!(
                "ignoring missing feature filters is incompatible with requirement type All (feature '{}')",
                definition.name
            )));
        }

        if definition.status == FeatureStatus::Disabled || definition.enabled_for.is_empty() {
            return Ok(false);
        }

        // Under Any the first true filter decides; under All the first false
        // one does.
        let enabled = definition.requirement_type == RequirementType::All;
        let target = !enabled;

        for (index, config) in definition.enabled_for.iter().enumerate() {
            if config.is_always_on() {
                if definition.requirement_type == RequirementType::Any {
                    return Ok(true);
                }
                continue;
            }

            let entry = match self.filters.resolve(&config.name) {
                Resolution::Found(entry) => entry,
                Resolution::Ambiguous => {
                    return Err(Error::AmbiguousFeatureFilter(config.name.clone()))
                }
                Resolution::NotFound if self.options.ignore_missing_filters => {
                    warn!(
                        "feature '{}' references the unregistered filter '{}'; skipping it",
                        definition.name, config.name
                    );
                    continue;
                }
                Resolution::NotFound => {
                    return Err(Error::MissingFeatureFilter(config.name.clone()))
                }
            };

            let context = self.filter_context(definition, index, config, &entry);
            if self.invoke_filter(&entry, &context, app_context).await? == target {
                return Ok(target);
            }
        }

        Ok(enabled)
    }

    fn filter_context(
        &self,
        definition: &FeatureDefinition,
        index: usize,
        config: &FilterConfiguration,
        entry: &FilterEntry,
    ) -> FilterContext {
        // Unstable providers may hand back freshly-built parameter trees on
        // every lookup; their settings are rebound each call instead of
        // cached against a key that never repeats.
        let settings = if self.provider.is_cacheable() {
            self.binder_cache
                .bind(&definition.name, index, &config.parameters, |parameters| {
                    entry.bind_parameters(parameters)
                })
        } else {
            entry.bind_parameters(&config.parameters)
        };

        FilterContext {
            feature_name: definition.name.clone(),
            parameters: config.parameters.clone(),
            settings,
        }
    }

    async fn invoke_filter(
        &self,
        entry: &FilterEntry,
        context: &FilterContext,
        app_context: Option<AppContext<'_>>,
    ) -> Result<bool, Error> {
        if let (Some(contextual), Some(app)) = (&entry.contextual, app_context) {
            let applies = *self
                .filter_applicability
                .entry((entry.name.clone(), app.type_id))
                .or_insert_with(|| contextual.applies_to(app.type_id));
            if applies {
                return contextual.evaluate(context, app.value).await;
            }
        }

        match &entry.plain {
            Some(filter) => filter.evaluate(context).await,
            None => {
                debug!(
                    "filter '{}' has no capability applicable to this evaluation",
                    entry.name()
                );
                Ok(false)
            }
        }
    }

    async fn allocate_variant(
        &self,
        definition: &FeatureDefinition,
        allocation: &Allocation,
        app_context: Option<AppContext<'_>>,
        targeting: Option<&TargetingContext>,
        enabled: bool,
    ) -> Result<AllocationResult, Error> {
        if !enabled {
            return Ok(self.default_variant(
                definition,
                allocation.default_when_disabled.as_deref(),
                AssignmentReason::DefaultWhenDisabled,
            ));
        }

        // The context comes from the caller, or from an app context that is
        // itself a targeting context, or from the configured accessor.
        let accessor_context;
        let targeting = match targeting.or_else(|| {
            app_context.and_then(|app| app.downcast_ref::<TargetingContext>())
        }) {
            Some(context) => Some(context),
            None => {
                accessor_context = match &self.context_accessor {
                    Some(accessor) => accessor.targeting_context().await,
                    None => None,
                };
                accessor_context.as_ref()
            }
        };

        if targeting.is_none() && app_context.is_none() {
            warn!(
                "no targeting context is available for feature '{}'; skipping targeted allocation",
                definition.name
            );
        } else {
            let context = AllocationContext {
                feature_name: &definition.name,
                allocation,
                variants: &definition.variants,
            };
            if let Some(result) = self
                .invoke_allocator(&context, app_context, targeting, enabled)
                .await?
            {
                return Ok(result);
            }
        }

        Ok(self.default_variant(
            definition,
            allocation.default_when_enabled.as_deref(),
            AssignmentReason::DefaultWhenEnabled,
        ))
    }

    async fn invoke_allocator(
        &self,
        context: &AllocationContext<'_>,
        app_context: Option<AppContext<'_>>,
        targeting: Option<&TargetingContext>,
        enabled: bool,
    ) -> Result<Option<AllocationResult>, Error> {
        let entry = match self.allocators.resolve(TARGETING_ALLOCATOR) {
            Resolution::Found(entry) => entry,
            Resolution::Ambiguous => {
                return Err(Error::AmbiguousFeatureVariantAllocator(
                    TARGETING_ALLOCATOR.to_string(),
                ))
            }
            Resolution::NotFound => {
                return Err(Error::MissingFeatureVariantAllocator(
                    TARGETING_ALLOCATOR.to_string(),
                ))
            }
        };

        if let Some(contextual) = &entry.contextual {
            // An explicit app context is tried first; the targeting context
            // serves as the app context otherwise.
            if let Some(app) = app_context {
                if self.allocator_applies(&entry.name, contextual.as_ref(), app.type_id) {
                    return contextual.allocate(context, app.value, enabled).await;
                }
            }
            if let Some(targeting) = targeting {
                let type_id = TypeId::of::<TargetingContext>();
                if self.allocator_applies(&entry.name, contextual.as_ref(), type_id) {
                    return contextual
                        .allocate(context, targeting as &(dyn Any + Send + Sync), enabled)
                        .await;
                }
            }
        }

        match &entry.plain {
            Some(allocator) => allocator.allocate(context, enabled).await,
            None => {
                debug!(
                    "allocator '{}' has no capability applicable to this evaluation",
                    entry.name()
                );
                Ok(None)
            }
        }
    }

    fn allocator_applies(
        &self,
        name: &str,
        contextual: &dyn ErasedContextualAllocator,
        type_id: TypeId,
    ) -> bool {
        *self
            .allocator_applicability
            .entry((name.to_string(), type_id))
            .or_insert_with(|| contextual.applies_to(type_id))
    }

    fn default_variant(
        &self,
        definition: &FeatureDefinition,
        name: Option<&str>,
        reason: AssignmentReason,
    ) -> AllocationResult {
        let variant = name.filter(|n| !n.is_empty()).and_then(|name| {
            let variant = definition.variant(name).cloned();
            if variant.is_none() {
                warn!(
                    "variant '{}' referenced by feature '{}' is not declared",
                    name, definition.name
                );
            }
            variant
        });

        AllocationResult { variant, reason }
    }

    fn resolve_variant(&self, definition: Option<VariantDefinition>) -> Option<Variant> {
        let definition = definition?;

        // An inline value wins over a configuration reference.
        let configuration = match (&definition.configuration_value, &definition.configuration_reference)
        {
            (Some(value), _) => Some(value.clone()),
            (None, Some(reference)) => match &self.configuration {
                Some(configuration) => configuration.section(reference),
                None => {
                    warn!(
                        "variant '{}' references configuration '{}' but no configuration accessor is available",
                        definition.name, reference
                    );
                    None
                }
            },
            (None, None) => None,
        };

        Some(Variant {
            name: definition.name,
            configuration,
        })
    }

    async fn publish(&self, evaluation: &FeatureEvaluation) {
        let definition = match &evaluation.definition {
            Some(definition) => definition,
            None => return,
        };
        if !definition.telemetry.enabled || self.publishers.is_empty() {
            return;
        }

        let event = EvaluationEvent {
            feature_name: definition.name.clone(),
            enabled: evaluation.enabled,
            variant: evaluation.variant.as_ref().map(|v| v.name.clone()),
            reason: evaluation.reason,
            metadata: definition.telemetry.metadata.clone(),
        };
        for publisher in &self.publishers {
            publisher.publish(&event).await;
        }
    }
}
