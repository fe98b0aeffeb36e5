use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::registry::Named;

/// Settings produced by a filter's parameter binder, shared across evaluations
/// through the binder cache.
pub type BoundSettings = Arc<dyn Any + Send + Sync>;

/// What a filter sees about the feature under evaluation.
#[derive(Clone)]
pub struct FilterContext {
    pub feature_name: String,
    /// The raw parameter tree from the filter's configuration entry.
    pub parameters: Arc<serde_json::Value>,
    /// Pre-bound settings, when the filter supports parameter binding.
    pub settings: Option<BoundSettings>,
}

impl FilterContext {
    /// The bound settings downcast to the filter's settings type, if present.
    pub fn settings_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.settings.as_ref().and_then(|s| s.downcast_ref::<T>())
    }
}

/// A predicate plugin consulted when deciding a feature's enabled state.
#[async_trait]
pub trait FeatureFilter: Send + Sync {
    /// Bind the raw configuration parameters to a strongly-shaped settings
    /// object. Filters with no structured settings keep the default and
    /// receive the raw parameters instead.
    fn bind_parameters(&self, _parameters: &serde_json::Value) -> Option<BoundSettings> {
        None
    }

    async fn evaluate(&self, context: &FilterContext) -> Result<bool, Error>;
}

/// A filter parameterized by an application-supplied context type. Only
/// applicable when the caller supplies a context of type `C`.
#[async_trait]
pub trait ContextualFeatureFilter<C>: Send + Sync {
    fn bind_parameters(&self, _parameters: &serde_json::Value) -> Option<BoundSettings> {
        None
    }

    async fn evaluate(&self, context: &FilterContext, app_context: &C) -> Result<bool, Error>;
}

/// Object-safe face of a contextual filter. The generic context type is fixed
/// at registration; callers hand in their context as `Any` and the adapter
/// downcasts.
#[async_trait]
pub(crate) trait ErasedContextualFilter: Send + Sync {
    fn applies_to(&self, context_type: TypeId) -> bool;

    fn bind_parameters(&self, parameters: &serde_json::Value) -> Option<BoundSettings>;

    async fn evaluate(
        &self,
        context: &FilterContext,
        app_context: &(dyn Any + Send + Sync),
    ) -> Result<bool, Error>;
}

pub(crate) struct ContextualFilterAdapter<C, F> {
    filter: F,
    context_type: PhantomData<fn(C)>,
}

impl<C, F> ContextualFilterAdapter<C, F> {
    pub(crate) fn new(filter: F) -> Self {
        ContextualFilterAdapter {
            filter,
            context_type: PhantomData,
        }
    }
}

#[async_trait]
impl<C, F> ErasedContextualFilter for ContextualFilterAdapter<C, F>
where
    C: Any + Send + Sync,
    F: ContextualFeatureFilter<C> + 'static,
{
    fn applies_to(&self, context_type: TypeId) -> bool {
        context_type == TypeId::of::<C>()
    }

    fn bind_parameters(&self, parameters: &serde_json::Value) -> Option<BoundSettings> {
        self.filter.bind_parameters(parameters)
    }

    async fn evaluate(
        &self,
        context: &FilterContext,
        app_context: &(dyn Any + Send + Sync),
    ) -> Result<bool, Error> {
        match app_context.downcast_ref::<C>() {
            Some(app_context) => self.filter.evaluate(context, app_context).await,
            // A context of the wrong type is a non-match, not an error.
            None => Ok(false),
        }
    }
}

/// One registered filter name with its capabilities. The same name may carry
/// both a plain and a contextual capability; the engine prefers the
/// contextual one when an app context is supplied.
pub(crate) struct FilterEntry {
    pub(crate) name: String,
    pub(crate) plain: Option<Arc<dyn FeatureFilter>>,
    pub(crate) contextual: Option<Arc<dyn ErasedContextualFilter>>,
}

impl FilterEntry {
    pub(crate) fn new(name: String) -> Self {
        FilterEntry {
            name,
            plain: None,
            contextual: None,
        }
    }

    pub(crate) fn bind_parameters(&self, parameters: &serde_json::Value) -> Option<BoundSettings> {
        if let Some(filter) = &self.plain {
            if let Some(settings) = filter.bind_parameters(parameters) {
                return Some(settings);
            }
        }
        self.contextual
            .as_ref()
            .and_then(|filter| filter.bind_parameters(parameters))
    }
}

impl Named for FilterEntry {
    fn name(&self) -> &str {
        &self.name
    }
}
