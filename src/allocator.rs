use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use log::warn;

use crate::allocation::Allocation;
use crate::error::Error;
use crate::registry::Named;
use crate::targeting::{self, TargetingContext};
use crate::variant::{AssignmentReason, VariantDefinition};

/// What an allocator sees about the feature whose variant is being chosen.
pub struct AllocationContext<'a> {
    pub feature_name: &'a str,
    pub allocation: &'a Allocation,
    pub variants: &'a [VariantDefinition],
}

impl AllocationContext<'_> {
    /// Resolve a rule's variant reference against the declared variants.
    /// Empty or undeclared references resolve to no variant, with a warning;
    /// the match itself still stands.
    fn resolve(&self, variant_name: &str, reason: AssignmentReason) -> AllocationResult {
        if variant_name.is_empty() {
            warn!(
                "an allocation rule for feature '{}' names no variant",
                self.feature_name
            );
            return AllocationResult { variant: None, reason };
        }

        let variant = self.variants.iter().find(|v| v.name == variant_name);
        if variant.is_none() {
            warn!(
                "variant '{}' referenced by feature '{}' is not declared",
                variant_name, self.feature_name
            );
        }

        AllocationResult {
            variant: variant.cloned(),
            reason,
        }
    }
}

/// The outcome of an allocation pass: a rule matched. The variant may still
/// be absent when the matched rule references an undeclared variant.
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationResult {
    pub variant: Option<VariantDefinition>,
    pub reason: AssignmentReason,
}

/// Chooses a variant for a feature. Returning `None` means no rule matched
/// and the feature's default applies.
#[async_trait]
pub trait VariantAllocator: Send + Sync {
    async fn allocate(
        &self,
        context: &AllocationContext<'_>,
        is_enabled: bool,
    ) -> Result<Option<AllocationResult>, Error>;
}

/// An allocator parameterized by an application-supplied context type.
#[async_trait]
pub trait ContextualVariantAllocator<C>: Send + Sync {
    async fn allocate(
        &self,
        context: &AllocationContext<'_>,
        app_context: &C,
        is_enabled: bool,
    ) -> Result<Option<AllocationResult>, Error>;
}

/// Object-safe face of a contextual allocator, mirroring
/// [ErasedContextualFilter](crate::filter::ErasedContextualFilter).
#[async_trait]
pub(crate) trait ErasedContextualAllocator: Send + Sync {
    fn applies_to(&self, context_type: TypeId) -> bool;

    async fn allocate(
        &self,
        context: &AllocationContext<'_>,
        app_context: &(dyn Any + Send + Sync),
        is_enabled: bool,
    ) -> Result<Option<AllocationResult>, Error>;
}

pub(crate) struct ContextualAllocatorAdapter<C, A> {
    allocator: A,
    context_type: PhantomData<fn(C)>,
}

impl<C, A> ContextualAllocatorAdapter<C, A> {
    pub(crate) fn new(allocator: A) -> Self {
        ContextualAllocatorAdapter {
            allocator,
            context_type: PhantomData,
        }
    }
}

#[async_trait]
impl<C, A> ErasedContextualAllocator for ContextualAllocatorAdapter<C, A>
where
    C: Any + Send + Sync,
    A: ContextualVariantAllocator<C> + 'static,
{
    fn applies_to(&self, context_type: TypeId) -> bool {
        context_type == TypeId::of::<C>()
    }

    async fn allocate(
        &self,
        context: &AllocationContext<'_>,
        app_context: &(dyn Any + Send + Sync),
        is_enabled: bool,
    ) -> Result<Option<AllocationResult>, Error> {
        match app_context.downcast_ref::<C>() {
            Some(app_context) => self.allocator.allocate(context, app_context, is_enabled).await,
            None => Ok(None),
        }
    }
}

/// One registered allocator name with its capabilities.
pub(crate) struct AllocatorEntry {
    pub(crate) name: String,
    pub(crate) plain: Option<Arc<dyn VariantAllocator>>,
    pub(crate) contextual: Option<Arc<dyn ErasedContextualAllocator>>,
}

impl AllocatorEntry {
    pub(crate) fn new(name: String) -> Self {
        AllocatorEntry {
            name,
            plain: None,
            contextual: None,
        }
    }
}

impl Named for AllocatorEntry {
    fn name(&self) -> &str {
        &self.name
    }
}

/// The default allocator: the caller's user id, then their groups, then their
/// percentile bucket, first matching rule in declaration order wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetingAllocator {
    /// Compare user ids and group names case-insensitively.
    pub ignore_case: bool,
}

#[async_trait]
impl ContextualVariantAllocator<TargetingContext> for TargetingAllocator {
    async fn allocate(
        &self,
        context: &AllocationContext<'_>,
        app_context: &TargetingContext,
        _is_enabled: bool,
    ) -> Result<Option<AllocationResult>, Error> {
        let allocation = context.allocation;

        for rule in &allocation.user {
            if targeting::is_targeted_user(&app_context.user_id, &rule.users, self.ignore_case) {
                return Ok(Some(context.resolve(&rule.variant, AssignmentReason::User)));
            }
        }

        for rule in &allocation.group {
            if targeting::is_targeted_group(&app_context.groups, &rule.groups, self.ignore_case) {
                return Ok(Some(context.resolve(&rule.variant, AssignmentReason::Group)));
            }
        }

        let seed = allocation.seed_for(context.feature_name);
        for rule in &allocation.percentile {
            if targeting::is_targeted_percentile(
                app_context,
                rule.from,
                rule.to,
                self.ignore_case,
                &seed,
            )? {
                return Ok(Some(
                    context.resolve(&rule.variant, AssignmentReason::Percentile),
                ));
            }
        }

        Ok(None)
    }
}
