use thiserror::Error as ThisError;

/// Error describes the ways a feature evaluation can fail.
///
/// The kinds marked as ignorable degrade to a logged warning and a safe default
/// (disabled feature, no variant) when the matching
/// [FeatureManagerOptions](crate::FeatureManagerOptions) flag is set; everything
/// else always surfaces to the caller.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The requested feature has no definition in the provider. Ignorable via
    /// [ignore_missing_features](crate::FeatureManagerOptions::ignore_missing_features).
    #[error("the feature declaration for '{0}' was not found")]
    MissingFeature(String),

    /// A configured filter name has no registered implementation. Ignorable via
    /// [ignore_missing_filters](crate::FeatureManagerOptions::ignore_missing_filters),
    /// except under `RequirementType::All` (see [Error::Conflict]).
    #[error("the feature filter '{0}' is not registered")]
    MissingFeatureFilter(String),

    /// More than one registered filter matches a configured name. Never ignorable:
    /// silently picking one would make evaluation depend on registration order.
    #[error("the feature filter reference '{0}' matches multiple registered filters")]
    AmbiguousFeatureFilter(String),

    /// The variant allocator consulted during allocation is not registered.
    #[error("the feature variant allocator '{0}' is not registered")]
    MissingFeatureVariantAllocator(String),

    /// More than one registered allocator matches the consulted name.
    #[error("the feature variant allocator reference '{0}' matches multiple registered allocators")]
    AmbiguousFeatureVariantAllocator(String),

    /// Mutually exclusive options were configured together.
    #[error("conflicting configuration: {0}")]
    Conflict(String),

    /// A configuration value does not parse into its expected shape.
    #[error("invalid value '{value}' for setting '{setting}'")]
    InvalidConfigurationSetting {
        /// The setting that failed to parse.
        setting: &'static str,
        /// The offending value.
        value: String,
    },
}
