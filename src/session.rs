use async_trait::async_trait;

/// Persists evaluation decisions for request-scoped consistency.
///
/// Managers are consulted in registration order before a feature is
/// evaluated; the first stored answer short-circuits evaluation entirely.
/// After an evaluation, every manager is handed the fresh result.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// A previously stored decision for the feature, if any.
    async fn get(&self, feature_name: &str) -> Option<bool>;

    /// Store the decision produced by an evaluation.
    async fn set(&self, feature_name: &str, enabled: bool);
}
