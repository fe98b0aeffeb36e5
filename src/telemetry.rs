use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::variant::AssignmentReason;

/// A structured record of one feature evaluation, handed to telemetry
/// publishers when the feature's telemetry configuration enables it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationEvent {
    pub feature_name: String,
    pub enabled: bool,
    /// The assigned variant, when the feature declares any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub reason: AssignmentReason,
    /// Free-form metadata from the feature's telemetry configuration.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// A sink for evaluation events.
///
/// The engine does not interpret publish failures; publishers are expected
/// to handle their own transport concerns.
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    async fn publish(&self, event: &EvaluationEvent);
}
