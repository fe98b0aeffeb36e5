use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use rand::Rng;
use serde::Deserialize;

use crate::error::Error;
use crate::filter::{BoundSettings, FeatureFilter, FilterContext};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct PercentageFilterSettings {
    /// Percentage of evaluations the feature is enabled for, in `[0, 100]`.
    pub value: f64,
}

/// Enables a feature for a percentage of evaluations.
///
/// Assignment is re-rolled on every call; a caller wanting the same users to
/// stay enabled across calls should use percentile variant allocation or the
/// [TargetingFilter](crate::filters::TargetingFilter) instead.
#[derive(Debug, Default)]
pub struct PercentageFilter;

impl PercentageFilter {
    fn settings(&self, context: &FilterContext) -> Option<PercentageFilterSettings> {
        if let Some(settings) = context.settings_as::<PercentageFilterSettings>() {
            return Some(*settings);
        }
        serde_json::from_value((*context.parameters).clone()).ok()
    }
}

#[async_trait]
impl FeatureFilter for PercentageFilter {
    fn bind_parameters(&self, parameters: &serde_json::Value) -> Option<BoundSettings> {
        serde_json::from_value::<PercentageFilterSettings>(parameters.clone())
            .ok()
            .map(|settings| Arc::new(settings) as BoundSettings)
    }

    async fn evaluate(&self, context: &FilterContext) -> Result<bool, Error> {
        let settings = match self.settings(context) {
            Some(settings) => settings,
            None => {
                warn!(
                    "feature '{}': percentage filter parameters are malformed",
                    context.feature_name
                );
                return Ok(false);
            }
        };

        if settings.value < 0.0 {
            warn!(
                "feature '{}': percentage filter value {} is negative",
                context.feature_name, settings.value
            );
            return Ok(false);
        }

        Ok(rand::thread_rng().gen_range(0.0..100.0) < settings.value)
    }
}
