use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;

use crate::error::Error;
use crate::filter::{BoundSettings, FeatureFilter, FilterContext};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimeWindowFilterSettings {
    /// Inclusive start of the window; absent means "since forever".
    pub start: Option<DateTime<Utc>>,
    /// Exclusive end of the window; absent means "indefinitely".
    pub end: Option<DateTime<Utc>>,
}

/// Enables a feature between an optional start and end instant.
#[derive(Debug, Default)]
pub struct TimeWindowFilter;

impl TimeWindowFilter {
    fn settings(&self, context: &FilterContext) -> Option<TimeWindowFilterSettings> {
        if let Some(settings) = context.settings_as::<TimeWindowFilterSettings>() {
            return Some(*settings);
        }
        serde_json::from_value((*context.parameters).clone()).ok()
    }
}

#[async_trait]
impl FeatureFilter for TimeWindowFilter {
    fn bind_parameters(&self, parameters: &serde_json::Value) -> Option<BoundSettings> {
        serde_json::from_value::<TimeWindowFilterSettings>(parameters.clone())
            .ok()
            .map(|settings| Arc::new(settings) as BoundSettings)
    }

    async fn evaluate(&self, context: &FilterContext) -> Result<bool, Error> {
        let settings = match self.settings(context) {
            Some(settings) => settings,
            None => {
                warn!(
                    "feature '{}': time window filter parameters are malformed",
                    context.feature_name
                );
                return Ok(false);
            }
        };

        if settings.start.is_none() && settings.end.is_none() {
            warn!(
                "feature '{}': time window filter requires a Start or an End",
                context.feature_name
            );
            return Ok(false);
        }

        let now = Utc::now();
        Ok(settings.start.map_or(true, |start| now >= start)
            && settings.end.map_or(true, |end| now < end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn context(parameters: serde_json::Value) -> FilterContext {
        FilterContext {
            feature_name: "Promotion".to_string(),
            parameters: Arc::new(parameters),
            settings: None,
        }
    }

    #[test_case(r#"{"Start": "2000-01-01T00:00:00Z"}"#, true; "past start only")]
    #[test_case(r#"{"End": "2100-01-01T00:00:00Z"}"#, true; "future end only")]
    #[test_case(r#"{"Start": "2000-01-01T00:00:00Z", "End": "2100-01-01T00:00:00Z"}"#, true; "inside window")]
    #[test_case(r#"{"Start": "2100-01-01T00:00:00Z"}"#, false; "window not yet open")]
    #[test_case(r#"{"End": "2000-01-01T00:00:00Z"}"#, false; "window already closed")]
    #[test_case(r#"{}"#, false; "no bounds configured")]
    #[tokio::test]
    async fn window_bounds(parameters: &str, expected: bool) {
        let filter = TimeWindowFilter;
        let context = context(serde_json::from_str(parameters).unwrap());
        assert_eq!(filter.evaluate(&context).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn evaluates_from_bound_settings() {
        let filter = TimeWindowFilter;
        let mut context = context(serde_json::Value::Null);
        context.settings =
            filter.bind_parameters(&serde_json::json!({"Start": "2000-01-01T00:00:00Z"}));

        assert!(context.settings.is_some());
        assert!(filter.evaluate(&context).await.unwrap());
    }
}
