use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use serde::Deserialize;

use crate::error::Error;
use crate::filter::{BoundSettings, ContextualFeatureFilter, FilterContext};
use crate::targeting::{self, TargetingContext};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TargetingFilterSettings {
    pub audience: Audience,
}

/// The audience a feature is targeted at.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Audience {
    /// Users always included.
    pub users: Vec<String>,
    /// Groups included for a sticky percentage of their members.
    pub groups: Vec<GroupRollout>,
    /// Sticky rollout percentage applied to everyone else.
    pub default_rollout_percentage: f64,
    /// Users and groups excluded no matter what the inclusion rules say.
    pub exclusion: AudienceExclusion,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct GroupRollout {
    pub name: String,
    pub rollout_percentage: f64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct AudienceExclusion {
    pub users: Vec<String>,
    pub groups: Vec<String>,
}

/// Enables a feature for a configured audience.
///
/// Unlike [PercentageFilter](crate::filters::PercentageFilter), rollout here
/// is sticky: membership in a rollout slice is derived from the user's
/// percentile bucket, seeded per feature and group, so a user stays in or
/// out across calls.
#[derive(Debug, Default)]
pub struct TargetingFilter {
    /// Compare user ids and group names case-insensitively.
    pub ignore_case: bool,
}

impl TargetingFilter {
    fn settings(&self, context: &FilterContext) -> Option<TargetingFilterSettings> {
        if let Some(settings) = context.settings_as::<TargetingFilterSettings>() {
            return Some(settings.clone());
        }
        serde_json::from_value((*context.parameters).clone()).ok()
    }
}

#[async_trait]
impl ContextualFeatureFilter<TargetingContext> for TargetingFilter {
    fn bind_parameters(&self, parameters: &serde_json::Value) -> Option<BoundSettings> {
        serde_json::from_value::<TargetingFilterSettings>(parameters.clone())
            .ok()
            .map(|settings| Arc::new(settings) as BoundSettings)
    }

    async fn evaluate(
        &self,
        context: &FilterContext,
        app_context: &TargetingContext,
    ) -> Result<bool, Error> {
        let settings = match self.settings(context) {
            Some(settings) => settings,
            None => {
                warn!(
                    "feature '{}': targeting filter parameters are malformed",
                    context.feature_name
                );
                return Ok(false);
            }
        };
        let audience = &settings.audience;

        if targeting::is_targeted_user(
            &app_context.user_id,
            &audience.exclusion.users,
            self.ignore_case,
        ) || targeting::is_targeted_group(
            &app_context.groups,
            &audience.exclusion.groups,
            self.ignore_case,
        ) {
            return Ok(false);
        }

        if targeting::is_targeted_user(&app_context.user_id, &audience.users, self.ignore_case) {
            return Ok(true);
        }

        for group in &audience.groups {
            let member = targeting::is_targeted_group(
                &app_context.groups,
                std::slice::from_ref(&group.name),
                self.ignore_case,
            );
            if member {
                let seed = format!("{}\n{}", context.feature_name, group.name);
                if targeting::is_targeted_percentile(
                    app_context,
                    0.0,
                    group.rollout_percentage,
                    self.ignore_case,
                    &seed,
                )? {
                    return Ok(true);
                }
            }
        }

        let seed = format!("{}\n", context.feature_name);
        targeting::is_targeted_percentile(
            app_context,
            0.0,
            audience.default_rollout_percentage,
            self.ignore_case,
            &seed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(parameters: serde_json::Value) -> FilterContext {
        FilterContext {
            feature_name: "Beta".to_string(),
            parameters: Arc::new(parameters),
            settings: None,
        }
    }

    async fn evaluate(parameters: serde_json::Value, app_context: &TargetingContext) -> bool {
        TargetingFilter::default()
            .evaluate(&context(parameters), app_context)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn listed_users_are_included() {
        let parameters = serde_json::json!({"Audience": {"Users": ["alice"]}});
        assert!(evaluate(parameters.clone(), &TargetingContext::new("alice")).await);
        assert!(!evaluate(parameters, &TargetingContext::new("bob")).await);
    }

    #[tokio::test]
    async fn excluded_users_lose_even_when_listed() {
        let parameters = serde_json::json!({
            "Audience": {
                "Users": ["alice"],
                "Exclusion": {"Users": ["alice"]}
            }
        });
        assert!(!evaluate(parameters, &TargetingContext::new("alice")).await);
    }

    #[tokio::test]
    async fn excluded_groups_trump_full_rollout() {
        let parameters = serde_json::json!({
            "Audience": {
                "DefaultRolloutPercentage": 100,
                "Exclusion": {"Groups": ["blocked"]}
            }
        });
        let blocked = TargetingContext::new("alice").with_groups(["blocked"]);
        let free = TargetingContext::new("alice");

        assert!(!evaluate(parameters.clone(), &blocked).await);
        assert!(evaluate(parameters, &free).await);
    }

    #[tokio::test]
    async fn group_rollout_is_sticky_per_user() {
        // Buckets for seed "Beta\nring1": alice 49.08..., bob 43.69...
        let parameters = serde_json::json!({
            "Audience": {
                "Groups": [{"Name": "ring1", "RolloutPercentage": 45}]
            }
        });
        let alice = TargetingContext::new("alice").with_groups(["ring1"]);
        let bob = TargetingContext::new("bob").with_groups(["ring1"]);

        assert!(!evaluate(parameters.clone(), &alice).await);
        assert!(evaluate(parameters.clone(), &bob).await);
        // Re-evaluation does not re-roll.
        assert!(evaluate(parameters, &bob).await);
    }

    #[tokio::test]
    async fn default_rollout_buckets_unmatched_users() {
        // Buckets for seed "Beta\n": alice 39.67..., bob 83.57...
        let parameters = serde_json::json!({"Audience": {"DefaultRolloutPercentage": 40}});

        assert!(evaluate(parameters.clone(), &TargetingContext::new("alice")).await);
        assert!(!evaluate(parameters, &TargetingContext::new("bob")).await);
    }

    #[tokio::test]
    async fn malformed_parameters_disable_the_feature() {
        assert!(!evaluate(serde_json::Value::Null, &TargetingContext::new("alice")).await);
    }

    #[tokio::test]
    async fn binding_produces_reusable_settings() {
        let filter = TargetingFilter::default();
        let parameters = serde_json::json!({"Audience": {"Users": ["alice"]}});
        let mut ctx = context(serde_json::Value::Null);
        ctx.settings = ContextualFeatureFilter::<TargetingContext>::bind_parameters(
            &filter,
            &parameters,
        );

        assert!(filter
            .evaluate(&ctx, &TargetingContext::new("alice"))
            .await
            .unwrap());
    }
}
