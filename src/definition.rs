use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::allocation::Allocation;
use crate::error::Error;
use crate::variant::VariantDefinition;

/// Names understood as the always-on sentinel filter, resolved without a
/// registry lookup.
const SENTINEL_FILTERS: [&str; 2] = ["AlwaysOn", "On"];

/// How a feature's filter results combine into one enabled state.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum RequirementType {
    /// Enabled if any filter evaluates true.
    #[default]
    Any,
    /// Enabled only if every filter evaluates true.
    All,
}

impl FromStr for RequirementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("any") {
            Ok(RequirementType::Any)
        } else if s.eq_ignore_ascii_case("all") {
            Ok(RequirementType::All)
        } else {
            Err(Error::InvalidConfigurationSetting {
                setting: "RequirementType",
                value: s.to_string(),
            })
        }
    }
}

/// Whether a feature's filters are consulted at all.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum FeatureStatus {
    /// The enabled state is computed from the feature's filters.
    #[default]
    Conditional,
    /// The feature is off regardless of its filters, and no variant
    /// status override can turn it back on.
    Disabled,
}

impl FromStr for FeatureStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("conditional") {
            Ok(FeatureStatus::Conditional)
        } else if s.eq_ignore_ascii_case("disabled") {
            Ok(FeatureStatus::Disabled)
        } else {
            Err(Error::InvalidConfigurationSetting {
                setting: "Status",
                value: s.to_string(),
            })
        }
    }
}

/// A reference to a filter by name, with the opaque parameter tree the filter
/// will interpret.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterConfiguration {
    pub name: String,
    // Held behind an Arc so the binder cache can key validity on parameter
    // instance identity.
    #[serde(default = "null_parameters")]
    pub parameters: Arc<serde_json::Value>,
}

fn null_parameters() -> Arc<serde_json::Value> {
    Arc::new(serde_json::Value::Null)
}

impl FilterConfiguration {
    /// Whether this entry names the always-on sentinel.
    pub fn is_always_on(&self) -> bool {
        SENTINEL_FILTERS
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&self.name))
    }
}

/// Per-feature telemetry opt-in, plus metadata echoed into published events.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TelemetryConfiguration {
    pub enabled: bool,
    pub metadata: HashMap<String, String>,
}

/// The unit of configuration for one feature.
///
/// Definitions are read-only snapshots produced by a
/// [FeatureDefinitionProvider](crate::FeatureDefinitionProvider); the engine
/// never mutates them.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureDefinition {
    pub name: String,
    /// Filters consulted in order; evaluation short-circuits per
    /// [RequirementType].
    #[serde(default)]
    pub enabled_for: Vec<FilterConfiguration>,
    #[serde(default)]
    pub requirement_type: RequirementType,
    #[serde(default)]
    pub status: FeatureStatus,
    #[serde(default)]
    pub allocation: Option<Allocation>,
    #[serde(default)]
    pub variants: Vec<VariantDefinition>,
    #[serde(default)]
    pub telemetry: TelemetryConfiguration,
}

impl FeatureDefinition {
    /// Look up a declared variant by name. Allocation rules may reference
    /// variants that were never declared; those resolve to `None` and are
    /// logged at the call site rather than rejected eagerly.
    pub fn variant(&self, name: &str) -> Option<&VariantDefinition> {
        self.variants.iter().find(|v| v.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::StatusOverride;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn deserializes_full_definition() {
        let definition: FeatureDefinition = serde_json::from_str(
            r#"{
                "Name": "Beta",
                "EnabledFor": [
                    {"Name": "TimeWindow", "Parameters": {"Start": "2000-01-01T00:00:00Z"}},
                    {"Name": "AlwaysOn"}
                ],
                "RequirementType": "All",
                "Status": "Conditional",
                "Allocation": {
                    "DefaultWhenEnabled": "On",
                    "Percentile": [{"Variant": "On", "From": 0, "To": 50}],
                    "Seed": "beta-seed"
                },
                "Variants": [{"Name": "On", "StatusOverride": "Enabled"}],
                "Telemetry": {"Enabled": true, "Metadata": {"ring": "canary"}}
            }"#,
        )
        .expect("should parse");

        assert_eq!(definition.name, "Beta");
        assert_eq!(definition.requirement_type, RequirementType::All);
        assert_eq!(definition.status, FeatureStatus::Conditional);
        assert_that!(definition.enabled_for).has_length(2);
        assert!(!definition.enabled_for[0].is_always_on());
        assert!(definition.enabled_for[1].is_always_on());

        let allocation = definition.allocation.as_ref().unwrap();
        assert_eq!(allocation.default_when_enabled.as_deref(), Some("On"));
        assert_eq!(allocation.seed.as_deref(), Some("beta-seed"));

        let variant = definition.variant("On").unwrap();
        assert_eq!(variant.status_override, StatusOverride::Enabled);
        assert!(definition.variant("Off").is_none());

        assert!(definition.telemetry.enabled);
        assert_eq!(
            definition.telemetry.metadata.get("ring").map(String::as_str),
            Some("canary")
        );
    }

    #[test]
    fn defaults_apply_to_sparse_definition() {
        let definition: FeatureDefinition =
            serde_json::from_str(r#"{"Name": "Sparse"}"#).expect("should parse");

        assert_eq!(definition.requirement_type, RequirementType::Any);
        assert_eq!(definition.status, FeatureStatus::Conditional);
        assert!(definition.enabled_for.is_empty());
        assert!(definition.allocation.is_none());
        assert!(definition.variants.is_empty());
        assert!(!definition.telemetry.enabled);
    }

    #[test]
    fn missing_filter_parameters_default_to_null() {
        let config: FilterConfiguration =
            serde_json::from_str(r#"{"Name": "Percentage"}"#).expect("should parse");
        assert!(config.parameters.is_null());
    }

    #[test_case("any", RequirementType::Any; "lower any")]
    #[test_case("Any", RequirementType::Any; "title Any")]
    #[test_case("ALL", RequirementType::All; "upper ALL")]
    fn requirement_type_parses_case_insensitively(raw: &str, expected: RequirementType) {
        assert_eq!(raw.parse::<RequirementType>().unwrap(), expected);
    }

    #[test]
    fn unparseable_requirement_type_is_invalid_setting() {
        let err = "sometimes".parse::<RequirementType>().unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfigurationSetting {
                setting: "RequirementType",
                value: "sometimes".to_string(),
            }
        );
    }

    #[test_case("conditional", FeatureStatus::Conditional)]
    #[test_case("DISABLED", FeatureStatus::Disabled)]
    fn status_parses_case_insensitively(raw: &str, expected: FeatureStatus) {
        assert_eq!(raw.parse::<FeatureStatus>().unwrap(), expected);
    }

    #[test_case("AlwaysOn"; "mixed AlwaysOn")]
    #[test_case("alwayson"; "lower alwayson")]
    #[test_case("On"; "mixed On")]
    #[test_case("ON"; "upper ON")]
    fn sentinel_names_are_recognized(name: &str) {
        let config = FilterConfiguration {
            name: name.to_string(),
            parameters: Arc::new(serde_json::Value::Null),
        };
        assert!(config.is_always_on());
    }
}
