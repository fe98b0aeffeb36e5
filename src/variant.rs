use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A variant-level directive that can force the feature's enabled state when
/// the variant is assigned. A hard-disabled feature status always wins over
/// the override.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum StatusOverride {
    #[default]
    None,
    Enabled,
    Disabled,
}

impl FromStr for StatusOverride {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("none") {
            Ok(StatusOverride::None)
        } else if s.eq_ignore_ascii_case("enabled") {
            Ok(StatusOverride::Enabled)
        } else if s.eq_ignore_ascii_case("disabled") {
            Ok(StatusOverride::Disabled)
        } else {
            Err(Error::InvalidConfigurationSetting {
                setting: "StatusOverride",
                value: s.to_string(),
            })
        }
    }
}

/// A named configuration payload that can be assigned to a feature evaluation.
///
/// The returned configuration is either an inline value or a reference into
/// the broader configuration tree. At most one should be set; if both are,
/// the inline value wins.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct VariantDefinition {
    pub name: String,
    pub configuration_value: Option<serde_json::Value>,
    pub configuration_reference: Option<String>,
    pub status_override: StatusOverride,
}

/// A variant as handed back to the caller, with its configuration resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    pub name: String,
    pub configuration: Option<serde_json::Value>,
}

/// Why an evaluation assigned the variant it did. Included in telemetry
/// events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentReason {
    /// No variant was assigned.
    #[default]
    None,
    DefaultWhenDisabled,
    DefaultWhenEnabled,
    User,
    Group,
    Percentile,
}
