use serde::Deserialize;

/// Variant-selection rules for one feature.
///
/// Rule lists are evaluated in declaration order and are not deduplicated or
/// sorted by the engine; the first matching entry in each pass wins.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Allocation {
    /// Variant assigned when the feature is enabled and no rule matched.
    pub default_when_enabled: Option<String>,
    /// Variant assigned when the feature is disabled.
    pub default_when_disabled: Option<String>,
    pub user: Vec<UserAllocation>,
    pub group: Vec<GroupAllocation>,
    pub percentile: Vec<PercentileAllocation>,
    /// Decorrelates percentile bucketing across features that should not
    /// always co-allocate the same users. Absent, the seed is derived from
    /// the feature name.
    pub seed: Option<String>,
}

impl Allocation {
    /// The seed used for this feature's percentile bucketing.
    pub fn seed_for(&self, feature_name: &str) -> String {
        match &self.seed {
            Some(seed) => seed.clone(),
            None => format!("allocation\n{}", feature_name),
        }
    }
}

/// Assigns a variant to an explicit list of user ids.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAllocation {
    pub variant: String,
    #[serde(default)]
    pub users: Vec<String>,
}

/// Assigns a variant to members of the listed groups.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupAllocation {
    pub variant: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Assigns a variant to the users whose bucket falls in `[from, to)`.
///
/// Intervals are caller-defined: they may overlap and need not cover
/// `[0, 100)`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PercentileAllocation {
    pub variant: String,
    #[serde(default)]
    pub from: f64,
    #[serde(default)]
    pub to: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_seed_wins_over_derived() {
        let allocation = Allocation {
            seed: Some("shared-rollout".to_string()),
            ..Allocation::default()
        };
        assert_eq!(allocation.seed_for("Beta"), "shared-rollout");
    }

    #[test]
    fn derived_seed_includes_feature_name() {
        let allocation = Allocation::default();
        assert_eq!(allocation.seed_for("Beta"), "allocation\nBeta");
    }

    #[test]
    fn deserializes_rule_lists_in_order() {
        let allocation: Allocation = serde_json::from_str(
            r#"{
                "DefaultWhenDisabled": "Off",
                "User": [
                    {"Variant": "A", "Users": ["alice"]},
                    {"Variant": "B", "Users": ["alice", "bob"]}
                ],
                "Group": [{"Variant": "C", "Groups": ["ring0"]}],
                "Percentile": [{"Variant": "D", "From": 25, "To": 75}]
            }"#,
        )
        .expect("should parse");

        assert_eq!(allocation.default_when_disabled.as_deref(), Some("Off"));
        assert_eq!(allocation.user.len(), 2);
        assert_eq!(allocation.user[0].variant, "A");
        assert_eq!(allocation.user[1].variant, "B");
        assert_eq!(allocation.group[0].groups, vec!["ring0".to_string()]);
        assert_eq!(allocation.percentile[0].from, 25.0);
        assert_eq!(allocation.percentile[0].to, 75.0);
    }
}
