use sha2::{Digest, Sha256};

use crate::error::Error;

/// The caller a feature evaluation applies to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetingContext {
    /// Identifies the caller; may be empty.
    pub user_id: String,
    /// Group names the caller belongs to.
    pub groups: Vec<String>,
}

impl TargetingContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        TargetingContext {
            user_id: user_id.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups<G: Into<String>>(mut self, groups: impl IntoIterator<Item = G>) -> Self {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

// 15 hex digits keep the parsed value inside i64 range.
const BUCKET_SCALE: f64 = 0xFFF_FFFF_FFFF_FFFF_u64 as f64;

/// Whether `user_id` appears in `users`.
pub fn is_targeted_user(user_id: &str, users: &[String], ignore_case: bool) -> bool {
    list_contains(users, user_id, ignore_case)
}

/// Whether any of the caller's `groups` appears in `allow_list`.
pub fn is_targeted_group(groups: &[String], allow_list: &[String], ignore_case: bool) -> bool {
    groups
        .iter()
        .any(|group| list_contains(allow_list, group, ignore_case))
}

/// Whether the caller's stable percentile bucket falls in `[from, to)`.
///
/// The bucket is a pseudo-random value in `[0, 100)` computed from
/// `seed + "\n" + user id`; it is the same on every call and across
/// process runs for a given pair. Bounds outside `[0, 100]` fail with
/// [Error::InvalidConfigurationSetting].
pub fn is_targeted_percentile(
    context: &TargetingContext,
    from: f64,
    to: f64,
    ignore_case: bool,
    seed: &str,
) -> Result<bool, Error> {
    if !(0.0..=100.0).contains(&from) {
        return Err(Error::InvalidConfigurationSetting {
            setting: "From",
            value: from.to_string(),
        });
    }
    if !(0.0..=100.0).contains(&to) {
        return Err(Error::InvalidConfigurationSetting {
            setting: "To",
            value: to.to_string(),
        });
    }

    let bucket = if ignore_case {
        bucket_of(seed, &context.user_id.to_lowercase())
    } else {
        bucket_of(seed, &context.user_id)
    };
    Ok(bucket >= from && bucket < to)
}

/// The stable bucket for a `(seed, user id)` pair.
///
/// SHA-256 is load-bearing here: existing percentile assignments are only
/// stable for as long as the hash construction is, so changing it is a
/// breaking change for every deployed allocation.
pub(crate) fn bucket_of(seed: &str, user_id: &str) -> f64 {
    let mut hash = Sha256::new();
    hash.update(seed.as_bytes());
    hash.update(b"\n");
    hash.update(user_id.as_bytes());

    let digest = hash.finalize();
    let hexhash = base16ct::lower::encode_string(&digest);

    let hexhash_15 = &hexhash[..15]; // yes, 15 chars, not 16
    let numhash = i64::from_str_radix(hexhash_15, 16).unwrap();

    numhash as f64 / BUCKET_SCALE * 100.0
}

fn list_contains(list: &[String], value: &str, ignore_case: bool) -> bool {
    list.iter().any(|entry| {
        if ignore_case {
            entry.eq_ignore_ascii_case(value)
        } else {
            entry == value
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spectral::prelude::*;
    use test_case::test_case;

    fn close_to(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-6
    }

    #[test]
    fn bucket_values_are_stable() {
        // Pinned values; a change here means existing percentile assignments
        // have shifted.
        assert!(close_to(bucket_of("s", "u1"), 48.9322610640974));
        assert!(close_to(bucket_of("s", "u2"), 98.69322457606793));
        assert!(close_to(bucket_of("s", "u3"), 41.13529933850025));
        assert!(close_to(bucket_of("allocation\nRollout", "alice"), 69.92346451016867));
        assert!(close_to(bucket_of("allocation\nRollout", "bob"), 4.330949569272901));
    }

    #[test]
    fn bucket_is_deterministic_across_calls() {
        for user in ["u1", "alice", "", "ユーザー"] {
            let first = bucket_of("seed", user);
            for _ in 0..10 {
                assert_eq!(first, bucket_of("seed", user));
            }
        }
    }

    #[test]
    fn seeds_decorrelate_buckets() {
        assert!(close_to(bucket_of("seed-a", "carol"), 32.415888699594966));
        assert!(close_to(bucket_of("seed-b", "carol"), 93.09459903037055));
    }

    #[test]
    fn buckets_split_evenly_over_large_samples() {
        let n = 100_000;
        let below = (0..n)
            .filter(|i| bucket_of("allocation\nRollout", &format!("user{}", i)) < 50.0)
            .count();

        let share = below as f64 / n as f64;
        asserting!("half of the users should land below the midpoint")
            .that(&(share > 0.48 && share < 0.52))
            .is_true();
    }

    #[test_case(0.0, 50.0, true; "inside the interval")]
    #[test_case(0.0, 48.0, false; "below From is excluded")]
    #[test_case(48.9322610640974, 100.0, true; "From bound is inclusive")]
    #[test_case(0.0, 48.9322610640974, false; "To bound is exclusive")]
    fn percentile_interval_is_half_open(from: f64, to: f64, expected: bool) {
        // bucket_of("s", "u1") == 48.9322610640974
        let context = TargetingContext::new("u1");
        assert_eq!(
            is_targeted_percentile(&context, from, to, false, "s").unwrap(),
            expected
        );
    }

    #[test]
    fn percentile_ignore_case_buckets_the_lowercased_id() {
        let upper = TargetingContext::new("U1");
        let lower = TargetingContext::new("u1");

        let in_band = is_targeted_percentile(&lower, 40.0, 60.0, false, "s").unwrap();
        assert_eq!(
            is_targeted_percentile(&upper, 40.0, 60.0, true, "s").unwrap(),
            in_band
        );
    }

    #[test_case(-0.5, 50.0, "From")]
    #[test_case(0.0, 100.5, "To")]
    #[test_case(101.0, 50.0, "From")]
    fn out_of_range_bounds_are_invalid(from: f64, to: f64, setting: &str) {
        let context = TargetingContext::new("u1");
        let err = is_targeted_percentile(&context, from, to, false, "s").unwrap_err();
        match err {
            Error::InvalidConfigurationSetting { setting: s, .. } => assert_eq!(s, setting),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn user_membership_honors_case_flag() {
        let users = vec!["Alice".to_string(), "bob".to_string()];
        assert!(is_targeted_user("Alice", &users, false));
        assert!(!is_targeted_user("alice", &users, false));
        assert!(is_targeted_user("alice", &users, true));
        assert!(!is_targeted_user("carol", &users, true));
    }

    #[test]
    fn group_membership_matches_any_overlap() {
        let groups = vec!["ring2".to_string(), "beta".to_string()];
        let allow = vec!["beta".to_string()];
        assert!(is_targeted_group(&groups, &allow, false));
        assert!(!is_targeted_group(&groups, &["ring0".to_string()], false));
        assert!(!is_targeted_group(&[], &allow, false));
    }

    proptest! {
        #[test]
        fn bucket_is_always_in_range(seed in ".*", user in ".*") {
            let bucket = bucket_of(&seed, &user);
            prop_assert!((0.0..100.0).contains(&bucket));
        }
    }
}
