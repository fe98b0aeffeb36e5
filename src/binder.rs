use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::filter::BoundSettings;

const DEFAULT_SLIDING_EXPIRATION: Duration = Duration::from_secs(5 * 60);
const DEFAULT_ABSOLUTE_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

struct CacheEntry {
    parameters: Arc<serde_json::Value>,
    settings: BoundSettings,
    created: Instant,
    last_access: Instant,
}

/// Memoizes the result of binding a filter's raw parameters to a settings
/// object, keyed by feature and filter position.
///
/// A hit is valid only while the configuration hands back the very same
/// parameter instance; parameter trees are treated as value-stable only when
/// they are literally the same `Arc`. Expired or superseded entries are
/// rebound and overwritten on access; there is no background sweeper.
pub(crate) struct BinderCache {
    entries: DashMap<(String, usize), CacheEntry>,
    sliding: Duration,
    absolute: Duration,
}

impl BinderCache {
    pub(crate) fn new() -> Self {
        Self::with_expirations(DEFAULT_SLIDING_EXPIRATION, DEFAULT_ABSOLUTE_EXPIRATION)
    }

    pub(crate) fn with_expirations(sliding: Duration, absolute: Duration) -> Self {
        BinderCache {
            entries: DashMap::new(),
            sliding,
            absolute,
        }
    }

    /// Returns the cached settings for `(feature, index)` or invokes `bind`.
    /// Filters that do not support binding (bind returns `None`) are never
    /// cached.
    pub(crate) fn bind<F>(
        &self,
        feature: &str,
        index: usize,
        parameters: &Arc<serde_json::Value>,
        bind: F,
    ) -> Option<BoundSettings>
    where
        F: FnOnce(&serde_json::Value) -> Option<BoundSettings>,
    {
        let key = (feature.to_string(), index);
        let now = Instant::now();

        if let Some(mut entry) = self.entries.get_mut(&key) {
            let live = now.duration_since(entry.created) < self.absolute
                && now.duration_since(entry.last_access) < self.sliding;
            if live && Arc::ptr_eq(&entry.parameters, parameters) {
                entry.last_access = now;
                return Some(entry.settings.clone());
            }
        }

        let settings = bind(parameters);
        match &settings {
            Some(settings) => {
                self.entries.insert(
                    key,
                    CacheEntry {
                        parameters: parameters.clone(),
                        settings: settings.clone(),
                        created: now,
                        last_access: now,
                    },
                );
            }
            None => {
                self.entries.remove(&key);
            }
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_binder(calls: &AtomicUsize) -> impl Fn(&serde_json::Value) -> Option<BoundSettings> + '_ {
        move |parameters| {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(parameters.clone()) as BoundSettings)
        }
    }

    #[test]
    fn same_parameter_instance_hits_the_cache() {
        let cache = BinderCache::new();
        let calls = AtomicUsize::new(0);
        let parameters = Arc::new(serde_json::json!({"Value": 50}));

        cache.bind("Beta", 0, &parameters, counting_binder(&calls));
        cache.bind("Beta", 0, &parameters, counting_binder(&calls));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn equal_but_distinct_parameters_rebind() {
        let cache = BinderCache::new();
        let calls = AtomicUsize::new(0);
        let first = Arc::new(serde_json::json!({"Value": 50}));
        let second = Arc::new(serde_json::json!({"Value": 50}));

        cache.bind("Beta", 0, &first, counting_binder(&calls));
        cache.bind("Beta", 0, &second, counting_binder(&calls));
        // The replacement entry is keyed to the new instance.
        cache.bind("Beta", 0, &second, counting_binder(&calls));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn positions_are_cached_independently() {
        let cache = BinderCache::new();
        let calls = AtomicUsize::new(0);
        let parameters = Arc::new(serde_json::json!({"Value": 50}));

        cache.bind("Beta", 0, &parameters, counting_binder(&calls));
        cache.bind("Beta", 1, &parameters, counting_binder(&calls));
        cache.bind("Other", 0, &parameters, counting_binder(&calls));

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn expired_entries_rebind() {
        let cache = BinderCache::with_expirations(Duration::ZERO, Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);
        let parameters = Arc::new(serde_json::json!({"Value": 50}));

        cache.bind("Beta", 0, &parameters, counting_binder(&calls));
        cache.bind("Beta", 0, &parameters, counting_binder(&calls));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_binding_filters_are_not_cached() {
        let cache = BinderCache::new();
        let calls = AtomicUsize::new(0);
        let parameters = Arc::new(serde_json::json!({"Value": 50}));

        let bind = |_: &serde_json::Value| {
            calls.fetch_add(1, Ordering::SeqCst);
            None
        };
        assert!(cache.bind("Beta", 0, &parameters, bind).is_none());
        assert!(cache.bind("Beta", 0, &parameters, bind).is_none());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
