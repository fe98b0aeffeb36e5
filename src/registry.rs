use std::sync::Arc;

use dashmap::DashMap;

/// Suffixes trimmed when matching filter references.
pub(crate) const FILTER_SUFFIXES: &[&str] = &["filter"];
/// Suffixes trimmed when matching allocator references.
pub(crate) const ALLOCATOR_SUFFIXES: &[&str] = &["allocator", "assigner"];

/// Registered implementations carry their canonical name, supplied at
/// registration time (an explicit alias, or the implementation's suffixed
/// type-style name, optionally namespaced with `.` separators).
pub(crate) trait Named {
    fn name(&self) -> &str;
}

/// The outcome of resolving a configured name, cached per queried name so
/// repeated lookups (including misses) skip the scan.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution<E> {
    Found(Arc<E>),
    NotFound,
    /// More than one registered implementation matched. Surfaced as a hard
    /// error by the caller.
    Ambiguous,
}

// Manual impl: deriving Clone would require E: Clone, but only the Arc is
// cloned.
impl<E> Clone for Resolution<E> {
    fn clone(&self) -> Self {
        match self {
            Resolution::Found(entry) => Resolution::Found(entry.clone()),
            Resolution::NotFound => Resolution::NotFound,
            Resolution::Ambiguous => Resolution::Ambiguous,
        }
    }
}

/// Resolves configured names to registered implementations.
pub(crate) struct Registry<E> {
    entries: Vec<Arc<E>>,
    suffixes: &'static [&'static str],
    cache: DashMap<String, Resolution<E>>,
}

impl<E: Named> Registry<E> {
    pub(crate) fn new(suffixes: &'static [&'static str]) -> Self {
        Registry {
            entries: Vec::new(),
            suffixes,
            cache: DashMap::new(),
        }
    }

    pub(crate) fn register(&mut self, entry: E) {
        self.entries.push(Arc::new(entry));
    }

    pub(crate) fn resolve(&self, name: &str) -> Resolution<E> {
        self.cache
            .entry(name.to_lowercase())
            .or_insert_with(|| self.scan(name))
            .clone()
    }

    fn scan(&self, name: &str) -> Resolution<E> {
        let mut found = None;
        for entry in &self.entries {
            if self.is_matching_reference(name, entry.name()) {
                if found.is_some() {
                    return Resolution::Ambiguous;
                }
                found = Some(entry.clone());
            }
        }
        match found {
            Some(entry) => Resolution::Found(entry),
            None => Resolution::NotFound,
        }
    }

    /// A reference containing a namespace separator must match the full
    /// canonical name; a short reference matches only the last segment, so
    /// `"Percentage"` finds an implementation named `"MyApp.PercentageFilter"`.
    fn is_matching_reference(&self, reference: &str, canonical: &str) -> bool {
        let candidate = if reference.contains('.') {
            canonical
        } else {
            canonical.rsplit('.').next().unwrap_or(canonical)
        };

        if equal_ignore_case(reference, candidate) {
            return true;
        }

        // A reference that leaves the suffix off still matches a suffixed
        // implementation name, but a suffixed reference is taken literally.
        if !self.has_suffix(reference) {
            if let Some(trimmed) = self.trim_suffix(candidate) {
                return equal_ignore_case(reference, trimmed);
            }
        }

        false
    }

    fn has_suffix(&self, name: &str) -> bool {
        self.suffixes.iter().any(|suffix| {
            name.len() >= suffix.len()
                && name.is_char_boundary(name.len() - suffix.len())
                && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
        })
    }

    fn trim_suffix<'a>(&self, name: &'a str) -> Option<&'a str> {
        for suffix in self.suffixes {
            if name.len() > suffix.len() && name.is_char_boundary(name.len() - suffix.len()) {
                let (head, tail) = name.split_at(name.len() - suffix.len());
                if tail.eq_ignore_ascii_case(suffix) {
                    return Some(head);
                }
            }
        }
        None
    }
}

fn equal_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
