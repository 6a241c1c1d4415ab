//! Filter hooks for rewriting URLs the compressor emits.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Extension points the compressor exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Public URL of a combined part; context is the insertion point (`head`, `foot`).
    PartUrl,
    /// Any `url()`/`@import` target inside finalized CSS; context is empty.
    CssUrl,
}

/// A filter receives the current value and a context string and returns the new value.
pub type Filter = Box<dyn Fn(String, &str) -> String + Send + Sync>;

/// Priority-ordered filter registry.
#[derive(Default)]
pub struct HookApi {
    filters: HashMap<Hook, BTreeMap<i32, Vec<Filter>>>,
}

impl fmt::Debug for HookApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&Hook, usize> = self.filters.iter().map(|(hook, by_priority)| (hook, by_priority.values().map(Vec::len).sum())).collect();
        f.debug_struct("HookApi").field("filters", &counts).finish()
    }
}

impl HookApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter. Lower priorities run first; ties run in registration order.
    pub fn add_filter<F>(&mut self, hook: Hook, priority: i32, filter: F)
    where
        F: Fn(String, &str) -> String + Send + Sync + 'static,
    {
        self.filters.entry(hook).or_default().entry(priority).or_default().push(Box::new(filter));
    }

    pub fn has_filter(&self, hook: Hook) -> bool {
        self.filters.get(&hook).is_some_and(|by_priority| by_priority.values().any(|filters| !filters.is_empty()))
    }

    /// Thread `value` through every filter registered for `hook`.
    pub fn apply_filters(&self, hook: Hook, value: String, context: &str) -> String {
        let Some(by_priority) = self.filters.get(&hook) else {
            return value;
        };
        by_priority.values().flatten().fold(value, |value, filter| filter(value, context))
    }
}
