use std::sync::Arc;

use {dashmap::DashMap, tracing::warn};

/// Boolean predicate over an event's JSON form. Supplied by the embedding
/// application; the gateway only evaluates it.
pub trait EventFilter: Send + Sync {
    fn matches(&self, event: &serde_json::Value) -> bool;
}

/// Named filters, registered at startup and resolved by the transports from
/// their configured filter name.
#[derive(Default)]
pub struct FilterRegistry {
    filters: DashMap<String, Arc<dyn EventFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: impl Into<String>, filter: Arc<dyn EventFilter>) {
        self.filters.insert(name.into(), filter);
    }

    /// Resolve a configured filter name. An empty name means "no filter";
    /// an unknown name is tolerated the same way, with a warning, so a
    /// config typo degrades to unfiltered delivery instead of taking the
    /// transport down.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn EventFilter>> {
        if name.is_empty() {
            return None;
        }
        let found = self.filters.get(name).map(|entry| Arc::clone(&*entry));
        if found.is_none() {
            warn!(filter = name, "configured filter is not registered; events pass unfiltered");
        }
        found
    }
}

/// Whether `event` passes an optional filter.
pub fn passes(filter: &Option<Arc<dyn EventFilter>>, event: &serde_json::Value) -> bool {
    filter.as_ref().is_none_or(|f| f.matches(event))
}
