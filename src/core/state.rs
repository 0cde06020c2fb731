/// Per-runtime element state — the mutable flags the walker and templater
/// maintain while a story plays. The loaded `Project` stays untouched, so
/// one project can back any number of runtimes.

use rustc_hash::FxHashMap;

/// Runtime flags for one element.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementState {
    /// Consumed by the cycle policies and the choice filter.
    pub visited: bool,
    /// Set by the `[-]` marker: once chosen, the element never reappears.
    pub just_once: bool,
    /// Set by the `[+]` marker: offered only when every normal choice is gone.
    pub if_no_more: bool,
    /// The element was auto-hidden because its rendered text was empty.
    pub was_hidden_because_empty: bool,
}

/// Table of element states keyed by element id. Entries materialize lazily;
/// an absent entry reads as all-false.
#[derive(Debug, Clone, Default)]
pub struct ElementStates {
    states: FxHashMap<String, ElementState>,
}

impl ElementStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, element_id: &str) -> ElementState {
        self.states.get(element_id).copied().unwrap_or_default()
    }

    pub fn get_mut(&mut self, element_id: &str) -> &mut ElementState {
        self.states.entry(element_id.to_string()).or_default()
    }

    pub fn is_visited(&self, element_id: &str) -> bool {
        self.get(element_id).visited
    }

    pub fn set_visited(&mut self, element_id: &str, visited: bool) {
        self.get_mut(element_id).visited = visited;
    }

    /// Drop every flag; used by `load`.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
