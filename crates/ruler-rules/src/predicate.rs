//! Ordered predicate chains
//!
//! A settled combination only turns into an action when every predicate in
//! the chain holds. Predicates run in insertion order and stop at the first
//! failure, so no partial action is ever taken.

use tracing::trace;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Named predicates evaluated in order
pub struct PredicateChain<T> {
    predicates: Vec<(String, Predicate<T>)>,
}

impl<T> PredicateChain<T> {
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    /// Append a predicate
    pub fn with(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicates.push((name.into(), Box::new(predicate)));
        self
    }

    /// Name of the first predicate that fails, if any
    pub fn first_failure(&self, value: &T) -> Option<&str> {
        self.predicates
            .iter()
            .find(|(_, predicate)| !predicate(value))
            .map(|(name, _)| name.as_str())
    }

    /// Check whether every predicate holds
    pub fn evaluate(&self, value: &T) -> bool {
        match self.first_failure(value) {
            Some(name) => {
                trace!(predicate = %name, "Predicate failed");
                false
            }
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl<T> Default for PredicateChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_empty_chain_passes() {
        let chain: PredicateChain<u32> = PredicateChain::new();
        assert!(chain.is_empty());
        assert!(chain.evaluate(&0));
    }

    #[test]
    fn test_reports_first_failure() {
        let chain = PredicateChain::new()
            .with("positive", |n: &i32| *n > 0)
            .with("even", |n: &i32| n % 2 == 0)
            .with("small", |n: &i32| *n < 10);

        assert_eq!(chain.len(), 3);
        assert!(chain.evaluate(&4));
        assert_eq!(chain.first_failure(&-2), Some("positive"));
        assert_eq!(chain.first_failure(&3), Some("even"));
        assert_eq!(chain.first_failure(&12), Some("small"));
    }

    #[test]
    fn test_short_circuits() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();

        let chain = PredicateChain::new()
            .with("never", |_: &()| false)
            .with("counted", move |_: &()| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            });

        assert!(!chain.evaluate(&()));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }
}
