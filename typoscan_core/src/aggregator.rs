use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A confirmed hit: which base candidate, which of its variants, and what
/// that variant derived to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub base: String,
    pub variant: String,
    pub identifier: String,
    pub context: String,
}

/// Terminal state of a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SearchOutcome {
    Found(MatchResult),
    Exhausted,
    Interrupted,
}

impl SearchOutcome {
    pub fn matched(&self) -> Option<&MatchResult> {
        match self {
            SearchOutcome::Found(result) => Some(result),
            _ => None,
        }
    }
}

/// A one-way flag shared between the coordinator and its workers.
///
/// Once triggered it stays triggered. Workers poll it between variants.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AggregatorState {
    Searching,
    Found(MatchResult),
    Exhausted,
    Interrupted,
}

/// Records the outcome of a search and halts workers when it is decided.
///
/// The only legal transitions are from `Searching` to one of the terminal
/// states; every later offer is refused and its payload discarded.
#[derive(Debug)]
pub struct ResultAggregator {
    state: AggregatorState,
    stop: StopSignal,
}

impl ResultAggregator {
    /// `stop` is triggered on the first terminal transition.
    pub fn new(stop: StopSignal) -> Self {
        Self {
            state: AggregatorState::Searching,
            stop,
        }
    }

    pub fn is_searching(&self) -> bool {
        self.state == AggregatorState::Searching
    }

    /// Accepts `result` if nothing has been decided yet. Returns whether it
    /// was accepted.
    pub fn offer_match(&mut self, result: MatchResult) -> bool {
        self.transition(AggregatorState::Found(result))
    }

    pub fn mark_interrupted(&mut self) -> bool {
        self.transition(AggregatorState::Interrupted)
    }

    pub fn mark_exhausted(&mut self) -> bool {
        self.transition(AggregatorState::Exhausted)
    }

    fn transition(&mut self, next: AggregatorState) -> bool {
        if !self.is_searching() {
            return false;
        }
        self.state = next;
        self.stop.trigger();
        true
    }

    /// Consumes the aggregator. A search that was never decided is exhausted.
    pub fn into_outcome(self) -> SearchOutcome {
        match self.state {
            AggregatorState::Found(result) => SearchOutcome::Found(result),
            AggregatorState::Interrupted => SearchOutcome::Interrupted,
            AggregatorState::Searching | AggregatorState::Exhausted => SearchOutcome::Exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(variant: &str) -> MatchResult {
        MatchResult {
            base: "secret".to_string(),
            variant: variant.to_string(),
            identifier: "X123".to_string(),
            context: "m/0".to_string(),
        }
    }

    #[test]
    fn first_match_wins_and_triggers_stop() {
        let stop = StopSignal::new();
        let mut aggregator = ResultAggregator::new(stop.clone());
        assert!(!stop.is_triggered());

        assert!(aggregator.offer_match(hit("secrett")));
        assert!(stop.is_triggered());
        assert!(!aggregator.offer_match(hit("other")));
        assert!(!aggregator.mark_interrupted());
        assert!(!aggregator.mark_exhausted());

        assert_eq!(aggregator.into_outcome(), SearchOutcome::Found(hit("secrett")));
    }

    #[test]
    fn interrupted_is_terminal() {
        let mut aggregator = ResultAggregator::new(StopSignal::new());
        assert!(aggregator.mark_interrupted());
        assert!(!aggregator.offer_match(hit("late")));
        assert_eq!(aggregator.into_outcome(), SearchOutcome::Interrupted);
    }

    #[test]
    fn undecided_search_is_exhausted() {
        let aggregator = ResultAggregator::new(StopSignal::new());
        assert!(aggregator.is_searching());
        assert_eq!(aggregator.into_outcome(), SearchOutcome::Exhausted);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let found = serde_json::to_value(SearchOutcome::Found(hit("v"))).unwrap();
        assert_eq!(found["outcome"], "found");
        assert_eq!(found["variant"], "v");
        assert_eq!(
            serde_json::to_value(SearchOutcome::Interrupted).unwrap()["outcome"],
            "interrupted"
        );
    }
}
