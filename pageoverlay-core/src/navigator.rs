use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::element::{Element, ElementBatch, ElementId, QueryResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightState(Option<ElementId>);

impl HighlightState {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn get(&self) -> Option<&ElementId> {
        self.0.as_ref()
    }

    pub fn is(&self, id: &ElementId) -> bool {
        self.0.as_ref() == Some(id)
    }

    pub fn set(&mut self, id: ElementId) {
        self.0 = Some(id);
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// Clears when `id` is already highlighted, otherwise highlights it.
    /// Returns the new state.
    pub fn toggle(&mut self, id: ElementId) -> Option<&ElementId> {
        if self.is(&id) {
            self.0 = None;
        } else {
            self.0 = Some(id);
        }
        self.0.as_ref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    elements: Vec<Element>,
    summary: String,
    reasoning: Option<String>,
    reported_total: Option<usize>,
    filter_stats: Option<Value>,
}

impl MatchSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Ordering is computed here from the matches themselves; the order the
    /// service returned them in is discarded.
    pub fn from_elements(elements: impl IntoIterator<Item = Element>) -> Self {
        let mut seen = HashSet::new();
        let mut elements: Vec<Element> = elements
            .into_iter()
            .filter(|element| seen.insert(element.id.clone()))
            .collect();
        elements.sort_by(|a, b| {
            a.page_number
                .cmp(&b.page_number)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            elements,
            ..Self::default()
        }
    }

    pub fn from_query(result: &QueryResult) -> Self {
        let batch = ElementBatch::from_records(result.elements.iter().cloned());
        Self {
            summary: result.summary.clone(),
            reasoning: result.reasoning.clone(),
            reported_total: result.total_matches,
            filter_stats: result.filter_stats.clone(),
            ..Self::from_elements(batch.iter().cloned())
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn position_of(&self, id: &ElementId) -> Option<usize> {
        self.elements.iter().position(|element| &element.id == id)
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.position_of(id).is_some()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn filter_stats(&self) -> Option<&Value> {
        self.filter_stats.as_ref()
    }

    pub fn reported_total(&self) -> usize {
        self.reported_total.unwrap_or(self.elements.len())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchNavigator {
    matches: Arc<MatchSet>,
}

impl MatchNavigator {
    pub fn new(matches: Arc<MatchSet>) -> Self {
        Self { matches }
    }

    pub fn matches(&self) -> &Arc<MatchSet> {
        &self.matches
    }

    pub fn replace(&mut self, matches: Arc<MatchSet>) {
        self.matches = matches;
    }

    /// Index of the highlighted element, `None` when nothing is highlighted
    /// or the highlight is not one of the matches.
    pub fn current(&self, highlight: &HighlightState) -> Option<usize> {
        highlight
            .get()
            .and_then(|id| self.matches.position_of(id))
    }

    /// Wraps past the last match. Starts at the first match when there is
    /// no current position. `None` on an empty set.
    pub fn next(&self, highlight: &HighlightState) -> Option<&Element> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        let index = match self.current(highlight) {
            Some(current) => (current + 1) % len,
            None => 0,
        };
        self.matches.get(index)
    }

    pub fn previous(&self, highlight: &HighlightState) -> Option<&Element> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        let index = match self.current(highlight) {
            Some(current) => (current + len - 1) % len,
            None => 0,
        };
        self.matches.get(index)
    }

    pub fn select(&self, index: usize) -> Option<&Element> {
        self.matches.get(index)
    }

    pub fn position(&self, highlight: &HighlightState) -> (Option<usize>, usize) {
        (self.current(highlight), self.matches.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(id: &str, page_number: usize) -> Element {
        Element {
            id: id.into(),
            page_number,
            content: String::new(),
            pixel_region: None,
            unit_region: None,
            relevance: None,
        }
    }

    fn navigator(entries: &[(&str, usize)]) -> MatchNavigator {
        MatchNavigator::new(Arc::new(MatchSet::from_elements(
            entries.iter().map(|&(id, page)| element(id, page)),
        )))
    }

    fn step(nav: &MatchNavigator, highlight: &mut HighlightState, forward: bool) {
        let target = if forward {
            nav.next(highlight)
        } else {
            nav.previous(highlight)
        };
        if let Some(target) = target {
            highlight.set(target.id.clone());
        }
    }

    #[test]
    fn matches_sort_by_page_then_id() {
        let nav = navigator(&[("b", 2), ("a", 1), ("c", 1)]);
        let order: Vec<_> = nav
            .matches()
            .iter()
            .map(|e| (e.id.as_str(), e.page_number))
            .collect();
        assert_eq!(order, vec![("a", 1), ("c", 1), ("b", 2)]);

        let mut highlight = HighlightState::none();
        step(&nav, &mut highlight, true);
        assert!(highlight.is(&"a".into()));
        step(&nav, &mut highlight, true);
        assert!(highlight.is(&"c".into()));
    }

    #[test]
    fn duplicate_matches_keep_first_occurrence() {
        let set = MatchSet::from_elements(vec![element("a", 3), element("a", 1), element("b", 2)]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).unwrap().page_number, 3);
    }

    #[test]
    fn both_directions_start_at_first_match_without_highlight() {
        let nav = navigator(&[("x", 5), ("y", 1), ("z", 3)]);
        let none = HighlightState::none();
        assert_eq!(nav.next(&none).unwrap().id.as_str(), "y");
        assert_eq!(nav.previous(&none).unwrap().id.as_str(), "y");
    }

    #[test]
    fn highlight_outside_match_set_counts_as_no_position() {
        let nav = navigator(&[("a", 1), ("b", 2)]);
        let mut highlight = HighlightState::none();
        highlight.set("elsewhere".into());

        assert_eq!(nav.current(&highlight), None);
        assert_eq!(nav.next(&highlight).unwrap().id.as_str(), "a");
        assert_eq!(nav.position(&highlight), (None, 2));
    }

    #[test]
    fn next_then_previous_returns_to_start() {
        let nav = navigator(&[("a", 1), ("b", 1), ("c", 2), ("d", 4)]);
        for start in 0..nav.matches().len() {
            let mut highlight = HighlightState::none();
            highlight.set(nav.select(start).unwrap().id.clone());

            step(&nav, &mut highlight, true);
            step(&nav, &mut highlight, false);
            assert_eq!(nav.current(&highlight), Some(start));

            step(&nav, &mut highlight, false);
            step(&nav, &mut highlight, true);
            assert_eq!(nav.current(&highlight), Some(start));
        }
    }

    #[test]
    fn stepping_len_times_cycles_back() {
        let nav = navigator(&[("a", 1), ("b", 2), ("c", 3)]);
        let len = nav.matches().len();
        for start in 0..len {
            let mut highlight = HighlightState::none();
            highlight.set(nav.select(start).unwrap().id.clone());
            for _ in 0..len {
                step(&nav, &mut highlight, true);
            }
            assert_eq!(nav.current(&highlight), Some(start));
        }
    }

    #[test]
    fn single_match_wraps_onto_itself() {
        let nav = navigator(&[("only", 9)]);
        let mut highlight = HighlightState::none();
        step(&nav, &mut highlight, true);
        step(&nav, &mut highlight, true);
        assert_eq!(nav.current(&highlight), Some(0));
        step(&nav, &mut highlight, false);
        assert_eq!(nav.current(&highlight), Some(0));
    }

    #[test]
    fn empty_match_set_is_a_no_op() {
        let nav = MatchNavigator::default();
        let mut highlight = HighlightState::none();
        highlight.set("kept".into());

        assert!(nav.next(&highlight).is_none());
        assert!(nav.previous(&highlight).is_none());
        assert_eq!(nav.position(&highlight), (None, 0));
        assert!(highlight.is(&"kept".into()));
    }

    #[test]
    fn toggle_clears_an_existing_highlight() {
        let mut highlight = HighlightState::none();
        highlight.set("a".into());
        assert_eq!(highlight.toggle("a".into()), None);
        assert_eq!(highlight.toggle("b".into()), Some(&"b".into()));
        assert_eq!(highlight.toggle("c".into()), Some(&"c".into()));
    }

    #[test]
    fn from_query_keeps_service_metadata() {
        let result = QueryResult::from_json(
            r#"{"answer": "done", "matched_elements": [
                {"id": "q2", "page_number": 2},
                {"id": "q1", "page_number": 2}
            ], "total_matches": 12, "filter_stats": {"pages_scanned": 4}}"#,
        )
        .unwrap();
        let set = MatchSet::from_query(&result);

        assert_eq!(set.summary(), "done");
        assert_eq!(set.reported_total(), 12);
        assert_eq!(set.filter_stats().unwrap()["pages_scanned"], 4);
        assert_eq!(set.get(0).unwrap().id.as_str(), "q1");
    }
}
