use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::document::{DocumentId, RasterizedPage};
use crate::element::{ElementBatch, ElementId, QueryResult};
use crate::navigator::{MatchNavigator, MatchSet};
use crate::overlay::{OverlayBox, OverlayController, OverlayState, RenderOutcome};
use crate::renderer::{DocumentProvider, PageRasterizer, PageRenderer, RenderError};

#[derive(Debug, Clone)]
pub enum Command {
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoPage { page: usize },
    LastPage,
    NextMatch,
    PrevMatch,
    SelectMatch { index: usize },
    ToggleHighlight { id: ElementId },
    ClickAt { x: f32, y: f32 },
    ClearHighlight,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    DocumentOpened(DocumentId),
    DocumentClosed(DocumentId),
    PageReady { page: usize },
    RenderFailed(RenderError),
    HighlightChanged(Option<ElementId>),
    MatchesReplaced { total: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct OverlaySnapshot {
    pub state: OverlayState,
    pub document: Option<DocumentId>,
    pub document_name: Option<String>,
    pub page_count: usize,
    pub current_page: Option<usize>,
    pub displayed_page: Option<usize>,
    pub highlighted: Option<ElementId>,
    pub position: (Option<usize>, usize),
    pub reported_matches: usize,
    pub summary: Option<String>,
    pub reasoning: Option<String>,
    pub filter_stats: Option<serde_json::Value>,
    pub boxes: Vec<OverlayBox>,
    #[serde(skip)]
    pub raster: Option<Arc<RasterizedPage>>,
}

#[derive(Default)]
struct EngineState {
    renderer: Option<Arc<PageRenderer>>,
    controller: OverlayController,
    navigator: MatchNavigator,
}

pub struct OverlayEngine {
    magnification: f32,
    state: Mutex<EngineState>,
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl OverlayEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            magnification: config.magnification,
            state: Mutex::new(EngineState::default()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<EngineEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn drain_events(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    #[instrument(skip(self, provider))]
    pub async fn open_with<P: DocumentProvider + ?Sized>(
        &self,
        provider: &P,
        path: &Path,
    ) -> Result<()> {
        let source = provider.open(path).await?;
        self.install(source);
        self.show_first_page().await;
        Ok(())
    }

    pub async fn open_bytes_with<P: DocumentProvider + ?Sized>(
        &self,
        provider: &P,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let source = provider.open_bytes(bytes).await?;
        self.install(source);
        self.show_first_page().await;
        Ok(())
    }

    pub fn install(&self, source: Arc<dyn PageRasterizer>) {
        let renderer = Arc::new(PageRenderer::new(source, self.magnification));
        let document = Arc::new(renderer.document().clone());
        let mut state = self.state.lock();
        if let Some(previous) = state.controller.document() {
            self.push(EngineEvent::DocumentClosed(previous.id));
        }
        info!(
            id = %document.id,
            pages = document.page_count(),
            name = %document.display_name(),
            "document loaded"
        );
        state.controller.load_document(Arc::clone(&document));
        state.navigator = MatchNavigator::default();
        state.renderer = Some(renderer);
        self.push(EngineEvent::DocumentOpened(document.id));
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(document) = state.controller.document() {
            self.push(EngineEvent::DocumentClosed(document.id));
        }
        state.controller.clear_document();
        state.navigator = MatchNavigator::default();
        state.renderer = None;
    }

    pub fn set_elements(&self, batch: ElementBatch) {
        debug!(elements = batch.len(), "element batch replaced");
        self.state.lock().controller.set_elements(Arc::new(batch));
    }

    /// Resets the highlight and rebuilds the match ordering. Navigation
    /// requests wait on the same lock, so none can observe a half-applied
    /// query.
    pub fn apply_query_result(&self, result: &QueryResult) {
        let matches = Arc::new(MatchSet::from_query(result));
        let total = matches.len();
        {
            let mut state = self.state.lock();
            state.controller.set_matches(Arc::clone(&matches));
            state.navigator.replace(matches);
        }
        self.push(EngineEvent::HighlightChanged(None));
        self.push(EngineEvent::MatchesReplaced { total });
    }

    pub async fn show_page(&self, page: usize) -> Result<RenderOutcome, RenderError> {
        let (ticket, renderer) = {
            let mut state = self.state.lock();
            let renderer = state.renderer.clone().ok_or(RenderError::NoDocument)?;
            (state.controller.request_page(page)?, renderer)
        };

        let rendered = renderer.render_page(page).await;

        let outcome = self.state.lock().controller.complete_render(ticket, rendered);
        match &outcome {
            Ok(RenderOutcome::Displayed) => self.push(EngineEvent::PageReady { page }),
            Ok(RenderOutcome::Superseded) => {}
            Err(err) => {
                warn!(%err, page, "page could not be displayed");
                self.push(EngineEvent::RenderFailed(err.clone()));
            }
        }
        outcome
    }

    pub async fn apply(&self, command: Command) -> Result<(), RenderError> {
        match command {
            Command::NextPage { count } => {
                if let Some((current, page_count)) = self.page_position() {
                    let next = current.saturating_add(count).min(page_count);
                    if next != current {
                        self.show_page(next).await?;
                    }
                }
            }
            Command::PrevPage { count } => {
                if let Some((current, _)) = self.page_position() {
                    let next = current.saturating_sub(count).max(1);
                    if next != current {
                        self.show_page(next).await?;
                    }
                }
            }
            Command::GotoPage { page } => {
                self.show_page(page).await?;
            }
            Command::LastPage => {
                if let Some((current, page_count)) = self.page_position() {
                    if current != page_count {
                        self.show_page(page_count).await?;
                    }
                }
            }
            Command::NextMatch => {
                self.next_match().await?;
            }
            Command::PrevMatch => {
                self.previous_match().await?;
            }
            Command::SelectMatch { index } => {
                self.select_match(index).await?;
            }
            Command::ToggleHighlight { id } => {
                self.toggle_highlight(id).await?;
            }
            Command::ClickAt { x, y } => {
                self.click_at(x, y).await?;
            }
            Command::ClearHighlight => {
                self.state.lock().controller.clear_highlight();
                self.push(EngineEvent::HighlightChanged(None));
            }
        }
        Ok(())
    }

    pub async fn toggle_highlight(&self, id: ElementId) -> Result<(), RenderError> {
        let (jump, highlighted) = {
            let mut state = self.state.lock();
            if state.controller.lookup(&id).is_none() {
                debug!(%id, "ignoring click on unknown element");
                return Ok(());
            }
            let jump = state.controller.toggle_highlight(id);
            (jump, state.controller.highlight().get().cloned())
        };
        self.push(EngineEvent::HighlightChanged(highlighted));
        self.jump(jump).await
    }

    pub async fn click_at(&self, x: f32, y: f32) -> Result<(), RenderError> {
        let hit = self.state.lock().controller.hit_test(x, y).cloned();
        match hit {
            Some(id) => self.toggle_highlight(id).await,
            None => Ok(()),
        }
    }

    pub async fn next_match(&self) -> Result<Option<ElementId>, RenderError> {
        self.navigate(|navigator, state| {
            navigator
                .next(state.controller.highlight())
                .map(|element| element.id.clone())
        })
        .await
    }

    pub async fn previous_match(&self) -> Result<Option<ElementId>, RenderError> {
        self.navigate(|navigator, state| {
            navigator
                .previous(state.controller.highlight())
                .map(|element| element.id.clone())
        })
        .await
    }

    /// Selects the match at `index`; an index with no match clears the
    /// highlight.
    pub async fn select_match(&self, index: usize) -> Result<Option<ElementId>, RenderError> {
        let (selected, jump) = {
            let mut state = self.state.lock();
            match state.navigator.select(index).map(|e| e.id.clone()) {
                Some(id) => {
                    let jump = state.controller.set_highlight(id.clone());
                    (Some(id), jump)
                }
                None => {
                    state.controller.clear_highlight();
                    (None, None)
                }
            }
        };
        self.settle(selected, jump).await
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        let state = self.state.lock();
        let controller = &state.controller;
        let document = controller.document();
        let matches = state.navigator.matches();
        let has_query = !matches.is_empty() || !matches.summary().is_empty();

        OverlaySnapshot {
            state: controller.state(),
            document: document.map(|doc| doc.id),
            document_name: document.map(|doc| doc.display_name()),
            page_count: document.map(|doc| doc.page_count()).unwrap_or(0),
            current_page: controller.current_page(),
            displayed_page: controller.displayed_page(),
            highlighted: controller.highlight().get().cloned(),
            position: state.navigator.position(controller.highlight()),
            reported_matches: matches.reported_total(),
            summary: has_query.then(|| matches.summary().to_string()),
            reasoning: matches.reasoning().map(str::to_string),
            filter_stats: matches.filter_stats().cloned(),
            boxes: controller.boxes().to_vec(),
            raster: controller.raster().cloned(),
        }
    }

    async fn navigate<F>(&self, pick: F) -> Result<Option<ElementId>, RenderError>
    where
        F: FnOnce(&MatchNavigator, &EngineState) -> Option<ElementId>,
    {
        let (target, jump) = {
            let mut state = self.state.lock();
            let Some(target) = pick(&state.navigator, &*state) else {
                return Ok(None);
            };
            let jump = state.controller.set_highlight(target.clone());
            (target, jump)
        };
        self.settle(Some(target), jump).await
    }

    async fn settle(
        &self,
        highlighted: Option<ElementId>,
        jump: Option<usize>,
    ) -> Result<Option<ElementId>, RenderError> {
        self.push(EngineEvent::HighlightChanged(highlighted.clone()));
        self.jump(jump).await?;
        Ok(highlighted)
    }

    async fn jump(&self, page: Option<usize>) -> Result<(), RenderError> {
        if let Some(page) = page {
            self.show_page(page).await?;
        }
        Ok(())
    }

    async fn show_first_page(&self) {
        if let Err(err) = self.show_page(1).await {
            warn!(%err, "first page could not be displayed");
        }
    }

    fn page_position(&self) -> Option<(usize, usize)> {
        let state = self.state.lock();
        let page_count = state.controller.document()?.page_count();
        Some((state.controller.current_page()?, page_count))
    }

    fn push(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::element::ElementRecord;
    use crate::geometry::Rect;
    use crate::renderer::testing::FakeRasterizer;

    fn engine_with(backend: FakeRasterizer) -> (OverlayEngine, Arc<FakeRasterizer>) {
        let engine = OverlayEngine::new(&EngineConfig::default());
        let backend = Arc::new(backend);
        engine.install(backend.clone());
        (engine, backend)
    }

    fn records(value: serde_json::Value) -> Vec<ElementRecord> {
        serde_json::from_value(value).unwrap()
    }

    fn query(value: serde_json::Value) -> QueryResult {
        serde_json::from_value(value).unwrap()
    }

    fn unit_box(id: &str, page: usize) -> serde_json::Value {
        json!({
            "id": id,
            "page_number": page,
            "region": [72, 72, 540, 720],
            "region_convention": "bottom_left_units"
        })
    }

    #[tokio::test]
    async fn letter_page_at_default_magnification() {
        let (engine, _) = engine_with(FakeRasterizer::new(1));
        engine.set_elements(ElementBatch::from_records(records(json!([unit_box("a", 1)]))));
        engine.show_page(1).await.unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.state, OverlayState::PageReady { page: 1 });
        assert_eq!(snapshot.boxes.len(), 1);
        assert_eq!(snapshot.boxes[0].rect, Rect::new(108.0, 108.0, 702.0, 972.0));
    }

    #[tokio::test]
    async fn out_of_range_page_is_reported_without_state_change() {
        let (engine, _) = engine_with(FakeRasterizer::new(2));
        engine.show_page(1).await.unwrap();

        assert_eq!(
            engine.show_page(3).await,
            Err(RenderError::PageOutOfRange {
                page: 3,
                page_count: 2
            })
        );
        assert_eq!(engine.snapshot().state, OverlayState::PageReady { page: 1 });
    }

    #[tokio::test]
    async fn no_document_is_a_typed_failure() {
        let engine = OverlayEngine::new(&EngineConfig::default());
        assert_eq!(engine.show_page(1).await, Err(RenderError::NoDocument));
        assert_eq!(engine.next_match().await, Ok(None));
        assert_eq!(engine.snapshot().state, OverlayState::Empty);
    }

    #[tokio::test]
    async fn slow_earlier_render_never_overwrites_newer_page() {
        let (engine, _) = engine_with(
            FakeRasterizer::new(3).delay(2, Duration::from_millis(200)),
        );
        engine.set_elements(ElementBatch::from_records(records(json!([
            unit_box("on-2", 2),
            unit_box("on-3", 3)
        ]))));

        let (slow, fast) = tokio::join!(engine.show_page(2), engine.show_page(3));

        assert_eq!(slow, Ok(RenderOutcome::Superseded));
        assert_eq!(fast, Ok(RenderOutcome::Displayed));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.displayed_page, Some(3));
        assert_eq!(snapshot.raster.as_ref().unwrap().page_number, 3);
        assert!(snapshot.boxes.iter().all(|b| b.page_number == 3));
        assert_eq!(snapshot.boxes[0].element_id.as_str(), "on-3");
    }

    #[tokio::test]
    async fn fast_earlier_render_is_discarded_while_newer_is_pending() {
        let (engine, _) = engine_with(
            FakeRasterizer::new(3).delay(3, Duration::from_millis(200)),
        );
        engine.set_elements(ElementBatch::from_records(records(json!([
            unit_box("on-2", 2),
            unit_box("on-3", 3)
        ]))));

        let (first, second) = tokio::join!(engine.show_page(2), engine.show_page(3));

        assert_eq!(first, Ok(RenderOutcome::Superseded));
        assert_eq!(second, Ok(RenderOutcome::Displayed));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.displayed_page, Some(3));
        assert!(snapshot.boxes.iter().all(|b| b.page_number == 3));
    }

    #[tokio::test]
    async fn render_failure_is_reported_once_and_prior_page_stays() {
        let (engine, backend) = engine_with(FakeRasterizer::new(3).fail(2));
        engine.show_page(1).await.unwrap();
        engine.drain_events();

        let err = engine.show_page(2).await.unwrap_err();
        assert!(matches!(err, RenderError::RenderFailure { page: 2, .. }));
        assert_eq!(engine.snapshot().displayed_page, Some(1));
        assert_eq!(
            engine.drain_events(),
            vec![EngineEvent::RenderFailed(err.clone())]
        );

        // Retry is caller-driven and hits the backend again.
        assert!(engine.show_page(2).await.is_err());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn navigation_follows_stable_order_and_jumps_pages() {
        let (engine, _) = engine_with(FakeRasterizer::new(3));
        engine.show_page(3).await.unwrap();
        engine.apply_query_result(&query(json!({
            "answer": "three hits",
            "matched_elements": [unit_box("b", 2), unit_box("a", 1), unit_box("c", 1)]
        })));

        assert_eq!(engine.snapshot().position, (None, 3));

        assert_eq!(engine.next_match().await.unwrap(), Some("a".into()));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.displayed_page, Some(1));
        assert_eq!(snapshot.position, (Some(0), 3));
        assert_eq!(snapshot.summary.as_deref(), Some("three hits"));

        assert_eq!(engine.next_match().await.unwrap(), Some("c".into()));
        assert_eq!(engine.next_match().await.unwrap(), Some("b".into()));
        assert_eq!(engine.snapshot().displayed_page, Some(2));
        assert_eq!(engine.next_match().await.unwrap(), Some("a".into()));
        assert_eq!(engine.previous_match().await.unwrap(), Some("b".into()));
    }

    #[tokio::test]
    async fn new_query_resets_highlight_and_order() {
        let (engine, _) = engine_with(FakeRasterizer::new(2));
        engine.apply_query_result(&query(json!({
            "summary": "first",
            "elements": [unit_box("x", 1), unit_box("y", 1)]
        })));
        engine.next_match().await.unwrap();
        engine.next_match().await.unwrap();
        assert_eq!(engine.snapshot().highlighted, Some("y".into()));

        engine.apply_query_result(&query(json!({
            "summary": "second",
            "elements": [unit_box("z", 2), unit_box("y", 1)]
        })));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.highlighted, None);
        assert_eq!(snapshot.position, (None, 2));

        assert_eq!(engine.previous_match().await.unwrap(), Some("y".into()));
    }

    #[tokio::test]
    async fn empty_match_set_navigation_is_a_no_op() {
        let (engine, _) = engine_with(FakeRasterizer::new(1));
        engine.apply_query_result(&QueryResult::default());
        engine.drain_events();

        assert_eq!(engine.next_match().await, Ok(None));
        assert_eq!(engine.previous_match().await, Ok(None));
        assert!(engine.drain_events().is_empty());
    }

    #[tokio::test]
    async fn selecting_a_missing_index_clears_highlight() {
        let (engine, _) = engine_with(FakeRasterizer::new(2));
        engine.apply_query_result(&query(json!({"elements": [unit_box("a", 2)]})));

        assert_eq!(engine.select_match(0).await.unwrap(), Some("a".into()));
        assert_eq!(engine.snapshot().displayed_page, Some(2));
        assert_eq!(engine.select_match(5).await.unwrap(), None);
        assert_eq!(engine.snapshot().highlighted, None);
    }

    #[tokio::test]
    async fn drawn_and_navigated_matches_are_one_set() {
        let (engine, _) = engine_with(FakeRasterizer::new(1));
        engine.apply_query_result(&query(json!({"elements": [unit_box("a", 1)]})));

        let state = engine.state.lock();
        assert!(Arc::ptr_eq(state.controller.matches(), state.navigator.matches()));
    }

    #[tokio::test]
    async fn selection_racing_a_new_query_never_highlights_a_stale_match() {
        let (engine, _) = engine_with(FakeRasterizer::new(2));
        engine.apply_query_result(&query(json!({"elements": [unit_box("old", 2)]})));
        let replacement = query(json!({"elements": [unit_box("new", 1)]}));

        let (selected, _) = tokio::join!(engine.select_match(0), async {
            engine.apply_query_result(&replacement)
        });
        selected.unwrap();

        let snapshot = engine.snapshot();
        assert_ne!(snapshot.highlighted, Some("old".into()));
        assert_eq!(engine.select_match(0).await.unwrap(), Some("new".into()));

        engine.drain_events();
        assert_eq!(engine.select_match(3).await.unwrap(), None);
        assert_eq!(engine.drain_events(), vec![EngineEvent::HighlightChanged(None)]);
        assert_eq!(engine.snapshot().highlighted, None);
    }

    #[tokio::test]
    async fn clicking_toggles_and_jumps() {
        let (engine, _) = engine_with(FakeRasterizer::new(2));
        engine.set_elements(ElementBatch::from_records(records(json!([
            unit_box("here", 1),
            unit_box("there", 2)
        ]))));
        engine.show_page(1).await.unwrap();

        engine.click_at(200.0, 200.0).await.unwrap();
        assert_eq!(engine.snapshot().highlighted, Some("here".into()));
        engine.click_at(200.0, 200.0).await.unwrap();
        assert_eq!(engine.snapshot().highlighted, None);

        engine
            .apply(Command::ToggleHighlight { id: "there".into() })
            .await
            .unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.highlighted, Some("there".into()));
        assert_eq!(snapshot.displayed_page, Some(2));

        engine.click_at(5.0, 5.0).await.unwrap();
        assert_eq!(engine.snapshot().highlighted, Some("there".into()));
    }

    #[tokio::test]
    async fn page_commands_clamp_to_document() {
        let (engine, _) = engine_with(FakeRasterizer::new(5));
        engine.show_page(1).await.unwrap();

        engine.apply(Command::NextPage { count: 3 }).await.unwrap();
        assert_eq!(engine.snapshot().displayed_page, Some(4));
        engine.apply(Command::NextPage { count: 10 }).await.unwrap();
        assert_eq!(engine.snapshot().displayed_page, Some(5));
        engine.apply(Command::PrevPage { count: 10 }).await.unwrap();
        assert_eq!(engine.snapshot().displayed_page, Some(1));
        engine.apply(Command::LastPage).await.unwrap();
        assert_eq!(engine.snapshot().displayed_page, Some(5));
        assert!(engine.apply(Command::GotoPage { page: 9 }).await.is_err());
    }

    #[tokio::test]
    async fn installing_a_new_document_drops_everything() {
        let (engine, first) = engine_with(FakeRasterizer::new(2));
        engine.set_elements(ElementBatch::from_records(records(json!([unit_box("a", 1)]))));
        engine.show_page(1).await.unwrap();
        engine.drain_events();

        let second = Arc::new(FakeRasterizer::new(4));
        engine.install(second.clone());
        let events = engine.drain_events();
        assert!(matches!(events[0], EngineEvent::DocumentClosed(id) if id == first.document().id));
        assert!(matches!(events[1], EngineEvent::DocumentOpened(id) if id == second.document().id));

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.state, OverlayState::Empty);
        assert_eq!(snapshot.page_count, 4);

        engine.show_page(1).await.unwrap();
        assert!(engine.snapshot().boxes.is_empty());
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn close_returns_to_empty() {
        let (engine, _) = engine_with(FakeRasterizer::new(1));
        engine.show_page(1).await.unwrap();
        engine.close();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.state, OverlayState::Empty);
        assert!(snapshot.raster.is_none());
        assert_eq!(engine.show_page(1).await, Err(RenderError::NoDocument));
    }
}
