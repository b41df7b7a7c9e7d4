//! Displayed-page state and the overlay boxes computed for it.
//!
//! A page change is a two-step exchange: [`OverlayController::request_page`]
//! hands out a [`PageTicket`] stamped with a fresh generation, and
//! [`OverlayController::complete_render`] only accepts a raster whose ticket
//! still carries the latest generation. Boxes are always computed from the
//! raster that is being displayed, in the same call that displays it.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::document::{Document, DocumentId, RasterizedPage};
use crate::element::{union_on_page, Element, ElementBatch, ElementId};
use crate::geometry::{Rect, Viewport};
use crate::mapper::try_map_to_viewport;
use crate::navigator::{HighlightState, MatchSet};
use crate::renderer::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OverlayState {
    Empty,
    PageLoading { page: usize },
    PageReady { page: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTicket {
    pub document: DocumentId,
    pub page: usize,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Displayed,
    /// A newer request or a different document took over.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayBox {
    pub element_id: ElementId,
    pub page_number: usize,
    pub rect: Rect,
    pub matched: bool,
}

#[derive(Debug)]
struct DisplayedPage {
    raster: Arc<RasterizedPage>,
    viewport: Viewport,
    boxes: Vec<OverlayBox>,
}

#[derive(Debug, Default)]
pub struct OverlayController {
    document: Option<Arc<Document>>,
    elements: Arc<ElementBatch>,
    matches: Arc<MatchSet>,
    highlight: HighlightState,
    generation: u64,
    pending: Option<PageTicket>,
    displayed: Option<DisplayedPage>,
}

impl OverlayController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_document(&mut self, document: Arc<Document>) {
        self.clear_document();
        self.document = Some(document);
    }

    pub fn clear_document(&mut self) {
        self.document = None;
        self.elements = Arc::default();
        self.matches = Arc::default();
        self.highlight.clear();
        self.pending = None;
        self.displayed = None;
        self.generation += 1;
    }

    pub fn document(&self) -> Option<&Arc<Document>> {
        self.document.as_ref()
    }

    pub fn state(&self) -> OverlayState {
        if self.document.is_none() {
            return OverlayState::Empty;
        }
        if let Some(ticket) = self.pending {
            return OverlayState::PageLoading { page: ticket.page };
        }
        match &self.displayed {
            Some(displayed) => OverlayState::PageReady {
                page: displayed.raster.page_number,
            },
            None => OverlayState::Empty,
        }
    }

    pub fn current_page(&self) -> Option<usize> {
        self.pending
            .map(|ticket| ticket.page)
            .or_else(|| self.displayed_page())
    }

    pub fn displayed_page(&self) -> Option<usize> {
        self.displayed
            .as_ref()
            .map(|displayed| displayed.raster.page_number)
    }

    pub fn raster(&self) -> Option<&Arc<RasterizedPage>> {
        self.displayed.as_ref().map(|displayed| &displayed.raster)
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.displayed.as_ref().map(|displayed| displayed.viewport)
    }

    pub fn boxes(&self) -> &[OverlayBox] {
        self.displayed
            .as_ref()
            .map(|displayed| displayed.boxes.as_slice())
            .unwrap_or(&[])
    }

    pub fn highlight(&self) -> &HighlightState {
        &self.highlight
    }

    pub fn elements(&self) -> &ElementBatch {
        &self.elements
    }

    pub fn matches(&self) -> &Arc<MatchSet> {
        &self.matches
    }

    pub fn set_elements(&mut self, elements: Arc<ElementBatch>) {
        self.elements = elements;
        self.refresh_boxes();
    }

    pub fn set_matches(&mut self, matches: Arc<MatchSet>) {
        self.matches = matches;
        self.highlight.clear();
        self.refresh_boxes();
    }

    pub fn request_page(&mut self, page: usize) -> Result<PageTicket, RenderError> {
        let document = self.document.as_ref().ok_or(RenderError::NoDocument)?;
        if !document.contains_page(page) {
            return Err(RenderError::PageOutOfRange {
                page,
                page_count: document.page_count(),
            });
        }

        self.generation += 1;
        let ticket = PageTicket {
            document: document.id,
            page,
            generation: self.generation,
        };
        self.pending = Some(ticket);
        Ok(ticket)
    }

    pub fn complete_render(
        &mut self,
        ticket: PageTicket,
        outcome: Result<Arc<RasterizedPage>, RenderError>,
    ) -> Result<RenderOutcome, RenderError> {
        if self.pending != Some(ticket) {
            debug!(
                page = ticket.page,
                generation = ticket.generation,
                latest = self.generation,
                "discarding superseded render"
            );
            return Ok(RenderOutcome::Superseded);
        }
        self.pending = None;

        let raster = outcome?;
        if raster.document != ticket.document || raster.page_number != ticket.page {
            debug!(
                page = raster.page_number,
                expected = ticket.page,
                "raster does not belong to the requested page"
            );
            return Ok(RenderOutcome::Superseded);
        }

        let viewport = raster.viewport();
        let boxes = self.compute_boxes(&raster, &viewport);
        self.displayed = Some(DisplayedPage {
            raster,
            viewport,
            boxes,
        });
        Ok(RenderOutcome::Displayed)
    }

    /// Toggles the highlight of `id`. Returns the page that has to be shown
    /// when the newly highlighted element lives elsewhere.
    pub fn toggle_highlight(&mut self, id: ElementId) -> Option<usize> {
        let highlighted = self.highlight.toggle(id).cloned();
        highlighted.and_then(|id| self.page_to_show(&id))
    }

    pub fn set_highlight(&mut self, id: ElementId) -> Option<usize> {
        let page = self.page_to_show(&id);
        self.highlight.set(id);
        page
    }

    pub fn clear_highlight(&mut self) {
        self.highlight.clear();
    }

    pub fn lookup(&self, id: &ElementId) -> Option<&Element> {
        self.elements
            .get(id)
            .or_else(|| self.matches.iter().find(|element| &element.id == id))
    }

    /// Smallest box under the raster pixel `(x, y)`.
    pub fn hit_test(&self, x: f32, y: f32) -> Option<&ElementId> {
        self.boxes()
            .iter()
            .filter(|overlay| overlay.rect.contains(x, y))
            .min_by(|a, b| a.rect.area().total_cmp(&b.rect.area()))
            .map(|overlay| &overlay.element_id)
    }

    fn page_to_show(&self, id: &ElementId) -> Option<usize> {
        let page = self.lookup(id)?.page_number;
        let document = self.document.as_ref()?;
        if !document.contains_page(page) {
            debug!(%id, page, "highlighted element points outside the document");
            return None;
        }
        (self.current_page() != Some(page)).then_some(page)
    }

    fn refresh_boxes(&mut self) {
        if let Some(displayed) = self.displayed.take() {
            let boxes = self.compute_boxes(&displayed.raster, &displayed.viewport);
            self.displayed = Some(DisplayedPage { boxes, ..displayed });
        }
    }

    fn compute_boxes(&self, raster: &RasterizedPage, viewport: &Viewport) -> Vec<OverlayBox> {
        let page = raster.page_number;
        union_on_page(&self.elements, self.matches.iter(), page)
            .into_iter()
            .filter_map(|element| {
                let Some(region) = element.preferred_region() else {
                    debug!(id = %element.id, page, "element has no region");
                    return None;
                };
                match try_map_to_viewport(&region, raster.native, viewport) {
                    Ok(rect) => Some(OverlayBox {
                        element_id: element.id.clone(),
                        page_number: page,
                        rect,
                        matched: self.matches.contains(&element.id),
                    }),
                    Err(reason) => {
                        debug!(id = %element.id, page, %reason, "element is unmappable");
                        None
                    }
                }
            })
            .collect()
    }
}
