pub mod config;
pub mod document;
pub mod element;
pub mod engine;
pub mod geometry;
pub mod mapper;
pub mod navigator;
pub mod overlay;
pub mod renderer;

pub use config::{EngineConfig, LoggingConfig};
pub use document::{
    document_id_for_bytes, document_id_for_path, Document, DocumentId, DocumentMetadata,
    PageDescriptor, RasterImage, RasterizedPage,
};
pub use element::{Element, ElementBatch, ElementId, ElementRecord, QueryResult};
pub use engine::{Command, EngineEvent, OverlayEngine, OverlaySnapshot};
pub use geometry::{PageSize, PixelBounds, PixelSize, Rect, Viewport};
pub use mapper::{map_to_viewport, try_map_to_viewport, PixelRegion, Region, UnitRegion, Unmappable};
pub use navigator::{HighlightState, MatchNavigator, MatchSet};
pub use overlay::{OverlayBox, OverlayController, OverlayState, RenderOutcome};
pub use renderer::{DocumentProvider, PageRasterizer, PageRenderer, RenderError};
