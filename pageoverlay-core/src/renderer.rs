use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::document::{Document, DocumentId, PageDescriptor, RasterImage, RasterizedPage};

/// Synchronous rasterization backend for one opened document.
pub trait PageRasterizer: Send + Sync {
    fn document(&self) -> &Document;
    fn rasterize(&self, page_number: usize, magnification: f32) -> Result<RasterImage>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PageRasterizer>>;
    async fn open_bytes(&self, bytes: Vec<u8>) -> Result<Arc<dyn PageRasterizer>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("no document is loaded")]
    NoDocument,
    #[error("page {page} is outside 1..={page_count}")]
    PageOutOfRange { page: usize, page_count: usize },
    #[error("failed to render page {page}: {reason}")]
    RenderFailure { page: usize, reason: String },
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct CacheKey {
    document: DocumentId,
    page_number: usize,
    magnification_milli: u32,
}

impl CacheKey {
    fn new(document: DocumentId, page_number: usize, magnification: f32) -> Self {
        Self {
            document,
            page_number,
            magnification_milli: quantize_magnification(magnification),
        }
    }
}

fn quantize_magnification(magnification: f32) -> u32 {
    let scaled = (magnification * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

type Flight = Arc<OnceCell<Result<Arc<RasterizedPage>, RenderError>>>;

/// Renders pages of one document at one magnification.
///
/// Finished rasters are cached for the lifetime of the renderer; a new
/// document gets a new renderer, which drops the whole cache at once.
/// Concurrent requests for the same page share a single backend call.
pub struct PageRenderer {
    source: Arc<dyn PageRasterizer>,
    magnification: f32,
    cache: Mutex<HashMap<CacheKey, Arc<RasterizedPage>>>,
    in_flight: Mutex<HashMap<CacheKey, Flight>>,
}

impl PageRenderer {
    pub fn new(source: Arc<dyn PageRasterizer>, magnification: f32) -> Self {
        Self {
            source,
            magnification,
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn document(&self) -> &Document {
        self.source.document()
    }

    pub fn magnification(&self) -> f32 {
        self.magnification
    }

    pub fn cached_pages(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_cached(&self, page_number: usize) -> bool {
        let key = self.key(page_number);
        self.cache.lock().contains_key(&key)
    }

    pub async fn render_page(&self, page_number: usize) -> Result<Arc<RasterizedPage>, RenderError> {
        let page = *self.document().page(page_number).ok_or(RenderError::PageOutOfRange {
            page: page_number,
            page_count: self.document().page_count(),
        })?;
        let key = self.key(page_number);

        let flight = {
            let mut in_flight = self.in_flight.lock();
            // A flight publishes into the cache before it leaves `in_flight`,
            // so checking under this lock cannot miss a finished render.
            if let Some(hit) = self.cache.lock().get(&key) {
                debug!(page = page_number, "raster cache hit");
                return Ok(Arc::clone(hit));
            }
            Arc::clone(in_flight.entry(key).or_default())
        };

        let outcome = flight
            .get_or_init(|| self.rasterize(key, page))
            .await
            .clone();

        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &flight))
        {
            in_flight.remove(&key);
        }

        outcome
    }

    fn key(&self, page_number: usize) -> CacheKey {
        CacheKey::new(self.document().id, page_number, self.magnification)
    }

    #[instrument(skip(self, key, page), fields(page = page.number))]
    async fn rasterize(
        &self,
        key: CacheKey,
        page: PageDescriptor,
    ) -> Result<Arc<RasterizedPage>, RenderError> {
        let source = Arc::clone(&self.source);
        let magnification = self.magnification;
        let page_number = page.number;

        let image = match tokio::task::spawn_blocking(move || {
            source.rasterize(page_number, magnification)
        })
        .await
        {
            Ok(Ok(image)) => image,
            Ok(Err(err)) => {
                warn!(?err, page = page_number, "backend failed to rasterize page");
                return Err(RenderError::RenderFailure {
                    page: page_number,
                    reason: format!("{err:#}"),
                });
            }
            Err(err) => {
                warn!(%err, page = page_number, "render task did not complete");
                return Err(RenderError::RenderFailure {
                    page: page_number,
                    reason: format!("render task aborted: {err}"),
                });
            }
        };

        if image.size().is_empty() {
            return Err(RenderError::RenderFailure {
                page: page_number,
                reason: "backend returned an empty raster".to_string(),
            });
        }

        let rasterized = Arc::new(RasterizedPage {
            document: key.document,
            page_number,
            magnification,
            native: page.size,
            image,
        });

        if let Some(native) = page.size {
            let viewport = rasterized.viewport();
            if !viewport.is_consistent_with(native) {
                warn!(
                    page = page_number,
                    deviation = viewport.deviation_from(native),
                    "raster size disagrees with native size times magnification"
                );
            }
        }

        self.cache.lock().insert(key, Arc::clone(&rasterized));
        Ok(rasterized)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::anyhow;
    use uuid::Uuid;

    use super::*;
    use crate::document::DocumentMetadata;
    use crate::geometry::PageSize;

    /// Letter-sized pages; per-page delays and failures are configurable.
    pub struct FakeRasterizer {
        document: Document,
        delays: HashMap<usize, Duration>,
        failing: Vec<usize>,
        calls: AtomicUsize,
    }

    impl FakeRasterizer {
        pub fn new(pages: usize) -> Self {
            Self::with_id(Uuid::new_v4(), pages)
        }

        pub fn with_id(id: DocumentId, pages: usize) -> Self {
            Self {
                document: Document {
                    id,
                    origin: Some(PathBuf::from("/records/chart.pdf")),
                    pages: (1..=pages)
                        .map(|number| PageDescriptor {
                            number,
                            size: PageSize::known(612.0, 792.0),
                        })
                        .collect(),
                    metadata: DocumentMetadata::default(),
                },
                delays: HashMap::new(),
                failing: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn delay(mut self, page: usize, delay: Duration) -> Self {
            self.delays.insert(page, delay);
            self
        }

        pub fn fail(mut self, page: usize) -> Self {
            self.failing.push(page);
            self
        }

        pub fn unsized_page(mut self, page: usize) -> Self {
            if let Some(descriptor) = self.document.pages.get_mut(page - 1) {
                descriptor.size = None;
            }
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PageRasterizer for FakeRasterizer {
        fn document(&self) -> &Document {
            &self.document
        }

        fn rasterize(&self, page_number: usize, magnification: f32) -> Result<RasterImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&page_number) {
                std::thread::sleep(*delay);
            }
            if self.failing.contains(&page_number) {
                return Err(anyhow!("corrupt content stream"));
            }
            let width = (612.0 * magnification).round() as u32;
            let height = (792.0 * magnification).round() as u32;
            Ok(RasterImage {
                width,
                height,
                pixels: vec![page_number as u8; (width * height * 4) as usize],
            })
        }
    }
}
