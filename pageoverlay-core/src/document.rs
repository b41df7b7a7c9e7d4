use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{PageSize, PixelSize, Viewport};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c8f52-6a1e-5d5b-9b43-2c7e41a0d9e4").expect("valid namespace UUID")
});

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}

pub fn document_id_for_bytes(bytes: &[u8]) -> DocumentId {
    Uuid::new_v5(&DOCUMENT_NAMESPACE, bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// 1-based.
    pub number: usize,
    /// `None` when the backend could not report the page box.
    pub size: Option<PageSize>,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub origin: Option<PathBuf>,
    pub pages: Vec<PageDescriptor>,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, number: usize) -> Option<&PageDescriptor> {
        number.checked_sub(1).and_then(|index| self.pages.get(index))
    }

    pub fn contains_page(&self, number: usize) -> bool {
        (1..=self.page_count()).contains(&number)
    }

    pub fn display_name(&self) -> String {
        self.metadata
            .title
            .clone()
            .filter(|title| !title.trim().is_empty())
            .or_else(|| {
                self.origin
                    .as_ref()
                    .and_then(|path| path.file_name())
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "<in-memory document>".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterImage {
    pub fn size(&self) -> PixelSize {
        PixelSize::new(self.width, self.height)
    }
}

#[derive(Debug)]
pub struct RasterizedPage {
    pub document: DocumentId,
    pub page_number: usize,
    pub magnification: f32,
    pub native: Option<PageSize>,
    pub image: RasterImage,
}

impl RasterizedPage {
    pub fn pixels(&self) -> PixelSize {
        self.image.size()
    }

    /// Built from the raster's actual pixel size, never from
    /// `native * magnification`.
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.page_number, self.pixels(), self.magnification)
    }
}
