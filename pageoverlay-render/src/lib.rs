use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pageoverlay_core::{
    document_id_for_bytes, document_id_for_path, Document, DocumentMetadata, DocumentProvider,
    PageDescriptor, PageRasterizer, PageSize, RasterImage,
};
use tracing::{debug, info, instrument, warn};

/// Environment override for the pdfium shared library location.
pub const PDFIUM_LIBRARY_ENV: &str = "PAGEOVERLAY_PDFIUM_LIBRARY_PATH";

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    /// Binds pdfium from `library_path` if given, then the environment
    /// override, then the working directory, then the system library.
    pub fn new(library_path: Option<&Path>) -> Result<Self> {
        let pdfium = match bind_pdfium_explicit(library_path) {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }

    fn load(&self, source: DocumentSource) -> Result<Arc<dyn PageRasterizer>> {
        let document = PdfiumDocument::load(Arc::clone(&self.pdfium), source)?;
        Ok(Arc::new(document))
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PageRasterizer>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        self.load(DocumentSource::File(absolute))
    }

    async fn open_bytes(&self, bytes: Vec<u8>) -> Result<Arc<dyn PageRasterizer>> {
        if bytes.is_empty() {
            return Err(anyhow!("document bytes are empty"));
        }
        self.load(DocumentSource::Bytes(bytes))
    }
}

enum DocumentSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::File(path) => write!(f, "{}", path.display()),
            DocumentSource::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

struct PdfiumDocument {
    // Declared before `pdfium` so it drops first.
    handle: Mutex<PdfDocument<'static>>,
    info: Document,
    pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    #[instrument(skip(pdfium, source), fields(source = %source))]
    fn load(pdfium: Arc<Pdfium>, source: DocumentSource) -> Result<Self> {
        let label = source.to_string();
        let (id, origin, document) = match source {
            DocumentSource::File(path) => {
                let document = pdfium
                    .load_pdf_from_file(&path, None)
                    .with_context(|| format!("failed to open {:?}", path))?;
                (document_id_for_path(&path), Some(path), document)
            }
            DocumentSource::Bytes(bytes) => {
                let id = document_id_for_bytes(&bytes);
                let document = pdfium
                    .load_pdf_from_byte_vec(bytes, None)
                    .context("failed to open in-memory document")?;
                (id, None, document)
            }
        };

        let info = Document {
            id,
            origin,
            pages: page_descriptors(&document),
            metadata: read_metadata(&document),
        };
        if info.pages.is_empty() {
            return Err(anyhow!("{label} has no pages"));
        }
        info!(pages = info.pages.len(), "opened document");

        // SAFETY: the PdfDocument borrows the bindings owned by `pdfium`. It is
        // stored in `handle`, which is declared before `pdfium` and therefore
        // dropped first, and `pdfium` is never replaced.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(Self {
            handle: Mutex::new(document),
            info,
            pdfium,
        })
    }
}

impl PageRasterizer for PdfiumDocument {
    fn document(&self) -> &Document {
        &self.info
    }

    #[instrument(skip(self))]
    fn rasterize(&self, page_number: usize, magnification: f32) -> Result<RasterImage> {
        let index = page_index(page_number)?;
        let document = self.handle.lock();
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page_number))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(magnification);
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", page_number))?;
        let image = bitmap.as_image().to_rgba8();
        let (width, height) = image.dimensions();
        debug!(width, height, "rasterized page");

        Ok(RasterImage {
            width,
            height,
            pixels: image.into_raw(),
        })
    }
}

impl Drop for PdfiumDocument {
    fn drop(&mut self) {
        debug!(id = %self.info.id, strong = Arc::strong_count(&self.pdfium), "closing document");
    }
}

fn page_index(page_number: usize) -> Result<PdfPageIndex> {
    page_number
        .checked_sub(1)
        .and_then(|index| PdfPageIndex::try_from(index).ok())
        .ok_or_else(|| anyhow!("page {} is out of supported range", page_number))
}

fn page_descriptors(document: &PdfDocument<'_>) -> Vec<PageDescriptor> {
    document
        .pages()
        .iter()
        .enumerate()
        .map(|(index, page)| {
            let number = index + 1;
            let size = PageSize::known(page.width().value, page.height().value);
            if size.is_none() {
                warn!(page = number, "page reports no usable size");
            }
            PageDescriptor { number, size }
        })
        .collect()
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());
    DocumentMetadata { title, author }
}

fn bind_pdfium_explicit(library_path: Option<&Path>) -> Option<Pdfium> {
    let from_env = std::env::var_os(PDFIUM_LIBRARY_ENV).map(PathBuf::from);
    let candidate = library_path
        .map(Path::to_path_buf)
        .or(from_env)
        .filter(|path| !path.as_os_str().is_empty())?;

    match Pdfium::bind_to_library(&candidate) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(
                "failed to load Pdfium from configured path {}: {}",
                candidate.display(),
                err
            );
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set pdfium_library_path or {} ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_numbers_are_one_based() {
        assert_eq!(page_index(1).unwrap(), 0);
        assert_eq!(page_index(12).unwrap(), 11);
        assert!(page_index(0).is_err());
        assert!(page_index(usize::MAX).is_err());
    }

    #[test]
    fn source_labels_do_not_dump_bytes() {
        assert_eq!(
            DocumentSource::Bytes(vec![0; 42]).to_string(),
            "<42 bytes>"
        );
        assert_eq!(
            DocumentSource::File(PathBuf::from("/records/a.pdf")).to_string(),
            "/records/a.pdf"
        );
    }
}
