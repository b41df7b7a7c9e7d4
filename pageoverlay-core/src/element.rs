//! Elements produced by the extraction pipeline and the question-answering
//! service, in wire form ([`ElementRecord`], [`QueryResult`]) and resolved
//! form ([`Element`], [`ElementBatch`]).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::PixelSize;
use crate::mapper::{PixelRegion, Region, UnitRegion};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionConvention {
    TopLeftPixels,
    BottomLeftUnits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "convention", rename_all = "snake_case")]
pub enum TaggedRegion {
    TopLeftPixels {
        bbox: [f32; 4],
        ref_width: u32,
        ref_height: u32,
    },
    BottomLeftUnits {
        bbox: [f32; 4],
    },
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: ElementId,
    #[serde(alias = "page")]
    pub page_number: usize,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<TaggedRegion>,
    pub region: Option<[f32; 4]>,
    pub region_convention: Option<RegionConvention>,
    pub ref_width: Option<u32>,
    pub ref_height: Option<u32>,
    pub relevance: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElementError {
    #[error("element {id} has page number 0; pages are numbered from 1")]
    InvalidPage { id: ElementId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: ElementId,
    pub page_number: usize,
    pub content: String,
    pub pixel_region: Option<PixelRegion>,
    pub unit_region: Option<UnitRegion>,
    pub relevance: Option<Value>,
}

impl Element {
    /// Convention 1 wins over convention 2 when both are present.
    pub fn preferred_region(&self) -> Option<Region> {
        self.pixel_region
            .map(Region::TopLeftPixels)
            .or(self.unit_region.map(Region::BottomLeftUnits))
    }

    pub fn is_mappable(&self) -> bool {
        self.pixel_region.is_some() || self.unit_region.is_some()
    }
}

impl TryFrom<ElementRecord> for Element {
    type Error = ElementError;

    fn try_from(record: ElementRecord) -> Result<Self, Self::Error> {
        if record.page_number == 0 {
            return Err(ElementError::InvalidPage { id: record.id });
        }

        let mut pixel_region = None;
        let mut unit_region = None;

        for tagged in &record.regions {
            match *tagged {
                TaggedRegion::TopLeftPixels {
                    bbox,
                    ref_width,
                    ref_height,
                } => {
                    pixel_region.get_or_insert(PixelRegion {
                        bbox,
                        reference: PixelSize::new(ref_width, ref_height),
                    });
                }
                TaggedRegion::BottomLeftUnits { bbox } => {
                    unit_region.get_or_insert(UnitRegion { bbox });
                }
            }
        }

        if let Some(bbox) = record.region {
            let reference = match (record.ref_width, record.ref_height) {
                (Some(width), Some(height)) => Some(PixelSize::new(width, height)),
                _ => None,
            };
            match (record.region_convention, reference) {
                (Some(RegionConvention::BottomLeftUnits), _) => {
                    unit_region.get_or_insert(UnitRegion { bbox });
                }
                (Some(RegionConvention::TopLeftPixels) | None, Some(reference)) => {
                    pixel_region.get_or_insert(PixelRegion { bbox, reference });
                }
                (convention, None) => {
                    debug!(
                        id = %record.id,
                        ?convention,
                        "region has no reference raster size; element will not be drawn"
                    );
                }
            }
        }

        Ok(Self {
            id: record.id,
            page_number: record.page_number,
            content: record.content,
            pixel_region,
            unit_region,
            relevance: record.relevance,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ElementBatch {
    elements: Vec<Element>,
    by_id: HashMap<ElementId, usize>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchFile {
    Bare(Vec<ElementRecord>),
    Wrapped { elements: Vec<ElementRecord> },
}

impl ElementBatch {
    pub fn new(elements: impl IntoIterator<Item = Element>) -> Self {
        let mut batch = Self::default();
        for element in elements {
            if batch.by_id.contains_key(&element.id) {
                warn!(id = %element.id, "duplicate element id in batch; keeping the first");
                continue;
            }
            batch.by_id.insert(element.id.clone(), batch.elements.len());
            batch.elements.push(element);
        }
        batch
    }

    /// Resolves wire records, dropping the ones that cannot belong to a page.
    pub fn from_records(records: impl IntoIterator<Item = ElementRecord>) -> Self {
        Self::new(records.into_iter().filter_map(|record| {
            Element::try_from(record)
                .map_err(|err| warn!(%err, "skipping element"))
                .ok()
        }))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let records = match serde_json::from_str::<BatchFile>(json)
            .context("element batch is neither an array nor an object with `elements`")?
        {
            BatchFile::Bare(records) | BatchFile::Wrapped { elements: records } => records,
        };
        Ok(Self::from_records(records))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read element batch {:?}", path))?;
        Self::from_json(&json).with_context(|| format!("failed to decode element batch {:?}", path))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, id: &ElementId) -> Option<&Element> {
        self.by_id.get(id).map(|&index| &self.elements[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn on_page(&self, page_number: usize) -> impl Iterator<Item = &Element> {
        self.elements
            .iter()
            .filter(move |element| element.page_number == page_number)
    }
}

/// Response of the question-answering service.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default, alias = "answer", alias = "answer_summary")]
    pub summary: String,
    #[serde(default, alias = "matched_elements")]
    pub elements: Vec<ElementRecord>,
    pub reasoning: Option<String>,
    pub total_matches: Option<usize>,
    pub filter_stats: Option<Value>,
}

impl QueryResult {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to decode query result")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read query result {:?}", path))?;
        Self::from_json(&json).with_context(|| format!("failed to decode query result {:?}", path))
    }
}

pub(crate) fn union_on_page<'a>(
    batch: &'a ElementBatch,
    extra: impl Iterator<Item = &'a Element>,
    page_number: usize,
) -> Vec<&'a Element> {
    let mut seen: HashSet<&ElementId> = HashSet::new();
    batch
        .on_page(page_number)
        .chain(extra.filter(|element| element.page_number == page_number))
        .filter(|&element| seen.insert(&element.id))
        .collect()
}
