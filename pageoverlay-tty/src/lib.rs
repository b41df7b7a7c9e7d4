use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    terminal::{Clear, ClearType},
};
use pageoverlay_core::{OverlaySnapshot, OverlayState, RasterImage};
use png::{BitDepth, ColorType, Encoder};

pub mod input;
pub mod paint;

pub use input::{CellSize, EventMapper, Placement, UiEvent};
pub use paint::{composite, BoxStyle, OverlayPalette};

const CHUNK_SIZE: usize = 4096;

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn draw(&mut self, image: &RasterImage, placement: Placement) -> Result<()> {
        let payload = BASE64.encode(encode_png(image)?);
        let last = payload.len().saturating_sub(1) / CHUNK_SIZE;
        let transmit = format!(
            "a=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1",
            self.image_id,
            self.placement_id,
            placement.columns,
            placement.rows,
            image.width,
            image.height,
        );

        for (index, chunk) in payload.as_bytes().chunks(CHUNK_SIZE).enumerate() {
            // Reusing the image id replaces the previous frame.
            let control = if index == 0 { transmit.as_str() } else { "q=2" };
            write_graphics(&mut self.writer, control, index < last, chunk)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// The terminal renders everything buffered since `begin_sync_update`
    /// at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

fn write_graphics<W: Write>(
    writer: &mut W,
    control: &str,
    more: bool,
    payload: &[u8],
) -> io::Result<()> {
    write!(writer, "\u{1b}_G{control},m={};", u8::from(more))?;
    writer.write_all(payload)?;
    writer.write_all(b"\x1b\\")
}

fn encode_png(image: &RasterImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;
    Ok(buffer)
}

pub fn status_text(snapshot: &OverlaySnapshot, pending: Option<&str>) -> String {
    let mut parts = Vec::new();

    if let Some(name) = &snapshot.document_name {
        parts.push(name.clone());
    }
    match snapshot.state {
        OverlayState::Empty => parts.push("no page".to_string()),
        OverlayState::PageLoading { page } => {
            parts.push(format!("loading {}/{}", page, snapshot.page_count))
        }
        OverlayState::PageReady { page } => {
            parts.push(format!("page {}/{}", page, snapshot.page_count))
        }
    }

    let (index, total) = snapshot.position;
    if total > 0 {
        let shown = index.map_or_else(|| "-".to_string(), |i| (i + 1).to_string());
        if snapshot.reported_matches > total {
            parts.push(format!("match {shown}/{total} of {}", snapshot.reported_matches));
        } else {
            parts.push(format!("match {shown}/{total}"));
        }
    }
    if let Some(id) = &snapshot.highlighted {
        parts.push(format!("[{id}]"));
    }
    if let Some(summary) = snapshot.summary.as_deref().filter(|s| !s.is_empty()) {
        parts.push(summary.lines().next().unwrap_or_default().to_string());
    }
    if let Some(pending) = pending {
        parts.push(pending.to_string());
    }

    parts.join(" | ")
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str, width: u16) -> io::Result<()> {
    let line: String = label.chars().take(usize::from(width)).collect();
    write!(writer, "{}", line)?;
    writer.flush()
}
