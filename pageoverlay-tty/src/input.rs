use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use pageoverlay_core::{Command, PixelSize};

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    Click { column: u16, row: u16 },
    Resize,
    Quit,
    None,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) => self.map_key(key),
            Event::Mouse(MouseEvent {
                kind: MouseEventKind::Down(MouseButton::Left),
                column,
                row,
                ..
            }) => {
                self.reset_count();
                UiEvent::Click { column, row }
            }
            Event::Resize(..) => UiEvent::Resize,
            _ => UiEvent::None,
        }
    }

    fn map_key(&mut self, KeyEvent { code, modifiers, .. }: KeyEvent) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Down, _)
            | (KeyCode::PageDown, _)
            | (KeyCode::Char(' '), _) => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, _) | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage { count })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.take_count();
                UiEvent::Command(Command::GotoPage { page })
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => match self.pending_count.take() {
                Some(page) => {
                    self.reset_count();
                    UiEvent::Command(Command::GotoPage { page })
                }
                None => UiEvent::Command(Command::LastPage),
            },
            (KeyCode::Char('n'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::NextMatch)
            }
            (KeyCode::Char('N'), modifiers)
                if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
            {
                self.reset_count();
                UiEvent::Command(Command::PrevMatch)
            }
            // `3<Enter>` selects the third match.
            (KeyCode::Enter, _) => match self.pending_count.take() {
                Some(number) if number > 0 => {
                    self.reset_count();
                    UiEvent::Command(Command::SelectMatch { index: number - 1 })
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::Command(Command::ClearHighlight)
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        (!self.pending_digits.is_empty()).then(|| self.pending_digits.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub columns: u32,
    pub rows: u32,
}

impl Placement {
    /// Largest cell box inside `columns`×`rows` that keeps the raster's
    /// aspect ratio, given the pixel size of one cell.
    pub fn fit(raster: PixelSize, columns: u16, rows: u16, cell: CellSize) -> Self {
        let columns = u32::from(columns.max(1));
        let rows = u32::from(rows.max(1));
        if raster.is_empty() {
            return Self { columns, rows };
        }

        let area_width = (columns * cell.width) as f32;
        let area_height = (rows * cell.height) as f32;
        let scale = (area_width / raster.width as f32).min(area_height / raster.height as f32);
        // Nudge before flooring so an exact fit is not lost to rounding.
        let fitted_columns = (raster.width as f32 * scale / cell.width as f32 + 1e-3).floor() as u32;
        let fitted_rows = (raster.height as f32 * scale / cell.height as f32 + 1e-3).floor() as u32;

        Self {
            columns: fitted_columns.clamp(1, columns),
            rows: fitted_rows.clamp(1, rows),
        }
    }

    /// Raster pixel under the centre of a cell, `None` outside the image.
    pub fn cell_to_raster(&self, column: u16, row: u16, raster: PixelSize) -> Option<(f32, f32)> {
        let (column, row) = (u32::from(column), u32::from(row));
        if column >= self.columns || row >= self.rows || raster.is_empty() {
            return None;
        }
        let x = (column as f32 + 0.5) * raster.width as f32 / self.columns as f32;
        let y = (row as f32 + 0.5) * raster.height as f32 / self.rows as f32;
        Some((x, y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSize {
    pub width: u32,
    pub height: u32,
}

impl CellSize {
    /// Used when the terminal does not report its pixel size.
    pub const FALLBACK: CellSize = CellSize {
        width: 8,
        height: 16,
    };

    pub fn from_window(columns: u16, rows: u16, width_px: u16, height_px: u16) -> Self {
        if columns == 0 || rows == 0 || width_px == 0 || height_px == 0 {
            return Self::FALLBACK;
        }
        Self {
            width: (u32::from(width_px) / u32::from(columns)).max(1),
            height: (u32::from(height_px) / u32::from(rows)).max(1),
        }
    }
}
