use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use pageoverlay_core::config::project_dirs;
use pageoverlay_core::{
    Command, ElementBatch, EngineConfig, EngineEvent, LoggingConfig, OverlayBox, OverlayEngine,
    QueryResult,
};
use pageoverlay_render::PdfiumProvider;
use pageoverlay_tty::{
    composite, status_text, write_status_line, CellSize, EventMapper, KittyRenderer,
    OverlayPalette, Placement, UiEvent,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pageoverlay",
    version,
    about = "Renders PDF pages with element boxes and query matches on top"
)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Interactive viewer in a kitty-compatible terminal
    View(ViewArgs),
    /// Print the overlay boxes of one page as JSON
    Boxes(BoxesArgs),
}

#[derive(Debug, ClapArgs)]
struct ViewArgs {
    file: PathBuf,

    /// Element batch (JSON array or {"elements": [...]})
    #[arg(short, long)]
    elements: Option<PathBuf>,

    /// Query result from the question-answering service
    #[arg(short, long)]
    query: Option<PathBuf>,

    /// Page to open on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,
}

#[derive(Debug, ClapArgs)]
struct BoxesArgs {
    file: PathBuf,

    #[arg(short, long)]
    elements: PathBuf,

    #[arg(short, long)]
    query: Option<PathBuf>,

    /// Page to report (1-based)
    #[arg(short = 'p', long = "page")]
    page: usize,

    /// Overrides the configured magnification
    #[arg(short, long)]
    magnification: Option<f32>,
}

#[derive(Debug, Serialize)]
struct BoxesReport<'a> {
    page: usize,
    magnification: f32,
    raster_width: u32,
    raster_height: u32,
    boxes: &'a [OverlayBox],
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = EngineConfig::load_or_default(args.config.as_deref())?;
    if let Mode::Boxes(BoxesArgs {
        magnification: Some(magnification),
        ..
    }) = &args.command
    {
        config.magnification = *magnification;
        config.validate()?;
    }

    let _log_guard = init_logging(&config.logging)?;
    info!(magnification = config.magnification, "starting");

    let provider = PdfiumProvider::new(config.pdfium_library_path.as_deref())?;
    let engine = OverlayEngine::new(&config);

    match args.command {
        Mode::View(view) => {
            open(&engine, &provider, &view.file, view.elements.as_deref(), view.query.as_deref())
                .await?;
            if let Some(page) = view.page {
                engine
                    .show_page(page)
                    .await
                    .with_context(|| format!("cannot open page {page}"))?;
            }
            run_viewer(&engine).await
        }
        Mode::Boxes(boxes) => {
            open(
                &engine,
                &provider,
                &boxes.file,
                Some(&boxes.elements),
                boxes.query.as_deref(),
            )
            .await?;
            engine
                .show_page(boxes.page)
                .await
                .with_context(|| format!("cannot render page {}", boxes.page))?;
            print_boxes(&engine, config.magnification, boxes.page)
        }
    }
}

async fn open(
    engine: &OverlayEngine,
    provider: &PdfiumProvider,
    file: &Path,
    elements: Option<&Path>,
    query: Option<&Path>,
) -> Result<()> {
    engine
        .open_with(provider, file)
        .await
        .with_context(|| format!("failed to open {:?}", file))?;
    if let Some(path) = elements {
        engine.set_elements(ElementBatch::load(path)?);
    }
    if let Some(path) = query {
        engine.apply_query_result(&QueryResult::load(path)?);
    }
    Ok(())
}

fn print_boxes(engine: &OverlayEngine, magnification: f32, page: usize) -> Result<()> {
    let snapshot = engine.snapshot();
    let raster = snapshot
        .raster
        .as_ref()
        .filter(|raster| raster.page_number == page)
        .ok_or_else(|| anyhow!("page {page} is not displayed"))?;

    let report = BoxesReport {
        page,
        magnification,
        raster_width: raster.image.width,
        raster_height: raster.image.height,
        boxes: &snapshot.boxes,
    };
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)?;
    writeln!(stdout)?;
    Ok(())
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

struct Viewer {
    renderer: KittyRenderer<io::Stdout>,
    mapper: EventMapper,
    palette: OverlayPalette,
    placement: Option<Placement>,
    notice: Option<String>,
}

async fn run_viewer(engine: &OverlayEngine) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut viewer = Viewer {
        renderer: KittyRenderer::new(io::stdout()),
        mapper: EventMapper::new(),
        palette: OverlayPalette::default(),
        placement: None,
        notice: None,
    };
    let mut dirty = true;

    loop {
        viewer.absorb_events(engine);
        if dirty {
            viewer.redraw(engine)?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ui_event = viewer.mapper.map_event(event::read()?);
            match viewer.handle_event(engine, ui_event).await? {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => viewer.draw_status(engine)?,
                LoopAction::Quit => break,
            }
        }
    }

    viewer.renderer.delete_images()?;
    viewer.renderer.clear_all()?;
    Ok(())
}

impl Viewer {
    async fn handle_event(&mut self, engine: &OverlayEngine, event: UiEvent) -> Result<LoopAction> {
        match event {
            UiEvent::Command(command) => {
                self.run(engine, command).await;
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::Click { column, row } => {
                let snapshot = engine.snapshot();
                let target = self.placement.zip(snapshot.raster.as_ref()).and_then(
                    |(placement, raster)| placement.cell_to_raster(column, row, raster.pixels()),
                );
                match target {
                    Some((x, y)) => {
                        self.run(engine, Command::ClickAt { x, y }).await;
                        Ok(LoopAction::ContinueRedraw)
                    }
                    None => Ok(LoopAction::Continue),
                }
            }
            UiEvent::Resize => Ok(LoopAction::ContinueRedraw),
            UiEvent::Quit => Ok(LoopAction::Quit),
            UiEvent::None => Ok(LoopAction::Continue),
        }
    }

    async fn run(&mut self, engine: &OverlayEngine, command: Command) {
        debug!(?command, "applying command");
        if let Err(err) = engine.apply(command).await {
            self.notice = Some(err.to_string());
        }
    }

    fn absorb_events(&mut self, engine: &OverlayEngine) {
        for event in engine.drain_events() {
            debug!(?event, "engine event");
            match event {
                EngineEvent::PageReady { .. } => self.notice = None,
                EngineEvent::RenderFailed(err) => self.notice = Some(err.to_string()),
                EngineEvent::MatchesReplaced { total: 0 } => {
                    self.notice = Some("query returned no matches".to_string())
                }
                _ => {}
            }
        }
    }

    fn redraw(&mut self, engine: &OverlayEngine) -> Result<()> {
        let window = terminal::window_size()?;
        let cell = CellSize::from_window(window.columns, window.rows, window.width, window.height);
        let image_rows = window.rows.saturating_sub(1).max(1);
        let snapshot = engine.snapshot();

        self.renderer.begin_sync_update()?;
        self.renderer.clear_all()?;
        match snapshot.raster.as_ref() {
            Some(raster) => {
                let painted = composite(
                    &raster.image,
                    &snapshot.boxes,
                    snapshot.highlighted.as_ref(),
                    &self.palette,
                );
                let placement = Placement::fit(raster.pixels(), window.columns, image_rows, cell);
                self.renderer.draw(&painted, placement)?;
                self.placement = Some(placement);
            }
            None => {
                warn!("nothing to draw");
                self.placement = None;
            }
        }
        self.draw_status(engine)?;
        self.renderer.end_sync_update()?;
        Ok(())
    }

    fn draw_status(&mut self, engine: &OverlayEngine) -> Result<()> {
        let snapshot = engine.snapshot();
        let pending = self.mapper.pending_input();
        let mut status = status_text(&snapshot, pending.as_deref());
        if let Some(notice) = &self.notice {
            status.push_str(" | ");
            status.push_str(notice);
        }

        let window = terminal::window_size()?;
        let status_row = window.rows.saturating_sub(1);
        let writer = self.renderer.writer();
        crossterm::execute!(
            writer,
            cursor::MoveTo(0, status_row),
            Clear(ClearType::CurrentLine)
        )?;
        write_status_line(writer, &status, window.columns)?;
        Ok(())
    }
}

fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let project_dirs =
        project_dirs().ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, &config.file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
