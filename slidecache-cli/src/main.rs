use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use serde::Serialize;
use slidecache_core::{PageIndex, PagePart, Preferences, Renderer, SizeF};
use slidecache_draw::SlideDrawings;
use slidecache_render::{FlatRenderer, PixCache};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(
    name = "slidecache",
    version,
    about = "Exercise the slide render cache and drawing history"
)]
struct Args {
    /// Preferences file (defaults to config.toml in the config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Visit pages and report what the cache holds once rendering settles
    Simulate(SimulateArgs),
    /// Inspect and normalise a drawings file
    Drawings(DrawingsArgs),
}

#[derive(Debug, clap::Args)]
struct SimulateArgs {
    /// Pages to visit, in order (0-based)
    #[arg(required = true)]
    visit: Vec<PageIndex>,

    /// Number of blank pages to simulate
    #[arg(long, default_value_t = 20)]
    pages: usize,

    /// Page width and height in points
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"], default_values_t = [400.0, 300.0])]
    page_size: Vec<f64>,

    /// Display frame width and height in pixels
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"], default_values_t = [800.0, 600.0])]
    frame: Vec<f64>,

    /// Render pages of this PDF instead of blank pages
    #[cfg(feature = "pdfium")]
    #[arg(long)]
    pdf: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Part::Full)]
    part: Part,

    /// Override the memory budget in bytes (-1 = unlimited)
    #[arg(long, allow_hyphen_values = true)]
    max_memory: Option<i64>,

    /// Override the slot budget (-1 = unlimited)
    #[arg(long, allow_hyphen_values = true)]
    max_slides: Option<i32>,

    #[arg(long)]
    threads: Option<usize>,

    /// Print one JSON object per visited page
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Part {
    Full,
    Left,
    Right,
}

impl From<Part> for PagePart {
    fn from(part: Part) -> Self {
        match part {
            Part::Full => PagePart::FullPage,
            Part::Left => PagePart::LeftHalf,
            Part::Right => PagePart::RightHalf,
        }
    }
}

#[derive(Debug, clap::Args)]
struct DrawingsArgs {
    /// Drawings XML file
    file: PathBuf,

    /// Pages hold drawings for a left and a right half
    #[arg(long)]
    split: bool,

    /// Remove all drawings from this page
    #[arg(long)]
    clear: Option<PageIndex>,

    /// Where to write the normalised drawings (defaults to the input file)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct VisitReport {
    page: PageIndex,
    cached: Vec<PageIndex>,
    used_memory: u64,
    region: (i64, i64),
}

fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "slidecache", "slidecache");
    let _log_guard = init_logging(project_dirs.as_ref())?;

    let config_path = match (&args.config, &project_dirs) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(dirs)) => Some(dirs.config_dir().join("config.toml")),
        (None, None) => None,
    };
    let preferences = match config_path {
        Some(path) => Preferences::load(&path)
            .with_context(|| format!("failed to load preferences from {:?}", path))?,
        None => {
            warn!("unable to resolve platform config directory, using defaults");
            Preferences::default()
        }
    };

    match args.command {
        Command::Simulate(simulate_args) => simulate(&preferences, simulate_args),
        Command::Drawings(drawings_args) => drawings(&preferences, drawings_args),
    }
}

fn simulate(preferences: &Preferences, args: SimulateArgs) -> Result<()> {
    let mut settings = preferences.cache.clone();
    if let Some(max_memory) = args.max_memory {
        settings.max_memory = max_memory;
    }
    if let Some(max_slides) = args.max_slides {
        settings.max_slides = max_slides;
    }
    if let Some(threads) = args.threads {
        settings.render_threads = threads;
    }

    let renderer = open_renderer(&args)?;
    let page_count = renderer.page_count();
    let mut cache = PixCache::new(renderer, args.part.into(), &settings)?;
    cache.update_frame(SizeF::new(args.frame[0], args.frame[1]));
    info!(page_count, budget = ?cache.budget(), "simulating");

    for page in args.visit {
        if page >= page_count {
            bail!("page {page} is out of range, the document has {page_count} pages");
        }
        cache.page_number_changed(page);
        settle(&mut cache)?;
        cache.take_events();

        let region = cache.region();
        let report = VisitReport {
            page,
            cached: cache.cached_pages(),
            used_memory: cache.used_memory(),
            region: (region.first, region.second),
        };
        if args.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            println!(
                "page {:>4}: cached {:?} ({} bytes)",
                report.page, report.cached, report.used_memory
            );
        }
    }
    Ok(())
}

#[cfg(feature = "pdfium")]
fn open_renderer(args: &SimulateArgs) -> Result<Arc<dyn Renderer>> {
    if let Some(path) = &args.pdf {
        let renderer = slidecache_render::PdfiumRenderer::open(path)?;
        return Ok(Arc::new(renderer));
    }
    flat_renderer(args)
}

#[cfg(not(feature = "pdfium"))]
fn open_renderer(args: &SimulateArgs) -> Result<Arc<dyn Renderer>> {
    flat_renderer(args)
}

fn flat_renderer(args: &SimulateArgs) -> Result<Arc<dyn Renderer>> {
    let size = SizeF::new(args.page_size[0], args.page_size[1]);
    if size.is_empty() {
        bail!("page size must be positive");
    }
    Ok(Arc::new(FlatRenderer::new(args.pages, size)))
}

fn settle(cache: &mut PixCache) -> Result<()> {
    while !cache.is_idle() {
        if !cache.wait_for_result(RENDER_TIMEOUT) {
            bail!("render workers did not respond within {:?}", RENDER_TIMEOUT);
        }
    }
    cache.process_results();
    Ok(())
}

fn drawings(preferences: &Preferences, args: DrawingsArgs) -> Result<()> {
    let mut drawings = SlideDrawings::new(preferences).with_split_halves(args.split);
    drawings
        .load(&args.file)
        .with_context(|| format!("failed to read drawings from {:?}", args.file))?;

    if let Some(page) = args.clear {
        let parts = if args.split {
            vec![PagePart::LeftHalf, PagePart::RightHalf]
        } else {
            vec![PagePart::FullPage]
        };
        for part in parts {
            let container = drawings.container_mut(page, part);
            let removed = container.len();
            container.clear_paths();
            info!(page, ?part, removed, "cleared drawings");
        }
    }

    for (page, part) in drawings.pages().collect::<Vec<_>>() {
        let count = drawings
            .container(page, part)
            .map_or(0, |container| container.len());
        println!("page {page:>4} {part:?}: {count} items");
    }

    let output = args.output.as_deref().unwrap_or(&args.file);
    write_drawings(&drawings, output)
}

fn write_drawings(drawings: &SlideDrawings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    drawings
        .save(path)
        .with_context(|| format!("failed to write drawings to {:?}", path))
}

fn init_logging(project_dirs: Option<&ProjectDirs>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match project_dirs {
        Some(project_dirs) => {
            let log_dir = project_dirs.data_local_dir().join("logs");
            fs::create_dir_all(&log_dir)?;
            let file_appender = tracing_appender::rolling::never(log_dir, "slidecache.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer);
            (Some(file_layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
