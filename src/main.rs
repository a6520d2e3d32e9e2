use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use log::{info, warn, LevelFilter};
use simplelog::{Config, SimpleLogger, WriteLogger};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mangascroll::{DirectorySource, ImageWorker, Pager, PagerConfig, PagerEvent, Size};

/// How long to wait for the visible pages to decode at each scroll step.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Scrolls through a directory of page images and reports the layout.
#[derive(Debug, Parser)]
#[command(name = "mangascroll", version)]
struct Args {
    /// Directory holding the page images
    path: PathBuf,
    /// Include images in subdirectories
    #[arg(short, long)]
    recursive: bool,
    /// Viewport size as WIDTHxHEIGHT
    #[arg(long, default_value = "1200x800", value_parser = parse_viewport)]
    viewport: Size,
    /// Zero-based page to open at
    #[arg(long, default_value_t = 0)]
    start_page: usize,
    /// Pixels scrolled per step
    #[arg(long, default_value_t = 400.0)]
    scroll_step: f64,
    /// Config file (defaults to $XDG_CONFIG_HOME/mangascroll/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the log to this file instead of stderr
    #[arg(long)]
    log: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_viewport(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let width = w.trim().parse::<u32>().map_err(|e| format!("bad width: {e}"))?;
    let height = h.trim().parse::<u32>().map_err(|e| format!("bad height: {e}"))?;
    if width == 0 || height == 0 {
        return Err("viewport must not be empty".to_string());
    }
    Ok(Size::new(width, height))
}

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    match &args.log {
        Some(path) => WriteLogger::init(
            level,
            Config::default(),
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )?,
        None => SimpleLogger::init(level, Config::default())?,
    }
    Ok(())
}

fn report_events(events: &crossbeam_channel::Receiver<PagerEvent>) {
    for event in events.try_iter() {
        match event {
            PagerEvent::ImagesLoaded { count } => println!("loaded {count} pages"),
            PagerEvent::CurrentPageChanged(index) => println!("current page: {}", index + 1),
            PagerEvent::AddBookmarkRequested(index) => println!("bookmark: {}", index + 1),
        }
    }
}

fn print_step(pager: &Pager<ImageWorker>) {
    println!(
        "offset {:>9.0}  page {:>4}  visible {:?}  resident {:?}",
        pager.scroll_offset(),
        pager.current_page().map_or(0, |i| i + 1),
        pager.visible_pages(),
        pager.resident_pages(),
    );
}

fn print_layout(pager: &Pager<ImageWorker>) {
    let layout = pager.layout();
    for (i, page) in pager.pages().iter().enumerate() {
        let state = if page.is_failed() {
            "failed"
        } else if page.intrinsic_size().is_some() {
            "sized"
        } else {
            "estimated"
        };
        println!(
            "{:>4}  {:>9}..{:<9}  {:>11}  {:>5.3}  {:<9}  {}",
            i + 1,
            layout.start(i).unwrap_or(0),
            layout.end(i).unwrap_or(0),
            page.scaled_size().to_string(),
            page.ratio(),
            state,
            page.source_ref(),
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    if args.scroll_step.is_nan() || args.scroll_step <= 0.0 {
        bail!("--scroll-step must be positive");
    }

    let config = PagerConfig::load_or_default(args.config.as_deref())?;
    let worker = ImageWorker::new(config.worker_threads())?;
    info!("using {} worker thread(s)", worker.threads());
    let mut pager = Pager::new(config, worker, args.viewport);
    let events = pager.events();

    let source = Arc::new(DirectorySource::new(&args.path, args.recursive));
    let count = pager
        .open(source, args.start_page)
        .with_context(|| format!("failed to open {}", args.path.display()))?;
    if count == 0 {
        bail!("no images found in {}", args.path.display());
    }

    let tic = Instant::now();
    loop {
        if !pager.wait_idle(IDLE_TIMEOUT) {
            warn!(
                "gave up waiting for page images at offset {:.0}",
                pager.scroll_offset()
            );
        }
        report_events(&events);
        print_step(&pager);
        let max = pager.layout().max_scroll(pager.viewport().height);
        if pager.scroll_offset() >= max {
            break;
        }
        pager.scroll_by(args.scroll_step);
    }
    pager.request_bookmark();
    report_events(&events);
    print_layout(&pager);
    info!("scrolled {count} pages in {} ms", tic.elapsed().as_millis());
    Ok(())
}
