use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glyphreel::progress::{render_bar, BAR_WIDTH};
use glyphreel::{load_config, AppConfig, FramePipeline, Progress, ProgressPhase};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a video into an ASCII-glyph video
    Convert(ConvertArgs),
    /// Remove the working directory (extracted frames and cache token)
    Clean,
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// Input video file
    input: PathBuf,

    /// Output video file (defaults to <input>_ascii.mp4 beside the input)
    output: Option<PathBuf>,

    /// Glyphs from darkest to brightest
    #[arg(long)]
    palette: Option<String>,

    /// Output width in glyph columns
    #[arg(long)]
    width: Option<u32>,

    /// Frames per second for extraction and encoding
    #[arg(long)]
    fps: Option<u32>,

    /// Audio bitrate handed to the encoder, e.g. 128k
    #[arg(long)]
    audio_bitrate: Option<String>,

    /// Root directory for extracted and converted frames
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Worker threads per batch (defaults to all cores)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Parser, Debug)]
#[command(version, about = "Resumable video to ASCII-glyph video converter.")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug details, including every external command line
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    let active = ActiveBar::default();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .target(env_logger::Target::Pipe(Box::new(LogWriter(active.clone()))))
        .init();

    let cfg = load_config(cli.config.as_deref())?;
    match cli.cmd {
        Command::Convert(args) => run_convert(cfg, args, active),
        Command::Clean => run_clean(&cfg),
    }
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("glyphreel_output");
    input.with_file_name(format!("{}_ascii.mp4", stem))
}

fn run_convert(mut cfg: AppConfig, args: ConvertArgs, active: ActiveBar) -> Result<()> {
    if let Some(palette) = args.palette {
        cfg.palette = palette;
    }
    if let Some(width) = args.width {
        cfg.output_width = width;
    }
    if let Some(fps) = args.fps {
        cfg.fps = fps;
    }
    if let Some(bitrate) = args.audio_bitrate {
        cfg.audio_bitrate = bitrate;
    }
    if let Some(dir) = args.work_dir {
        cfg.work_dir = dir;
    }
    if args.workers.is_some() {
        cfg.workers = args.workers;
    }

    let output = args.output.unwrap_or_else(|| default_output(&args.input));
    let pipeline = FramePipeline::new(cfg)?;

    let cancel = pipeline.cancel_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, stopping after the current batch...");
    }) {
        warn!("could not set up Ctrl+C handler: {}", e);
    }

    let mut display = ProgressDisplay::new(io::stderr().is_terminal(), active);
    let result = pipeline.convert(&args.input, &output, |p| display.update(p));
    display.finish();
    let summary = result.with_context(|| format!("converting {}", args.input.display()))?;

    println!(
        "Converted {} frames ({} new, {} reused, {} failed) at {}x{} glyphs",
        summary.decode.total,
        summary.decode.converted,
        summary.decode.skipped,
        summary.decode.failed,
        summary.geometry.output_width,
        summary.geometry.output_height
    );
    for (index, reason) in &summary.decode.failures {
        println!("  frame {}: {}", index, reason);
    }
    if summary.render.failed > 0 {
        println!("{} frames failed to render", summary.render.failed);
    }
    println!("Output written to {}", summary.output.display());
    Ok(())
}

fn run_clean(cfg: &AppConfig) -> Result<()> {
    let token = cfg.cache_token_path();
    if token.exists() && !token.starts_with(&cfg.work_dir) {
        if let Err(e) = fs::remove_file(&token) {
            eprintln!("Warning: failed to remove {}: {}", token.display(), e);
        }
    }
    if cfg.work_dir.exists() {
        fs::remove_dir_all(&cfg.work_dir)
            .with_context(|| format!("removing {}", cfg.work_dir.display()))?;
        println!("Removed {}", cfg.work_dir.display());
    } else {
        println!("Nothing to clean at {}", cfg.work_dir.display());
    }
    Ok(())
}

/// The bar currently drawn on stderr, if any.
#[derive(Clone, Default)]
struct ActiveBar(Arc<Mutex<Option<ProgressBar>>>);

impl ActiveBar {
    fn set(&self, bar: Option<ProgressBar>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = bar;
        }
    }

    fn get(&self) -> Option<ProgressBar> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Log sink that hides the active bar while a record is written, so
/// warnings land above the bar instead of inside it.
struct LogWriter(ActiveBar);

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.get() {
            Some(pb) => pb.suspend(|| io::stderr().write_all(buf))?,
            None => io::stderr().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// In-place progress bars on a terminal, one log line per batch otherwise.
struct ProgressDisplay {
    interactive: bool,
    bar: Option<(ProgressPhase, ProgressBar)>,
    active: ActiveBar,
}

impl ProgressDisplay {
    fn new(interactive: bool, active: ActiveBar) -> Self {
        Self {
            interactive,
            bar: None,
            active,
        }
    }

    fn update(&mut self, progress: &Progress) {
        if progress.total == 0 || progress.phase == ProgressPhase::Complete {
            self.finish();
            if progress.phase != ProgressPhase::Complete {
                info!("{}", progress.message);
            }
            return;
        }

        if !self.interactive {
            info!(
                "{:<18} {}",
                progress.phase.label(),
                render_bar(progress.completed, progress.total, BAR_WIDTH)
            );
            return;
        }

        if self.bar.as_ref().map(|(phase, _)| *phase) != Some(progress.phase) {
            self.finish();
            let pb = ProgressBar::new(progress.total as u64);
            let style = ProgressStyle::with_template("{msg:18} [{bar:50}] {percent:>3}%")
                .map(|s| s.progress_chars("#-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb.set_message(progress.phase.label());
            self.active.set(Some(pb.clone()));
            self.bar = Some((progress.phase, pb));
        }
        if let Some((_, pb)) = &self.bar {
            pb.set_position(progress.completed as u64);
        }
        if progress.is_finished() {
            self.finish();
        }
    }

    /// Leave the last bar on screen at its final state.
    fn finish(&mut self) {
        if let Some((_, pb)) = self.bar.take() {
            self.active.set(None);
            pb.finish();
        }
    }
}
