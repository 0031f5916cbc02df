//! # glyphreel - resumable video to ASCII-glyph conversion
//!
//! `glyphreel` turns a video into a directory of glyph text frames, renders
//! those frames back into images and muxes them into a new video.
//!
//! ## Features
//!
//! - Grayscale PGM extraction, decoded straight into brightness matrices
//! - Configurable dark-to-light glyph palettes
//! - Incremental re-runs: frames already converted are never redone
//! - Cache token so an unchanged input reuses its extracted frame set
//! - Batched, parallel conversion with one progress update per batch
//!
//! ## Example
//!
//! ```no_run
//! use glyphreel::{AppConfig, FramePipeline};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = FramePipeline::new(AppConfig::default())?;
//! let summary = pipeline.convert(
//!     Path::new("input.mp4"),
//!     Path::new("input_ascii.mp4"),
//!     |progress| println!("{}", progress.message),
//! )?;
//! println!("{} frames converted", summary.decode.converted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Converting an existing frame directory
//!
//! The decode stage works on any directory of `frame_NNNNN.pgm` rasters and
//! needs no external tools:
//!
//! ```no_run
//! use glyphreel::{AppConfig, FramePipeline};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = FramePipeline::new(AppConfig::default())?;
//! let summary = pipeline.convert_frames(Path::new("frames"), 120, 33, |p| {
//!     println!("{}/{}", p.completed, p.total);
//! })?;
//! println!("skipped {}, failed {}", summary.skipped, summary.failed);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod inventory;
pub mod palette;
pub mod progress;
pub mod raster;
pub mod tools;

pub use batch::{BatchScheduler, BatchSummary};
pub use cache::CacheValidator;
pub use config::{load_config, AppConfig, ToolConfig, VideoGeometry};
pub use convert::{CommandRaster, ConversionOutcome, FileRaster, FrameConverter, RasterSource};
pub use error::{DecodeError, PipelineError, Result, ToolError};
pub use inventory::{FramePattern, FrameRecord, FrameState};
pub use palette::{quantize, GlyphPalette};
pub use progress::{Progress, ProgressPhase};
pub use raster::BrightnessMatrix;

use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use convert::TempFileGuard;
use inventory::IMAGE_EXTENSION;

/// What a full run did.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub geometry: VideoGeometry,
    /// The extracted frame set from a previous run was reused
    pub reused_frames: bool,
    pub has_audio: bool,
    pub decode: BatchSummary,
    pub render: BatchSummary,
    pub output: PathBuf,
}

/// Drives the conversion stages with one immutable configuration.
pub struct FramePipeline {
    config: AppConfig,
    palette: GlyphPalette,
    cancel: Arc<AtomicBool>,
}

impl FramePipeline {
    /// Validate `config` and build a pipeline around it.
    pub fn new(config: AppConfig) -> Result<Self> {
        let palette = config.validate()?;
        Ok(Self {
            config,
            palette,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The validated configuration this pipeline runs with.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Setting this flag stops the run at the next batch boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Validator for the token that ties the frame set to its input.
    pub fn cache(&self) -> CacheValidator {
        CacheValidator::new(self.config.cache_token_path())
    }

    /// Scheduler sharing this pipeline's cancel flag and worker bound.
    fn scheduler(&self, batch_size: usize) -> Result<BatchScheduler> {
        let scheduler = BatchScheduler::new(batch_size).with_cancel_flag(self.cancel_flag());
        match self.config.workers {
            Some(n) => scheduler.with_workers(n),
            None => Ok(scheduler),
        }
    }

    /// Turn a cancelled or wholly failed stage into its error.
    fn finish_stage(summary: BatchSummary) -> Result<BatchSummary> {
        if summary.cancelled {
            return Err(PipelineError::Cancelled {
                done: summary.processed(),
                total: summary.total,
            });
        }
        if summary.all_failed() {
            return Err(PipelineError::AllFramesFailed(summary.total));
        }
        Ok(summary)
    }

    /// Convert every raster in `frames_dir` that has no text frame yet.
    ///
    /// Individual failures are counted in the summary; only a stage where
    /// every frame failed is an error.
    pub fn convert_frames<F>(&self, frames_dir: &Path, width: u32, height: u32, on_progress: F) -> Result<BatchSummary>
    where
        F: FnMut(&Progress),
    {
        let records = inventory::list(frames_dir, &FramePattern::raster());
        if records.is_empty() {
            return Err(PipelineError::NoFrames(frames_dir.to_path_buf()));
        }
        let converter = FrameConverter::new(self.palette.clone(), width, height);
        let summary = self.scheduler(self.config.decode_batch_size)?.run(
            &records,
            ProgressPhase::ConvertingFrames,
            |record| converter.convert_if_needed(record),
            on_progress,
        );
        info!(
            "decode: {} converted, {} skipped, {} failed",
            summary.converted, summary.skipped, summary.failed
        );
        Self::finish_stage(summary)
    }

    /// Render every text frame in `frames_dir` to an image, skipping frames
    /// whose image already exists.
    pub fn render_frames<F>(&self, frames_dir: &Path, on_progress: F) -> Result<BatchSummary>
    where
        F: FnMut(&Progress),
    {
        let records = inventory::list(frames_dir, &FramePattern::text());
        if records.is_empty() {
            return Err(PipelineError::NoFrames(frames_dir.to_path_buf()));
        }
        let tool_cfg = &self.config.tools;
        let timeout = self.config.tool_timeout();
        let summary = self.scheduler(self.config.render_batch_size)?.run(
            &records,
            ProgressPhase::RenderingFrames,
            |record| {
                let image = record.path_with_extension(IMAGE_EXTENSION);
                if image.exists() {
                    return ConversionOutcome::Skipped;
                }
                // Keep the image extension so the renderer picks the format.
                let guard = TempFileGuard::new(image.with_extension(format!("tmp.{}", IMAGE_EXTENSION)));
                let rendered = tools::render_frame(&record.text_path, guard.path(), tool_cfg, timeout)
                    .map_err(|e| e.to_string())
                    .and_then(|()| guard.persist(&image).map_err(|e| e.to_string()));
                match rendered {
                    Ok(()) => ConversionOutcome::Converted,
                    Err(reason) => ConversionOutcome::Failed(reason),
                }
            },
            on_progress,
        );
        info!(
            "render: {} rendered, {} skipped, {} failed",
            summary.converted, summary.skipped, summary.failed
        );
        Self::finish_stage(summary)
    }

    /// True when `frames_dir` holds rasters of exactly the output grid.
    fn rasters_match(frames_dir: &Path, geometry: &VideoGeometry) -> bool {
        let first = match inventory::list(frames_dir, &FramePattern::raster()).into_iter().next() {
            Some(record) => record,
            None => return false,
        };
        fs::read(&first.raster_path)
            .ok()
            .and_then(|raw| raster::dimensions(&raw).ok())
            .is_some_and(|dims| dims == (geometry.output_width as usize, geometry.output_height as usize))
    }

    /// Make sure the frames directory holds a complete raster set for
    /// `input`. Returns true when a previous extraction was reused.
    pub fn prepare_frames<F>(&self, input: &Path, geometry: &VideoGeometry, mut on_progress: F) -> Result<bool>
    where
        F: FnMut(&Progress),
    {
        let token = input.to_string_lossy();
        let frames_dir = self.config.frames_dir();
        let cache = self.cache();

        if cache.is_valid(&token) && Self::rasters_match(&frames_dir, geometry) {
            info!("reusing extracted frames in {}", frames_dir.display());
            return Ok(true);
        }

        fs::create_dir_all(&frames_dir)?;
        // A token left from an earlier run must not vouch for a partial set.
        if let Err(e) = cache.invalidate() {
            warn!("could not remove cache token {}: {}", cache.token_path().display(), e);
        }
        let removed = inventory::clear_frames(&frames_dir)?;
        if removed > 0 {
            info!("removed {} stale frame files", removed);
        }

        on_progress(&Progress::started(ProgressPhase::ExtractingFrames));
        tools::extract_frames(input, &frames_dir, geometry, self.config.fps, &self.config.tools)
            .map_err(PipelineError::tool("frame extraction"))?;

        let extracted = inventory::count(&frames_dir, &FramePattern::raster());
        if extracted == 0 {
            return Err(PipelineError::NoFrames(frames_dir));
        }
        info!("extracted {} frames", extracted);

        if let Err(e) = cache.record(&token) {
            warn!(
                "could not write cache token {}: {}; next run will re-extract",
                cache.token_path().display(),
                e
            );
        }
        Ok(false)
    }

    /// Full run: extract, convert, render and mux `input` into `output`.
    pub fn convert<F>(&self, input: &Path, output: &Path, mut on_progress: F) -> Result<PipelineSummary>
    where
        F: FnMut(&Progress),
    {
        if !input.is_file() {
            return Err(PipelineError::MissingInput(input.to_path_buf()));
        }
        let cfg = &self.config;
        let frames_dir = cfg.frames_dir();

        let source = tools::probe(input, &cfg.tools).map_err(PipelineError::tool("probe"))?;
        let geometry = VideoGeometry::new(source.width, source.height, source.fps, cfg.output_width)?;
        info!(
            "{}x{} @ {:.2}fps -> {}x{} glyphs @ {}fps",
            geometry.source_width,
            geometry.source_height,
            geometry.source_fps,
            geometry.output_width,
            geometry.output_height,
            cfg.fps
        );

        let reused_frames = self.prepare_frames(input, &geometry, &mut on_progress)?;
        let decode = self.convert_frames(
            &frames_dir,
            geometry.output_width,
            geometry.output_height,
            &mut on_progress,
        )?;

        let audio = if source.has_audio {
            on_progress(&Progress::started(ProgressPhase::ExtractingAudio));
            let audio_path = cfg.work_dir.join("audio.m4a");
            tools::extract_audio(input, &audio_path, &cfg.audio_bitrate, &cfg.tools)
                .map_err(PipelineError::tool("audio extraction"))?;
            Some(audio_path)
        } else {
            info!("input has no audio stream");
            None
        };

        let render = self.render_frames(&frames_dir, &mut on_progress)?;

        on_progress(&Progress::started(ProgressPhase::Muxing));
        let images: Vec<PathBuf> = inventory::scan(&frames_dir, &FramePattern::image())
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        if images.is_empty() {
            return Err(PipelineError::NoFrames(frames_dir));
        }
        let concat_list = frames_dir.join("frames.ffconcat");
        tools::write_concat_list(&concat_list, &images, cfg.fps)?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        tools::mux(
            &concat_list,
            audio.as_deref(),
            cfg.fps,
            &cfg.audio_bitrate,
            output,
            &cfg.tools,
        )
        .map_err(PipelineError::tool("muxing"))?;

        if let Err(e) = self.write_details(&geometry, &decode) {
            warn!("could not write details file: {}", e);
        }
        on_progress(&Progress::complete(decode.total));

        Ok(PipelineSummary {
            geometry,
            reused_frames,
            has_audio: audio.is_some(),
            decode,
            render,
            output: output.to_path_buf(),
        })
    }

    /// Record the run parameters in `<work_dir>/details.md`.
    fn write_details(&self, geometry: &VideoGeometry, decode: &BatchSummary) -> std::io::Result<()> {
        let details = format!(
            "Version: {}\nFrames: {}\nFailed: {}\nColumns: {}\nRows: {}\nFPS: {}\nPalette: {} glyphs",
            env!("CARGO_PKG_VERSION"),
            decode.total,
            decode.failed,
            geometry.output_width,
            geometry.output_height,
            self.config.fps,
            self.palette.len()
        );
        fs::write(self.config.work_dir.join("details.md"), details)
    }
}
