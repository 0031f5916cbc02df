use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;
use crate::palette::{GlyphPalette, DEFAULT_PALETTE};

pub const CONFIG_FILE_NAME: &str = "glyphreel.toml";
pub const DEFAULT_DECODE_BATCH: usize = 50;
pub const DEFAULT_RENDER_BATCH: usize = 100;

/// Glyph cells are roughly twice as tall as they are wide.
pub const GLYPH_ASPECT: f64 = 0.5;

/// External programs and the options handed to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// ImageMagick-compatible renderer turning a text frame into an image.
    pub renderer: String,
    pub font: String,
    pub point_size: u32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            renderer: "magick".to_string(),
            font: "DejaVu-Sans-Mono".to_string(),
            point_size: 12,
        }
    }
}

/// Application configuration. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Glyphs from darkest to brightest
    pub palette: String,
    /// Output width in glyph columns
    pub output_width: u32,
    /// Frames per second for extraction and the final encode
    pub fps: u32,
    /// Passed through to the audio encoder, e.g. "128k"
    pub audio_bitrate: String,
    /// Root for every intermediate artifact
    pub work_dir: PathBuf,
    /// Raster/text frame directory, relative to `work_dir`
    pub frames_subdir: PathBuf,
    /// Cache token location; defaults to `<work_dir>/input.token`
    pub cache_token: Option<PathBuf>,
    pub decode_batch_size: usize,
    pub render_batch_size: usize,
    /// Worker threads per batch; all cores when unset
    pub workers: Option<usize>,
    /// Bound on a single per-frame tool call, 0 disables it
    pub tool_timeout_secs: u64,
    pub tools: ToolConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.to_string(),
            output_width: 120,
            fps: 30,
            audio_bitrate: "128k".to_string(),
            work_dir: default_work_dir(),
            frames_subdir: PathBuf::from("frames"),
            cache_token: None,
            decode_batch_size: DEFAULT_DECODE_BATCH,
            render_batch_size: DEFAULT_RENDER_BATCH,
            workers: None,
            tool_timeout_secs: 60,
            tools: ToolConfig::default(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("glyphreel"))
        .unwrap_or_else(|| PathBuf::from(".glyphreel"))
}

impl AppConfig {
    /// Parse a config file. `.json` files use JSON, anything else TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let is_json = path.extension().is_some_and(|e| e == "json");
        let cfg: AppConfig = if is_json {
            serde_json::from_str(&text).context("parsing config json")?
        } else {
            toml::from_str(&text).context("parsing config toml")?
        };
        Ok(cfg)
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.work_dir.join(&self.frames_subdir)
    }

    pub fn cache_token_path(&self) -> PathBuf {
        self.cache_token
            .clone()
            .unwrap_or_else(|| self.work_dir.join("input.token"))
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }

    /// Check every setting and return the parsed palette.
    pub fn validate(&self) -> Result<GlyphPalette, PipelineError> {
        let palette = GlyphPalette::new(&self.palette)?;
        let invalid = |msg: &str| Err(PipelineError::InvalidConfig(msg.to_string()));
        if self.output_width == 0 {
            return invalid("output width must be greater than 0");
        }
        if self.fps == 0 {
            return invalid("fps must be greater than 0");
        }
        if self.decode_batch_size == 0 || self.render_batch_size == 0 {
            return invalid("batch sizes must be greater than 0");
        }
        if self.workers == Some(0) {
            return invalid("workers must be greater than 0");
        }
        if self.audio_bitrate.trim().is_empty() {
            return invalid("audio bitrate must not be empty");
        }
        Ok(palette)
    }
}

/// Find and load the configuration: an explicit file, then the per-user
/// data directory, then the current directory, then built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(anyhow!("config file {} does not exist", path.display()));
        }
        return AppConfig::from_file(path);
    }

    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::data_dir() {
        d.push("glyphreel");
        d.push(CONFIG_FILE_NAME);
        tried.push(d);
    }
    tried.push(PathBuf::from(CONFIG_FILE_NAME));

    for p in &tried {
        if p.exists() {
            log::debug!("loading config from {}", p.display());
            return AppConfig::from_file(p);
        }
    }
    Ok(AppConfig::default())
}

/// Source and output dimensions of a conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoGeometry {
    pub source_width: u32,
    pub source_height: u32,
    pub source_fps: f64,
    pub output_width: u32,
    pub output_height: u32,
}

impl VideoGeometry {
    /// `output_height = floor(output_width * source_height / source_width * 0.5)`,
    /// never below one row.
    pub fn new(
        source_width: u32,
        source_height: u32,
        source_fps: f64,
        output_width: u32,
    ) -> Result<Self, PipelineError> {
        if source_width == 0 || source_height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "source dimensions must be positive, got {}x{}",
                source_width, source_height
            )));
        }
        if output_width == 0 {
            return Err(PipelineError::InvalidConfig(
                "output width must be greater than 0".to_string(),
            ));
        }
        let height = (output_width as f64 * source_height as f64 / source_width as f64 * GLYPH_ASPECT)
            .floor() as u32;
        Ok(Self {
            source_width,
            source_height,
            source_fps,
            output_width,
            output_height: height.max(1),
        })
    }
}
