use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::inventory::FrameRecord;
use crate::palette::GlyphPalette;
use crate::raster::{self, BrightnessMatrix};
use crate::tools;

/// Result of converting one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Output already existed; nothing was read or written
    Skipped,
    Converted,
    Failed(String),
}

/// Where a frame's raster bytes come from.
pub trait RasterSource: Send + Sync {
    fn load(&self, record: &FrameRecord) -> Result<Vec<u8>>;
}

/// Reads the extracted raster file as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRaster;

impl RasterSource for FileRaster {
    fn load(&self, record: &FrameRecord) -> Result<Vec<u8>> {
        fs::read(&record.raster_path).with_context(|| format!("reading {}", record.raster_path.display()))
    }
}

/// Runs an external rasterizer that prints a PGM on stdout. Arguments equal
/// to `{input}` are replaced with the frame's raster path.
#[derive(Debug, Clone)]
pub struct CommandRaster {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl RasterSource for CommandRaster {
    fn load(&self, record: &FrameRecord) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            if arg == "{input}" {
                cmd.arg(&record.raster_path);
            } else {
                cmd.arg(arg);
            }
        }
        let output = tools::run_tool(&mut cmd, self.timeout)
            .with_context(|| format!("rasterizing {}", record.raster_path.display()))?;
        Ok(output.stdout)
    }
}

/// Removes its path on drop unless persisted.
pub(crate) struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    /// Guard for a sibling of `dest` named `<file name>.tmp`.
    pub(crate) fn beside(dest: &Path) -> Self {
        let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        Self::new(dest.with_file_name(name))
    }

    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file into place; only a complete file ever has `dest`'s name.
    pub(crate) fn persist(mut self, dest: &Path) -> io::Result<()> {
        fs::rename(&self.path, dest)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

pub(crate) fn write_atomic(dest: &Path, contents: &str) -> io::Result<()> {
    let guard = TempFileGuard::beside(dest);
    fs::write(guard.path(), contents)?;
    guard.persist(dest)
}

/// Decodes rasters and writes glyph text frames.
pub struct FrameConverter {
    palette: GlyphPalette,
    width: usize,
    height: usize,
    source: Box<dyn RasterSource>,
}

impl FrameConverter {
    pub fn new(palette: GlyphPalette, width: u32, height: u32) -> Self {
        Self {
            palette,
            width: width as usize,
            height: height as usize,
            source: Box::new(FileRaster),
        }
    }

    pub fn with_source(mut self, source: impl RasterSource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Convert `record` unless its text frame already exists.
    pub fn convert_if_needed(&self, record: &FrameRecord) -> ConversionOutcome {
        if record.text_path.exists() {
            return ConversionOutcome::Skipped;
        }
        match self.convert(record) {
            Ok(()) => ConversionOutcome::Converted,
            Err(e) => ConversionOutcome::Failed(format!("{:#}", e)),
        }
    }

    fn convert(&self, record: &FrameRecord) -> Result<()> {
        let raw = self.source.load(record)?;
        let matrix = raster::decode(&raw, self.width, self.height)
            .with_context(|| format!("decoding {}", record.raster_path.display()))?;
        let text = self.render_text(&matrix);
        write_atomic(&record.text_path, &text)
            .with_context(|| format!("writing {}", record.text_path.display()))
    }

    /// One glyph per column, rows joined by `\n`.
    pub fn render_text(&self, matrix: &BrightnessMatrix) -> String {
        let mut out = String::with_capacity((matrix.width() + 1) * matrix.height());
        for (i, row) in matrix.rows().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.extend(row.iter().map(|b| self.palette.glyph_for(*b)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_pgm(path: &Path, width: usize, height: usize, samples: &[u8]) {
        let mut raw = format!("P5\n{} {}\n255\n", width, height).into_bytes();
        raw.extend_from_slice(samples);
        fs::write(path, raw).unwrap();
    }

    fn converter() -> FrameConverter {
        FrameConverter::new(GlyphPalette::new(" .@").unwrap(), 2, 2)
    }

    #[test]
    fn converts_and_then_skips() {
        let tmp = TempDir::new().unwrap();
        let record = FrameRecord::new(tmp.path(), 1);
        write_pgm(&record.raster_path, 2, 2, &[0, 255, 128, 255]);

        let conv = converter();
        assert_eq!(conv.convert_if_needed(&record), ConversionOutcome::Converted);
        assert_eq!(fs::read_to_string(&record.text_path).unwrap(), " @\n.@");

        // A changed raster is not re-read once the text exists.
        write_pgm(&record.raster_path, 2, 2, &[0, 0, 0, 0]);
        assert_eq!(conv.convert_if_needed(&record), ConversionOutcome::Skipped);
        assert_eq!(fs::read_to_string(&record.text_path).unwrap(), " @\n.@");
    }

    #[test]
    fn corrupt_raster_fails_without_output() {
        let tmp = TempDir::new().unwrap();
        let record = FrameRecord::new(tmp.path(), 2);
        fs::write(&record.raster_path, b"garbage").unwrap();
        let outcome = converter().convert_if_needed(&record);
        assert!(matches!(outcome, ConversionOutcome::Failed(ref msg) if msg.contains("magic")));
        assert!(!record.text_path.exists());
        assert!(!TempFileGuard::beside(&record.text_path).path().exists());
    }

    #[test]
    fn missing_raster_fails() {
        let tmp = TempDir::new().unwrap();
        let record = FrameRecord::new(tmp.path(), 3);
        assert!(matches!(
            converter().convert_if_needed(&record),
            ConversionOutcome::Failed(_)
        ));
    }

    #[test]
    fn unpersisted_temp_file_is_removed() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("frame_00001.txt");
        let temp_path = {
            let guard = TempFileGuard::beside(&dest);
            fs::write(guard.path(), "partial").unwrap();
            guard.path().to_path_buf()
        };
        assert_eq!(temp_path, tmp.path().join("frame_00001.txt.tmp"));
        assert!(!temp_path.exists());
        assert!(!dest.exists());
    }

    struct FixedRaster(Vec<u8>);

    impl RasterSource for FixedRaster {
        fn load(&self, _record: &FrameRecord) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn custom_raster_source() {
        let tmp = TempDir::new().unwrap();
        let record = FrameRecord::new(tmp.path(), 4);
        let conv = converter().with_source(FixedRaster(b"P2\n2 2\n2\n2 2 2 2\n".to_vec()));
        assert_eq!(conv.convert_if_needed(&record), ConversionOutcome::Converted);
        assert_eq!(fs::read_to_string(&record.text_path).unwrap(), "@@\n@@");
    }

    #[cfg(unix)]
    #[test]
    fn command_raster_reads_stdout() {
        let tmp = TempDir::new().unwrap();
        let record = FrameRecord::new(tmp.path(), 5);
        write_pgm(&record.raster_path, 2, 2, &[255, 255, 0, 0]);
        let conv = converter().with_source(CommandRaster {
            program: "cat".to_string(),
            args: vec!["{input}".to_string()],
            timeout: Some(Duration::from_secs(5)),
        });
        assert_eq!(conv.convert_if_needed(&record), ConversionOutcome::Converted);
        assert_eq!(fs::read_to_string(&record.text_path).unwrap(), "@@\n  ");
    }
}
