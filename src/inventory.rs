use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const FRAME_PREFIX: &str = "frame_";
pub const INDEX_DIGITS: usize = 5;
pub const RASTER_EXTENSION: &str = "pgm";
pub const TEXT_EXTENSION: &str = "txt";
pub const IMAGE_EXTENSION: &str = "png";

/// Naming convention `<prefix><zero-padded index>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePattern {
    pub prefix: String,
    pub digits: usize,
    pub extension: String,
}

impl FramePattern {
    pub fn new(extension: &str) -> Self {
        Self {
            prefix: FRAME_PREFIX.to_string(),
            digits: INDEX_DIGITS,
            extension: extension.to_string(),
        }
    }

    pub fn raster() -> Self {
        Self::new(RASTER_EXTENSION)
    }

    pub fn text() -> Self {
        Self::new(TEXT_EXTENSION)
    }

    pub fn image() -> Self {
        Self::new(IMAGE_EXTENSION)
    }

    pub fn file_name(&self, index: u32) -> String {
        format!(
            "{}{:0width$}.{}",
            self.prefix,
            index,
            self.extension,
            width = self.digits
        )
    }

    /// printf-style pattern handed to ffmpeg, e.g. `frame_%05d.pgm`.
    pub fn printf_pattern(&self) -> String {
        format!("{}%0{}d.{}", self.prefix, self.digits, self.extension)
    }

    /// Parse the index out of a file name. The match is exact and
    /// case-sensitive. Indices wider than `digits` are accepted only in the
    /// form `%0Nd` produces them, without a leading zero.
    pub fn parse_index(&self, file_name: &str) -> Option<u32> {
        let stem = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?;
        if stem.len() < self.digits || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if stem.len() > self.digits && stem.starts_with('0') {
            return None;
        }
        stem.parse().ok()
    }
}

/// Lifecycle of a frame, read from the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Missing,
    Extracted,
    Converted,
}

/// One frame of the sequence and the paths derived from its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub index: u32,
    pub raster_path: PathBuf,
    pub text_path: PathBuf,
}

impl FrameRecord {
    pub fn new(dir: &Path, index: u32) -> Self {
        Self {
            index,
            raster_path: dir.join(FramePattern::raster().file_name(index)),
            text_path: dir.join(FramePattern::text().file_name(index)),
        }
    }

    /// Sibling path for the same frame with another extension.
    pub fn path_with_extension(&self, extension: &str) -> PathBuf {
        self.raster_path.with_extension(extension)
    }

    pub fn state(&self) -> FrameState {
        if self.text_path.is_file() {
            FrameState::Converted
        } else if self.raster_path.is_file() {
            FrameState::Extracted
        } else {
            FrameState::Missing
        }
    }
}

/// Files in `dir` (not recursive) matching `pattern`, as `(index, path)`
/// ordered by numeric index. Directory iteration order never leaks out.
pub fn scan(dir: &Path, pattern: &FramePattern) -> Vec<(u32, PathBuf)> {
    let mut found: Vec<(u32, PathBuf)> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let index = e.file_name().to_str().and_then(|n| pattern.parse_index(n))?;
            Some((index, e.into_path()))
        })
        .collect();
    found.sort_by_key(|(index, _)| *index);
    found
}

/// Frame records for every file in `dir` matching `pattern`.
pub fn list(dir: &Path, pattern: &FramePattern) -> Vec<FrameRecord> {
    scan(dir, pattern)
        .into_iter()
        .map(|(index, _)| FrameRecord::new(dir, index))
        .collect()
}

pub fn count(dir: &Path, pattern: &FramePattern) -> usize {
    scan(dir, pattern).len()
}

/// Remove every raster, text and rendered image frame from `dir`, along
/// with temp files (`frame_N.txt.tmp`, `frame_N.tmp.png`) an interrupted
/// run left behind. Returns how many files were removed.
pub fn clear_frames(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    let patterns = [
        FramePattern::raster(),
        FramePattern::text(),
        FramePattern::image(),
        FramePattern::new(&format!("{}.tmp", TEXT_EXTENSION)),
        FramePattern::new(&format!("tmp.{}", IMAGE_EXTENSION)),
    ];
    for pattern in patterns {
        for (_, path) in scan(dir, &pattern) {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(FramePattern::raster().file_name(1), "frame_00001.pgm");
        assert_eq!(FramePattern::text().file_name(123456), "frame_123456.txt");
        assert_eq!(FramePattern::image().printf_pattern(), "frame_%05d.png");
    }

    #[test]
    fn parse_index_is_strict() {
        let p = FramePattern::text();
        assert_eq!(p.parse_index("frame_00042.txt"), Some(42));
        assert_eq!(p.parse_index("frame_100000.txt"), Some(100000));
        assert_eq!(p.parse_index("frame_0042.txt"), None);
        assert_eq!(p.parse_index("frame_000042.txt"), None);
        assert_eq!(p.parse_index("Frame_00042.txt"), None);
        assert_eq!(p.parse_index("frame_00042.TXT"), None);
        assert_eq!(p.parse_index("frame_00042.txt.tmp"), None);
        assert_eq!(p.parse_index("frame_00042txt"), None);
        assert_eq!(p.parse_index("frame_0004a.txt"), None);
        assert_eq!(p.parse_index("frame_00042.pgm"), None);
    }

    #[test]
    fn list_orders_by_numeric_index() {
        let tmp = TempDir::new().unwrap();
        for name in [
            "frame_00010.pgm",
            "frame_00002.pgm",
            "frame_00001.pgm",
            "frame_00003.txt",
            "notes.pgm",
            "frame_1.pgm",
        ] {
            touch(tmp.path(), name);
        }
        fs::create_dir(tmp.path().join("frame_00004.pgm")).unwrap();

        let records = list(tmp.path(), &FramePattern::raster());
        let indices: Vec<u32> = records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 10]);
        assert_eq!(records[2].text_path, tmp.path().join("frame_00010.txt"));
        assert_eq!(count(tmp.path(), &FramePattern::text()), 1);
    }

    #[test]
    fn state_follows_filesystem() {
        let tmp = TempDir::new().unwrap();
        let record = FrameRecord::new(tmp.path(), 7);
        assert_eq!(record.state(), FrameState::Missing);
        touch(tmp.path(), "frame_00007.pgm");
        assert_eq!(record.state(), FrameState::Extracted);
        touch(tmp.path(), "frame_00007.txt");
        assert_eq!(record.state(), FrameState::Converted);
        assert_eq!(
            record.path_with_extension("png"),
            tmp.path().join("frame_00007.png")
        );
    }

    #[test]
    fn clear_frames_leaves_other_files() {
        let tmp = TempDir::new().unwrap();
        for name in ["frame_00001.pgm", "frame_00001.txt", "frame_00001.png", "audio.m4a"] {
            touch(tmp.path(), name);
        }
        assert_eq!(clear_frames(tmp.path()).unwrap(), 3);
        assert!(tmp.path().join("audio.m4a").exists());
        assert_eq!(clear_frames(&tmp.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn clear_frames_sweeps_interrupted_writes() {
        let tmp = TempDir::new().unwrap();
        for name in ["frame_00002.txt.tmp", "frame_00002.tmp.png", "frame_00002.pgm", "notes.tmp"] {
            touch(tmp.path(), name);
        }
        assert_eq!(clear_frames(tmp.path()).unwrap(), 3);
        assert!(tmp.path().join("notes.tmp").exists());
        assert!(!tmp.path().join("frame_00002.txt.tmp").exists());
        assert!(!tmp.path().join("frame_00002.tmp.png").exists());
    }
}
