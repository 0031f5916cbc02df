use serde::{Deserialize, Serialize};

/// Width of the rendered progress bar, in cells.
pub const BAR_WIDTH: usize = 50;

/// Represents the current phase of a conversion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Extracting raster frames with ffmpeg
    ExtractingFrames,
    /// Extracting the audio track
    ExtractingAudio,
    /// Decoding rasters into glyph text frames
    ConvertingFrames,
    /// Rendering text frames back into images
    RenderingFrames,
    /// Encoding the final video
    Muxing,
    /// Run finished
    Complete,
}

impl ProgressPhase {
    pub fn label(&self) -> &'static str {
        match self {
            ProgressPhase::ExtractingFrames => "Extracting frames",
            ProgressPhase::ExtractingAudio => "Extracting audio",
            ProgressPhase::ConvertingFrames => "Converting frames",
            ProgressPhase::RenderingFrames => "Rendering frames",
            ProgressPhase::Muxing => "Muxing video",
            ProgressPhase::Complete => "Complete",
        }
    }
}

/// Progress information handed to the caller's callback.
///
/// Batched phases emit one of these per batch boundary; the other phases
/// emit one when they start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: ProgressPhase,
    /// Items completed in the current phase
    pub completed: usize,
    /// Items in the current phase (0 if indeterminate)
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    pub message: String,
}

impl Progress {
    /// A phase with no countable items.
    pub fn started(phase: ProgressPhase) -> Self {
        Self {
            phase,
            completed: 0,
            total: 0,
            percentage: 0.0,
            message: format!("{}...", phase.label()),
        }
    }

    pub fn batch(phase: ProgressPhase, completed: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self {
            phase,
            completed,
            total,
            percentage,
            message: format!("{} {} of {}", phase.label(), completed, total),
        }
    }

    pub fn complete(total_frames: usize) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            completed: total_frames,
            total: total_frames,
            percentage: 100.0,
            message: format!("Conversion complete: {} frames", total_frames),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

/// `floor(done / total * width)`, capped at `width`.
pub fn filled_cells(done: usize, total: usize, width: usize) -> usize {
    if total == 0 {
        return 0;
    }
    (done.min(total) * width) / total
}

/// `floor(done / total * 100)`.
pub fn percent(done: usize, total: usize) -> usize {
    filled_cells(done, total, 100)
}

/// `[#####-----]  50%` style bar.
pub fn render_bar(done: usize, total: usize, width: usize) -> String {
    let filled = filled_cells(done, total, width);
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(width - filled),
        percent(done, total)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_cells_floor() {
        assert_eq!(filled_cells(0, 3, 50), 0);
        assert_eq!(filled_cells(1, 3, 50), 16);
        assert_eq!(filled_cells(2, 3, 50), 33);
        assert_eq!(filled_cells(3, 3, 50), 50);
        assert_eq!(filled_cells(9, 3, 50), 50);
        assert_eq!(filled_cells(1, 0, 50), 0);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(199, 200), 99);
    }

    #[test]
    fn rendered_bar() {
        assert_eq!(render_bar(1, 2, 10), "[#####-----]  50%");
        assert_eq!(render_bar(2, 2, 4), "[####] 100%");
        assert_eq!(render_bar(0, 0, 2), "[--]   0%");
    }

    #[test]
    fn progress_values() {
        let p = Progress::batch(ProgressPhase::ConvertingFrames, 50, 200);
        assert_eq!(p.percentage, 25.0);
        assert!(!p.is_finished());
        assert!(Progress::batch(ProgressPhase::RenderingFrames, 200, 200).is_finished());
        assert_eq!(Progress::started(ProgressPhase::Muxing).message, "Muxing video...");
        assert_eq!(Progress::complete(4).completed, 4);
    }
}
