use crate::error::PipelineError;

/// Default dark-to-light ramp.
pub const DEFAULT_PALETTE: &str =
    " .'`^,:;Il!i><~+_-?][}{1)(|/tfjrxnuvczXYUJCLQ0OZmwqpdbkhao*#MW&8%B@$";

/// Ordered glyph table, index 0 darkest, last index brightest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphPalette {
    glyphs: Vec<char>,
}

impl GlyphPalette {
    /// Build a palette from a dark-to-light string. Fewer than two glyphs
    /// carry no brightness information and are rejected.
    pub fn new(glyphs: &str) -> Result<Self, PipelineError> {
        let glyphs: Vec<char> = glyphs.chars().collect();
        if glyphs.len() < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "glyph palette needs at least 2 glyphs, got {}",
                glyphs.len()
            )));
        }
        if glyphs.iter().any(|c| *c == '\n' || *c == '\r') {
            return Err(PipelineError::InvalidConfig(
                "glyph palette must not contain line breaks".to_string(),
            ));
        }
        Ok(Self { glyphs })
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Glyph for a normalized brightness.
    pub fn glyph_for(&self, brightness: f32) -> char {
        self.glyphs[quantize(brightness, self.glyphs.len())]
    }
}

impl Default for GlyphPalette {
    fn default() -> Self {
        Self {
            glyphs: DEFAULT_PALETTE.chars().collect(),
        }
    }
}

/// Map a brightness to a palette index: `floor(b * (n - 1))` with the input
/// clamped to `[0, 1]` and the result clamped to `[0, n - 1]`. NaN maps to 0.
pub fn quantize(brightness: f32, palette_size: usize) -> usize {
    let last = palette_size.saturating_sub(1);
    let b = if brightness.is_nan() {
        0.0
    } else {
        brightness.clamp(0.0, 1.0)
    };
    let idx = (b * last as f32).floor() as usize;
    idx.min(last)
}
