//! Grayscale raster decoding.
//!
//! Frames are extracted as PGM so a frame can be read straight into a
//! brightness matrix: a short header followed by one sample per pixel.
//! Per-pixel text dumps are never parsed.

use crate::error::DecodeError;

/// Row-major brightness values in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BrightnessMatrix {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl BrightnessMatrix {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.width + col]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks(self.width.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Binary,
    Plain,
}

struct Header {
    encoding: Encoding,
    width: usize,
    height: usize,
    /// `width * height`, checked when the header is parsed
    sample_count: usize,
    max_value: u32,
    /// Offset of the first sample byte (binary) or token (plain).
    data_start: usize,
}

/// Decode a PGM raster into an `expected_width × expected_height` matrix.
///
/// The header's own width is used as the row stride. Entries outside the
/// header's dimensions, or past the end of the available samples, are 0.0
/// so truncated captures at the end of a stream still decode. Only an
/// unparseable header is an error.
pub fn decode(
    raw: &[u8],
    expected_width: usize,
    expected_height: usize,
) -> Result<BrightnessMatrix, DecodeError> {
    let header = parse_header(raw)?;
    let samples = match header.encoding {
        Encoding::Binary => binary_samples(&raw[header.data_start..], &header),
        Encoding::Plain => plain_samples(&raw[header.data_start..], &header),
    };
    let scale = header.max_value as f32;

    let mut values = vec![0.0f32; expected_width * expected_height];
    for row in 0..expected_height.min(header.height) {
        for col in 0..expected_width.min(header.width) {
            if let Some(&sample) = samples.get(row * header.width + col) {
                values[row * expected_width + col] = (sample as f32 / scale).clamp(0.0, 1.0);
            }
        }
    }

    Ok(BrightnessMatrix {
        width: expected_width,
        height: expected_height,
        values,
    })
}

/// `(width, height)` from a raster header, without touching the samples.
pub fn dimensions(raw: &[u8]) -> Result<(usize, usize), DecodeError> {
    let header = parse_header(raw)?;
    Ok((header.width, header.height))
}

fn parse_header(raw: &[u8]) -> Result<Header, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }
    let mut pos = 0;
    let magic = next_token(raw, &mut pos).ok_or(DecodeError::TruncatedHeader("magic"))?;
    let encoding = match magic {
        b"P5" => Encoding::Binary,
        b"P2" => Encoding::Plain,
        other => {
            return Err(DecodeError::BadMagic(
                String::from_utf8_lossy(&other[..other.len().min(8)]).into_owned(),
            ))
        }
    };

    let width = header_number(raw, &mut pos, "width")?;
    let height = header_number(raw, &mut pos, "height")?;
    let sample_count = width
        .checked_mul(height)
        .ok_or_else(|| DecodeError::BadHeaderField {
            field: "dimensions",
            value: format!("{}x{}", width, height),
        })?;
    let max_value = header_number(raw, &mut pos, "max value")?;
    if max_value > u16::MAX as usize {
        return Err(DecodeError::BadHeaderField {
            field: "max value",
            value: max_value.to_string(),
        });
    }

    // Exactly one whitespace byte separates the header from binary samples.
    let data_start = match encoding {
        Encoding::Binary => (pos + 1).min(raw.len()),
        Encoding::Plain => pos,
    };

    Ok(Header {
        encoding,
        width,
        height,
        sample_count,
        max_value: max_value as u32,
        data_start,
    })
}

fn header_number(raw: &[u8], pos: &mut usize, field: &'static str) -> Result<usize, DecodeError> {
    let token = next_token(raw, pos).ok_or(DecodeError::TruncatedHeader(field))?;
    let text = std::str::from_utf8(token).ok();
    match text.and_then(|t| t.parse::<usize>().ok()) {
        Some(n) if n > 0 => Ok(n),
        _ => Err(DecodeError::BadHeaderField {
            field,
            value: String::from_utf8_lossy(token).into_owned(),
        }),
    }
}

/// Next whitespace-delimited header token, skipping `#` comments.
fn next_token<'a>(raw: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    loop {
        while *pos < raw.len() && raw[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < raw.len() && raw[*pos] == b'#' {
            while *pos < raw.len() && raw[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
    let start = *pos;
    while *pos < raw.len() && !raw[*pos].is_ascii_whitespace() && raw[*pos] != b'#' {
        *pos += 1;
    }
    (start < *pos).then(|| &raw[start..*pos])
}

fn binary_samples(data: &[u8], header: &Header) -> Vec<u32> {
    let wanted = header.sample_count;
    if header.max_value > 255 {
        data.chunks_exact(2)
            .take(wanted)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]) as u32)
            .collect()
    } else {
        data.iter().take(wanted).map(|b| *b as u32).collect()
    }
}

fn plain_samples(data: &[u8], header: &Header) -> Vec<u32> {
    let wanted = header.sample_count;
    // A malformed token ends the sample stream like a truncation would.
    data.split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
        .map_while(|t| std::str::from_utf8(t).ok()?.parse::<u32>().ok())
        .take(wanted)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p5(width: usize, height: usize, max: u32, samples: &[u8]) -> Vec<u8> {
        let mut raw = format!("P5\n{} {}\n{}\n", width, height, max).into_bytes();
        raw.extend_from_slice(samples);
        raw
    }

    #[test]
    fn decodes_binary_raster() {
        let raw = p5(2, 2, 255, &[0, 255, 51, 102]);
        let m = decode(&raw, 2, 2).unwrap();
        assert_eq!(m.width(), 2);
        assert_eq!(m.height(), 2);
        assert_eq!(m.get(0, 0), 0.0);
        assert_eq!(m.get(0, 1), 1.0);
        assert!((m.get(1, 0) - 0.2).abs() < 1e-6);
        assert!((m.get(1, 1) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn sample_bytes_that_look_like_whitespace_are_data() {
        // 0x0a and 0x20 are valid samples right after the header.
        let raw = p5(2, 1, 255, &[0x0a, 0x20]);
        let m = decode(&raw, 2, 1).unwrap();
        assert!((m.get(0, 0) - 10.0 / 255.0).abs() < 1e-6);
        assert!((m.get(0, 1) - 32.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn decodes_plain_raster_with_comments() {
        let raw = b"P2\n# made by hand\n3 1\n# max\n4\n0 2\n4\n";
        let m = decode(raw, 3, 1).unwrap();
        let row: Vec<f32> = m.rows().next().unwrap().to_vec();
        assert_eq!(row, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn decodes_sixteen_bit_samples() {
        let raw = p5(2, 1, 65535, &[0xff, 0xff, 0x00, 0x00]);
        let m = decode(&raw, 2, 1).unwrap();
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(0, 1), 0.0);
    }

    #[test]
    fn truncated_data_fills_with_zero() {
        let raw = p5(3, 2, 255, &[255, 255, 255, 255]);
        let m = decode(&raw, 3, 2).unwrap();
        assert_eq!(m.get(1, 0), 1.0);
        assert_eq!(m.get(1, 1), 0.0);
        assert_eq!(m.get(1, 2), 0.0);

        let header_only = p5(3, 2, 255, &[]);
        let m = decode(&header_only, 3, 2).unwrap();
        assert!(m.rows().flatten().all(|v| *v == 0.0));
    }

    #[test]
    fn smaller_raster_than_expected_pads_with_zero() {
        let raw = p5(1, 1, 255, &[255]);
        let m = decode(&raw, 2, 2).unwrap();
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(0, 1), 0.0);
        assert_eq!(m.get(1, 1), 0.0);
    }

    #[test]
    fn header_dimensions() {
        assert_eq!(dimensions(&p5(4, 3, 255, &[])), Ok((4, 3)));
        assert!(dimensions(b"P5\n4").is_err());
    }

    #[test]
    fn bad_headers_are_errors() {
        assert_eq!(decode(b"", 1, 1), Err(DecodeError::Empty));
        assert!(matches!(decode(b"P6\n1 1\n255\n\0\0\0", 1, 1), Err(DecodeError::BadMagic(_))));
        assert!(matches!(decode(b"this is not a raster", 1, 1), Err(DecodeError::BadMagic(_))));
        assert_eq!(decode(b"P5\n2 2\n", 2, 2), Err(DecodeError::TruncatedHeader("max value")));
        assert!(matches!(
            decode(b"P5\n2 x\n255\n", 2, 2),
            Err(DecodeError::BadHeaderField { field: "height", .. })
        ));
        assert!(matches!(
            decode(b"P5\n2 2\n0\n", 2, 2),
            Err(DecodeError::BadHeaderField { field: "max value", .. })
        ));
    }

    #[test]
    fn oversized_dimensions_are_errors() {
        let huge = b"P5\n4294967296 4294967296\n255\n\0\0\0\0";
        assert!(matches!(decode(huge, 2, 2), Err(DecodeError::BadHeaderField { .. })));
        assert!(dimensions(huge).is_err());

        let plain = format!("P2\n{} 2\n255\n0 0\n", usize::MAX);
        assert!(matches!(
            decode(plain.as_bytes(), 2, 2),
            Err(DecodeError::BadHeaderField { field: "dimensions", .. })
        ));
    }

    #[test]
    fn wide_header_with_few_samples_still_decodes() {
        let mut raw = format!("P5\n{} 1\n255\n", u32::MAX).into_bytes();
        raw.extend_from_slice(&[255, 0]);
        let m = decode(&raw, 2, 1).unwrap();
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(0, 1), 0.0);
    }
}
