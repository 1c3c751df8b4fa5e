//! Presentation metadata derived from device format reports, plus the
//! stride policy for plane copies.

use std::fmt;

use crate::decode::buffer::FieldParity;
use crate::device::{AspectCode, TimingCode};

/// Rational frame rate, kept exact so NTSC-style `N*1000/1001` cadences
/// survive into the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Field rate to whole-frame rate.
    fn halved(self) -> Self {
        if self.num % 2 == 0 {
            Self::new(self.num / 2, self.den)
        } else {
            Self::new(self.num, self.den * 2)
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Nominal rate and interlace flag for a device timing code.
///
/// Interlaced codes report the field rate; the returned rate is already
/// halved to the whole-frame rate.
pub fn derive_frame_rate(code: TimingCode) -> (Rational, bool) {
    use TimingCode::*;

    let (rate, interlaced) = match code {
        Sd480p0 => (Rational::new(60, 1), false),
        Sd576p0 => (Rational::new(25, 1), false),
        Hd720p0 => (Rational::new(60, 1), false),
        Hd1080p0 => (Rational::new(24_000, 1001), false),
        Sd480i0 => (Rational::new(60_000, 1001), true),
        Hd1080i0 => (Rational::new(60_000, 1001), true),
        Hd1080p2397 => (Rational::new(24_000, 1001), false),
        Hd1080p2997 => (Rational::new(30_000, 1001), false),
        Hd1080p30 => (Rational::new(30, 1), false),
        Hd1080p24 => (Rational::new(24, 1), false),
        Hd1080p25 => (Rational::new(25, 1), false),
        Hd1080i2997 => (Rational::new(60_000, 1001), true),
        Hd1080i25 => (Rational::new(50, 1), true),
        Hd1080i => (Rational::new(60_000, 1001), true),
        Hd720p5994 => (Rational::new(60_000, 1001), false),
        Hd720p50 => (Rational::new(50, 1), false),
        Hd720p => (Rational::new(60, 1), false),
        Hd720p2397 => (Rational::new(24_000, 1001), false),
        // the device publishes 25 for this code
        Hd720p24 => (Rational::new(25, 1), false),
        Hd720p2997 => (Rational::new(30_000, 1001), false),
        Sd480i => (Rational::new(60_000, 1001), true),
        SdNtsc => (Rational::new(60, 1), true),
        Sd480p => (Rational::new(60, 1), false),
        SdPal1 => (Rational::new(50, 1), true),
        Sd480p2397 => (Rational::new(24_000, 1001), false),
        Sd480p2997 => (Rational::new(30_000, 1001), false),
        Sd576p25 => (Rational::new(25, 1), false),
        Other => (Rational::new(24_000, 1001), false),
    };

    if interlaced {
        (rate.halved(), true)
    } else {
        (rate, false)
    }
}

/// Display aspect ratio for a device aspect code. The `Other` code carries
/// its ratio packed into one 32-bit field: low 16 bits = width, high 16
/// bits = height. Unknown or zero ratios fall back to square.
pub fn aspect_ratio(code: AspectCode, custom: u32) -> (u16, u16) {
    use AspectCode::*;

    let (x, y) = match code {
        Square => (1, 1),
        R12x11 => (12, 11),
        R10x11 => (10, 11),
        R16x11 => (16, 11),
        R40x33 => (40, 33),
        R24x11 => (24, 11),
        R20x11 => (20, 11),
        R32x11 => (32, 11),
        R80x33 => (80, 33),
        R18x11 => (18, 11),
        R15x11 => (15, 11),
        R64x33 => (64, 33),
        R160x99 => (160, 99),
        R4x3 => (4, 3),
        R16x9 => (16, 9),
        R221x1 => (221, 1),
        Unknown => (0, 0),
        Other => ((custom & 0xffff) as u16, (custom >> 16) as u16),
    };

    if x == 0 {
        (1, 1)
    } else {
        (x, y)
    }
}

/// The device reports 1088 lines for 1080p content; clamp before sizing
/// buffers or deriving metadata.
pub fn normalize_height(height: u32) -> u32 {
    if height == 1088 {
        1080
    } else {
        height
    }
}

/// Source widths the device hands back as contiguous planes. Anything else
/// arrives with its stride quantized up to the next entry.
const CANONICAL_WIDTHS: [u32; 3] = [720, 1280, 1920];

/// How to copy a returned plane into a picture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Source is contiguous at the picture width.
    Packed,
    /// Source rows are padded to the contained stride; copy row by row at
    /// the true destination width.
    Quantized(u32),
}

/// Stride policy lookup by picture width.
pub fn copy_mode(width: u32) -> CopyMode {
    if CANONICAL_WIDTHS.contains(&width) {
        return CopyMode::Packed;
    }
    let stride = CANONICAL_WIDTHS
        .iter()
        .copied()
        .find(|&canonical| width < canonical)
        .unwrap_or(1920);
    CopyMode::Quantized(stride)
}

/// Copy one progressive plane of `rows` lines of `width` bytes.
pub fn copy_plane(dst: &mut [u8], src: &[u8], width: usize, rows: usize, mode: CopyMode) {
    match mode {
        CopyMode::Packed => {
            let len = width * rows;
            dst[..len].copy_from_slice(&src[..len]);
        }
        CopyMode::Quantized(stride) => {
            let stride = stride as usize;
            for row in 0..rows {
                let s = row * stride;
                let d = row * width;
                dst[d..d + width].copy_from_slice(&src[s..s + width]);
            }
        }
    }
}

/// Weave one half-height field into a full-height plane: destination lines
/// are interleaved at twice the width, with the odd field starting one
/// line in.
pub fn copy_field_plane(
    dst: &mut [u8],
    src: &[u8],
    width: usize,
    field_rows: usize,
    parity: FieldParity,
) {
    let stride = width * 2;
    let mut s = 0;
    let mut d = if parity == FieldParity::Odd { width } else { 0 };
    for _ in 0..field_rows {
        dst[d..d + width].copy_from_slice(&src[s..s + width]);
        s += width;
        d += stride;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_widths_are_packed() {
        assert_eq!(copy_mode(720), CopyMode::Packed);
        assert_eq!(copy_mode(1280), CopyMode::Packed);
        assert_eq!(copy_mode(1920), CopyMode::Packed);
    }

    #[test]
    fn stride_quantizes_to_next_canonical_width() {
        assert_eq!(copy_mode(704), CopyMode::Quantized(720));
        assert_eq!(copy_mode(64), CopyMode::Quantized(720));
        assert_eq!(copy_mode(960), CopyMode::Quantized(1280));
        assert_eq!(copy_mode(1440), CopyMode::Quantized(1920));
        assert_eq!(copy_mode(2000), CopyMode::Quantized(1920));
    }

    #[test]
    fn quantized_copy_uses_wide_source_rows() {
        // width 704 arrives padded to a 720-byte source stride
        let width = 704usize;
        let rows = 4usize;
        let stride = 720usize;
        let mut src = vec![0u8; stride * rows];
        for row in 0..rows {
            for col in 0..stride {
                src[row * stride + col] = (row * 7 + col) as u8;
            }
        }
        let mut dst = vec![0u8; width * rows];
        copy_plane(&mut dst, &src, width, rows, copy_mode(width as u32));
        for row in 0..rows {
            assert_eq!(
                &dst[row * width..(row + 1) * width],
                &src[row * stride..row * stride + width],
            );
        }
    }

    #[test]
    fn field_copy_interleaves_lines() {
        let width = 8usize;
        let field_rows = 3usize;
        let src_even = vec![0xEEu8; width * field_rows];
        let src_odd = vec![0xDDu8; width * field_rows];
        let mut dst = vec![0u8; width * field_rows * 2];

        copy_field_plane(&mut dst, &src_even, width, field_rows, FieldParity::Even);
        copy_field_plane(&mut dst, &src_odd, width, field_rows, FieldParity::Odd);

        for line in 0..field_rows * 2 {
            let expected = if line % 2 == 0 { 0xEE } else { 0xDD };
            assert!(dst[line * width..(line + 1) * width]
                .iter()
                .all(|&b| b == expected));
        }
    }

    #[test]
    fn interlaced_rates_are_halved() {
        let (rate, interlaced) = derive_frame_rate(TimingCode::Hd1080i2997);
        assert!(interlaced);
        assert_eq!(rate, Rational::new(30_000, 1001));

        let (rate, interlaced) = derive_frame_rate(TimingCode::SdPal1);
        assert!(interlaced);
        assert_eq!(rate, Rational::new(25, 1));
    }

    #[test]
    fn progressive_rates_pass_through() {
        let (rate, interlaced) = derive_frame_rate(TimingCode::Hd1080p2397);
        assert!(!interlaced);
        assert_eq!(rate, Rational::new(24_000, 1001));

        let (rate, _) = derive_frame_rate(TimingCode::Sd576p25);
        assert_eq!(rate, Rational::new(25, 1));
    }

    #[test]
    fn unlisted_timing_gets_the_default_rate() {
        let (rate, interlaced) = derive_frame_rate(TimingCode::Other);
        assert!(!interlaced);
        assert_eq!(rate, Rational::new(24_000, 1001));
    }

    #[test]
    fn standard_aspect_codes() {
        assert_eq!(aspect_ratio(AspectCode::R16x9, 0), (16, 9));
        assert_eq!(aspect_ratio(AspectCode::R221x1, 0), (221, 1));
    }

    #[test]
    fn custom_aspect_unpacks_both_halves() {
        let packed = (9u32 << 16) | 16;
        assert_eq!(aspect_ratio(AspectCode::Other, packed), (16, 9));
    }

    #[test]
    fn unresolved_aspect_defaults_to_square() {
        assert_eq!(aspect_ratio(AspectCode::Unknown, 0), (1, 1));
        assert_eq!(aspect_ratio(AspectCode::Other, 9 << 16), (1, 1));
    }

    #[test]
    fn height_quirk_is_clamped() {
        assert_eq!(normalize_height(1088), 1080);
        assert_eq!(normalize_height(1080), 1080);
        assert_eq!(normalize_height(720), 720);
    }
}
