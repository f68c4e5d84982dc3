//! Raw word decoding and scaling.

use ironview_storage::{DataKind, WordOrder};

/// Decode raw 16-bit words into a numeric value.
///
/// Returns `None` when the slice is shorter than the type's width.
pub fn decode_words(words: &[u16], data_type: DataKind, order: WordOrder) -> Option<f64> {
    match data_type {
        DataKind::Uint16 => words.first().map(|w| *w as f64),
        DataKind::Int16 => words.first().map(|w| *w as i16 as f64),
        DataKind::Bool => words.first().map(|w| f64::from(u8::from(*w != 0))),
        DataKind::Float32 => {
            if words.len() < 2 {
                return None;
            }
            let (high, low) = match order {
                WordOrder::HighFirst => (words[0], words[1]),
                WordOrder::LowFirst => (words[1], words[0]),
            };
            let bits = ((high as u32) << 16) | low as u32;
            Some(f32::from_bits(bits) as f64)
        }
    }
}

/// Apply `raw * scale + offset` in f64.
///
/// A non-finite result is clamped to the signed infinity and flagged so the
/// caller can mark the reading uncertain.
pub fn apply_scaling(raw: f64, scale: f64, offset: f64) -> (f64, bool) {
    let scaled = raw * scale + offset;
    if scaled.is_finite() {
        (scaled, true)
    } else if scaled.is_nan() {
        (f64::INFINITY, false)
    } else {
        (scaled, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint16() {
        assert_eq!(decode_words(&[42], DataKind::Uint16, WordOrder::HighFirst), Some(42.0));
        assert_eq!(
            decode_words(&[65535], DataKind::Uint16, WordOrder::HighFirst),
            Some(65535.0)
        );
    }

    #[test]
    fn test_int16_two_complement() {
        assert_eq!(decode_words(&[0xFFFF], DataKind::Int16, WordOrder::HighFirst), Some(-1.0));
        assert_eq!(decode_words(&[0x8000], DataKind::Int16, WordOrder::HighFirst), Some(-32768.0));
        assert_eq!(decode_words(&[0x7FFF], DataKind::Int16, WordOrder::HighFirst), Some(32767.0));
    }

    #[test]
    fn test_bool() {
        assert_eq!(decode_words(&[0], DataKind::Bool, WordOrder::HighFirst), Some(0.0));
        assert_eq!(decode_words(&[7], DataKind::Bool, WordOrder::HighFirst), Some(1.0));
    }

    #[test]
    fn test_float32_word_orders() {
        // 23.75f32 = 0x41BE0000
        let value = decode_words(&[0x41BE, 0x0000], DataKind::Float32, WordOrder::HighFirst).unwrap();
        assert!((value - 23.75).abs() < 1e-6);

        let swapped = decode_words(&[0x0000, 0x41BE], DataKind::Float32, WordOrder::LowFirst).unwrap();
        assert!((swapped - 23.75).abs() < 1e-6);
    }

    #[test]
    fn test_float32_truncated() {
        assert_eq!(decode_words(&[0x41BE], DataKind::Float32, WordOrder::HighFirst), None);
    }

    #[test]
    fn test_scaling_identity() {
        let (scaled, finite) = apply_scaling(42.0, 1.0, 0.0);
        assert_eq!(scaled, 42.0);
        assert!(finite);
    }

    #[test]
    fn test_scaling_with_factor_and_offset() {
        let (scaled, finite) = apply_scaling(42.0, 2.0, -1.0);
        assert_eq!(scaled, 83.0);
        assert!(finite);
    }

    #[test]
    fn test_scaling_overflow_clamps() {
        let (scaled, finite) = apply_scaling(f64::MAX, f64::MAX, 0.0);
        assert!(scaled.is_infinite());
        assert!(!finite);
    }
}
