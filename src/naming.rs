//! Segment filename / extension computation (§4.7).
//!
//! Segment `n` maps to an extension that cycles `01..99` then `AA..ZZ` for
//! the first letter pair, carrying into the leading character once the
//! two-letter space is exhausted. v2 inserts an `x` before the number
//! (`Ex01`, `Lx01`, …). The maximum representable segment number for the
//! three-character v1 tail is 14971 (`ZZZ`); one past that is a hard error,
//! matching the bound real EnCase/libewf installs enforce.

use crate::error::{EwfError, Result};
use crate::format::SegmentNaming;

/// Computes the filename extension for `segment_number` (1-based) under the
/// given naming schema.
pub fn segment_extension(segment_number: u16, schema: SegmentNaming) -> Result<String> {
    if segment_number == 0 {
        return Err(EwfError::InvalidArgument {
            reason: "segment numbers are 1-based".into(),
        });
    }

    if schema == SegmentNaming::Delta {
        if segment_number > 99 {
            return Err(EwfError::InvalidArgument {
                reason: "delta segment numbers are limited to 1..99".into(),
            });
        }
        return Ok(format!("d{segment_number:02}"));
    }

    let (first_char, base_char, last_char, infix): (u32, u32, u32, &str) = match schema {
        SegmentNaming::E01UpperCase => (b'E' as u32, b'A' as u32, b'Z' as u32, ""),
        SegmentNaming::E01LowerCase => (b'e' as u32, b'a' as u32, b'z' as u32, ""),
        SegmentNaming::L01UpperCase => (b'L' as u32, b'A' as u32, b'Z' as u32, ""),
        SegmentNaming::Ex01 => (b'E' as u32, b'A' as u32, b'Z' as u32, "x"),
        SegmentNaming::Lx01 => (b'L' as u32, b'A' as u32, b'Z' as u32, "x"),
        SegmentNaming::Delta => unreachable!("Delta is handled by the early return above"),
    };

    let mut extension = [0u32; 3];
    if segment_number < 100 {
        extension[2] = b'0' as u32 + (segment_number % 10) as u32;
        extension[1] = b'0' as u32 + (segment_number / 10) as u32;
        extension[0] = first_char;
    } else {
        let mut n = (segment_number as u32) - 100;
        extension[2] = base_char + (n % 26);
        n /= 26;
        extension[1] = base_char + (n % 26);
        n /= 26;
        extension[0] = first_char + n;
    }

    if extension[0] > last_char {
        return Err(EwfError::InvalidArgument {
            reason: format!(
                "segment number {} exceeds the maximum for this naming schema",
                segment_number
            ),
        });
    }

    let tail: String = extension
        .iter()
        .map(|&c| char::from_u32(c).expect("ascii range"))
        .collect();
    // v1: "E01". v2: the `x` infix sits right after the leading letter,
    // ahead of the cycling digits/letters ("Ex01", not "xE01").
    let mut chars = tail.chars();
    let leading = chars.next().expect("tail always has 3 chars");
    let rest: String = chars.collect();
    Ok(format!("{}{}{}", leading, infix, rest))
}

/// Builds the full segment filename given the base path (without
/// extension), the segment number, and the naming schema.
pub fn segment_filename(base: &str, segment_number: u16, schema: SegmentNaming) -> Result<String> {
    Ok(format!(
        "{}.{}",
        base,
        segment_extension(segment_number, schema)?
    ))
}

/// Delta-segment filenames always use the lowercase `.d01, .d02, …` chain
/// regardless of the primary image's naming schema (§4.8).
pub fn delta_segment_filename(base: &str, segment_number: u16) -> Result<String> {
    if segment_number == 0 || segment_number > 99 {
        return Err(EwfError::InvalidArgument {
            reason: "delta segment numbers are limited to 1..99".into(),
        });
    }
    Ok(format!("{}.d{:02}", base, segment_number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_cycles_like_reference_implementation() {
        // Cross-checked against libewf/keramics test vectors.
        assert_eq!(segment_extension(1, SegmentNaming::E01UpperCase).unwrap(), "E01");
        assert_eq!(segment_extension(99, SegmentNaming::E01UpperCase).unwrap(), "E99");
        assert_eq!(segment_extension(100, SegmentNaming::E01UpperCase).unwrap(), "EAA");
        assert_eq!(segment_extension(125, SegmentNaming::E01UpperCase).unwrap(), "EAZ");
        assert_eq!(segment_extension(126, SegmentNaming::E01UpperCase).unwrap(), "EBA");
        assert_eq!(segment_extension(776, SegmentNaming::E01UpperCase).unwrap(), "FAA");
        assert_eq!(segment_extension(14296, SegmentNaming::E01UpperCase).unwrap(), "ZAA");
        assert_eq!(segment_extension(14971, SegmentNaming::E01UpperCase).unwrap(), "ZZZ");
        assert!(segment_extension(14972, SegmentNaming::E01UpperCase).is_err());
    }

    #[test]
    fn lowercase_and_logical_schemas() {
        assert_eq!(segment_extension(1, SegmentNaming::E01LowerCase).unwrap(), "e01");
        assert_eq!(segment_extension(1, SegmentNaming::L01UpperCase).unwrap(), "L01");
    }

    #[test]
    fn v2_schemas_insert_x_infix_after_leading_letter() {
        assert_eq!(segment_extension(1, SegmentNaming::Ex01).unwrap(), "Ex01");
        assert_eq!(segment_extension(100, SegmentNaming::Ex01).unwrap(), "ExAA");
        assert_eq!(segment_extension(1, SegmentNaming::Lx01).unwrap(), "Lx01");
    }

    #[test]
    fn rejects_segment_zero() {
        assert!(segment_extension(0, SegmentNaming::E01UpperCase).is_err());
    }

    #[test]
    fn delta_filenames_are_lowercase_d() {
        assert_eq!(delta_segment_filename("case", 1).unwrap(), "case.d01");
        assert_eq!(delta_segment_filename("case", 9).unwrap(), "case.d09");
        assert!(delta_segment_filename("case", 100).is_err());
    }
}
