//! Wire-format version detection.
//!
//! EWF exists in two incarnations on disk (classic `EVF` and the newer
//! `EVF2`), plus sibling signatures for the logical-evidence (`LVF`) and
//! SMART/EnCase-legacy (`S01`) variants that share the v1 section grammar.
//! Everything downstream of [`FormatVersion`] is written against a single
//! `SectionHeader` view (see [`crate::section`]), so the version only
//! matters at the outermost decoder.

use crate::error::{EwfError, Result};

pub const EWF_V1_SIGNATURE: [u8; 8] = *b"EVF\x09\x0d\x0a\xff\x00";
pub const EWF_V1_LOGICAL_SIGNATURE: [u8; 8] = *b"LVF\x09\x0d\x0a\xff\x00";
pub const EWF_V2_SIGNATURE: [u8; 8] = *b"EVF2\x0d\x0a\x81\x00";

/// Upstream also recognizes the legacy SMART signature (same bytes as the
/// standard EWF one except a different first byte on the `MVF`/`SVF`
/// family); this dispatches identically to v1 since the section grammar is
/// unchanged.
pub const EWF_V1_SMART_SIGNATURE: [u8; 8] = *b"SVF\x09\x0d\x0a\xff\x00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Physical,
    Logical,
}

pub struct DetectedFormat {
    pub version: FormatVersion,
    pub media_kind: MediaKind,
}

/// Reads the 8-byte magic and dispatches to the appropriate decoder plan.
pub fn detect(magic: &[u8; 8]) -> Result<DetectedFormat> {
    if *magic == EWF_V1_SIGNATURE || *magic == EWF_V1_SMART_SIGNATURE {
        return Ok(DetectedFormat {
            version: FormatVersion::V1,
            media_kind: MediaKind::Physical,
        });
    }
    if *magic == EWF_V1_LOGICAL_SIGNATURE {
        return Ok(DetectedFormat {
            version: FormatVersion::V1,
            media_kind: MediaKind::Logical,
        });
    }
    if *magic == EWF_V2_SIGNATURE {
        return Ok(DetectedFormat {
            version: FormatVersion::V2,
            media_kind: MediaKind::Physical,
        });
    }
    Err(EwfError::UnsupportedFormat {
        reason: format!("unrecognized magic bytes {:02x?}", magic),
    })
}

/// Format variant for naming and segment-number bounds (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentNaming {
    /// `.E01 .. .E99, .EAA .. .ZZZ` (v1 physical)
    E01UpperCase,
    /// `.e01 .. .zzz` (v1 physical, lowercase variant)
    E01LowerCase,
    /// `.L01 ..` (v1 logical evidence)
    L01UpperCase,
    /// `.Ex01 ..` (v2 physical)
    Ex01,
    /// `.Lx01 ..` (v2 logical evidence)
    Lx01,
    /// `.d01 .. .d99` (delta overlay chain, §4.8; always lowercase `d`
    /// regardless of the primary image's own naming schema).
    Delta,
}

impl SegmentNaming {
    pub fn from_version(version: FormatVersion, media_kind: MediaKind) -> Self {
        match (version, media_kind) {
            (FormatVersion::V1, MediaKind::Physical) => SegmentNaming::E01UpperCase,
            (FormatVersion::V1, MediaKind::Logical) => SegmentNaming::L01UpperCase,
            (FormatVersion::V2, MediaKind::Physical) => SegmentNaming::Ex01,
            (FormatVersion::V2, MediaKind::Logical) => SegmentNaming::Lx01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_v1() {
        let d = detect(&EWF_V1_SIGNATURE).unwrap();
        assert_eq!(d.version, FormatVersion::V1);
        assert_eq!(d.media_kind, MediaKind::Physical);
    }

    #[test]
    fn detects_v2() {
        let d = detect(&EWF_V2_SIGNATURE).unwrap();
        assert_eq!(d.version, FormatVersion::V2);
    }

    #[test]
    fn rejects_garbage() {
        assert!(detect(&[0u8; 8]).is_err());
    }
}
