//! Logical evidence mode: the `ltree` section's file/folder hierarchy
//! (§4.9), used by `.L01`/`.Lx01` images instead of a flat sector range.
//!
//! The `ltree` payload is itself a zlib-compressed, UTF-16LE-encoded XML-ish
//! tag stream in the real format; this crate reads the decompressed text
//! and extracts just the fields this toolkit exposes (name, type, logical
//! size, start offset) rather than modeling the full tag grammar, since
//! nothing downstream needs round-trip-faithful XML.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{EwfError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

#[derive(Debug, Clone)]
pub struct LogicalEntry {
    /// Pre-order position in the tree, assigned at decode time. Stable for
    /// the lifetime of one decoded tree; the file-tree API's id-based
    /// lookup (§4.9) is keyed on this rather than a persistent on-disk id,
    /// since the simplified flat encoding this crate reads/writes (see
    /// `DESIGN.md`) carries no id field of its own.
    pub id: usize,
    pub name: String,
    pub kind: EntryKind,
    pub logical_size: u64,
    pub start_offset: u64,
    pub children: Vec<LogicalEntry>,
}

impl LogicalEntry {
    /// Depth-first iteration over this entry and all its descendants.
    pub fn walk(&self) -> LogicalWalk<'_> {
        LogicalWalk { stack: vec![self] }
    }

    /// Name-based child lookup (§4.9), one level deep.
    pub fn child(&self, name: &str) -> Option<&LogicalEntry> {
        self.children.iter().find(|c| c.name == name)
    }

    /// UTF-16 readback of this entry's name, for callers presenting it
    /// through a UTF-16 API (e.g. a Windows-facing mount adapter).
    pub fn name_utf16(&self) -> Vec<u16> {
        self.name.encode_utf16().collect()
    }
}

/// The decoded `ltree` file tree for one logical-evidence image (§4.9).
#[derive(Debug, Clone, Default)]
pub struct LogicalTree {
    pub roots: Vec<LogicalEntry>,
}

impl LogicalTree {
    /// Depth-first iteration over every entry in the tree, roots first.
    pub fn walk(&self) -> impl Iterator<Item = &LogicalEntry> {
        self.roots.iter().flat_map(|r| r.walk())
    }

    /// Id-based lookup (§4.9), searching the whole tree.
    pub fn by_id(&self, id: usize) -> Option<&LogicalEntry> {
        self.walk().find(|e| e.id == id)
    }

    /// Name-based lookup among the top-level entries.
    pub fn root_child(&self, name: &str) -> Option<&LogicalEntry> {
        self.roots.iter().find(|e| e.name == name)
    }
}

pub struct LogicalWalk<'a> {
    stack: Vec<&'a LogicalEntry>,
}

impl<'a> Iterator for LogicalWalk<'a> {
    type Item = &'a LogicalEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// Decompresses an `ltree` section payload and decodes its UTF-16LE text.
fn inflate_utf16(compressed: &[u8]) -> Result<String> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| EwfError::CorruptSection {
            segment: 0,
            offset: 0,
            section_type: "ltree".into(),
            reason: format!("could not inflate ltree section: {e}"),
        })?;

    if raw.len() % 2 != 0 {
        raw.pop();
    }
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| EwfError::CorruptSection {
        segment: 0,
        offset: 0,
        section_type: "ltree".into(),
        reason: "ltree text is not valid UTF-16".into(),
    })
}

/// A single flat record as it appears, one per line, in the simplified
/// tab-separated `ltree` encoding this crate writes and reads:
/// `depth\tkind\tname\tlogical_size\tstart_offset`.
///
/// Real-world `ltree` payloads carry a richer per-platform attribute set
/// (NTFS/FAT timestamps, permissions); those are out of scope here and are
/// dropped on decode rather than modeled.
fn parse_flat_records(text: &str) -> Result<Vec<(usize, EntryKind, String, u64, u64)>> {
    let mut records = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 5 {
            return Err(EwfError::CorruptSection {
                segment: 0,
                offset: 0,
                section_type: "ltree".into(),
                reason: format!("malformed ltree record: {line:?}"),
            });
        }
        let depth: usize = fields[0].parse().map_err(|_| EwfError::CorruptSection {
            segment: 0,
            offset: 0,
            section_type: "ltree".into(),
            reason: "non-numeric depth field".into(),
        })?;
        let kind = match fields[1] {
            "f" => EntryKind::File,
            "d" => EntryKind::Folder,
            other => {
                return Err(EwfError::CorruptSection {
                    segment: 0,
                    offset: 0,
                    section_type: "ltree".into(),
                    reason: format!("unknown entry kind tag {other:?}"),
                })
            }
        };
        let name = fields[2].to_string();
        let logical_size: u64 = fields[3].parse().unwrap_or(0);
        let start_offset: u64 = fields[4].parse().unwrap_or(0);
        records.push((depth, kind, name, logical_size, start_offset));
    }
    Ok(records)
}

/// Rebuilds the nested tree from the flat, depth-prefixed record list,
/// assigning each entry a pre-order id as it's built.
fn build_tree(records: Vec<(usize, EntryKind, String, u64, u64)>) -> Vec<LogicalEntry> {
    fn recurse(
        records: &[(usize, EntryKind, String, u64, u64)],
        pos: &mut usize,
        next_id: &mut usize,
        depth: usize,
    ) -> Vec<LogicalEntry> {
        let mut out = Vec::new();
        while *pos < records.len() && records[*pos].0 == depth {
            let (_, kind, name, logical_size, start_offset) = records[*pos].clone();
            let id = *next_id;
            *next_id += 1;
            *pos += 1;
            let children = if *pos < records.len() && records[*pos].0 > depth {
                recurse(records, pos, next_id, depth + 1)
            } else {
                Vec::new()
            };
            out.push(LogicalEntry {
                id,
                name,
                kind,
                logical_size,
                start_offset,
                children,
            });
        }
        out
    }

    let mut pos = 0;
    let mut next_id = 0;
    recurse(&records, &mut pos, &mut next_id, 0)
}

/// Decodes a compressed `ltree` section payload into a [`LogicalTree`].
pub fn decode_ltree(compressed: &[u8]) -> Result<LogicalTree> {
    let text = inflate_utf16(compressed)?;
    let records = parse_flat_records(&text)?;
    Ok(LogicalTree {
        roots: build_tree(records),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn utf16le_zlib(text: &str) -> Vec<u8> {
        let units: Vec<u8> = text
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&units).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decodes_nested_tree() {
        let text = "0\td\troot\t0\t0\n1\tf\ta.txt\t10\t0\n1\td\tsub\t0\t0\n2\tf\tb.txt\t20\t10\n";
        let compressed = utf16le_zlib(text);
        let tree = decode_ltree(&compressed).unwrap();
        assert_eq!(tree.roots.len(), 1);
        assert_eq!(tree.roots[0].name, "root");
        assert_eq!(tree.roots[0].children.len(), 2);
        assert_eq!(tree.roots[0].children[1].children[0].name, "b.txt");

        let names: Vec<&str> = tree.roots[0].walk().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"b.txt"));
    }

    #[test]
    fn looks_up_children_by_name_and_id() {
        let text = "0\td\troot\t0\t0\n1\tf\ta.txt\t10\t0\n1\td\tsub\t0\t0\n2\tf\tb.txt\t20\t10\n";
        let compressed = utf16le_zlib(text);
        let tree = decode_ltree(&compressed).unwrap();

        assert_eq!(tree.root_child("root").unwrap().name, "root");
        assert!(tree.root_child("nope").is_none());

        let root = &tree.roots[0];
        assert_eq!(root.child("sub").unwrap().name, "sub");
        assert_eq!(root.child("a.txt").unwrap().logical_size, 10);

        let b = root.child("sub").unwrap().child("b.txt").unwrap();
        assert_eq!(b.start_offset, 10);
        assert_eq!(tree.by_id(b.id).unwrap().name, "b.txt");
        assert_eq!(b.name_utf16(), "b.txt".encode_utf16().collect::<Vec<_>>());
    }

    #[test]
    fn rejects_malformed_record() {
        let compressed = utf16le_zlib("not\tenough\tfields\n");
        assert!(decode_ltree(&compressed).is_err());
    }
}
