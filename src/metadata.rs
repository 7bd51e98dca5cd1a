//! The metadata store: header values, hash values, acquisition error ranges,
//! and optical sessions/tracks (§3, §4.2, §4.10).
//!
//! The `header`/`header2`/`xheader` parser is adapted from the teacher's
//! `EwfHeaderSection` decoder: decode as ASCII first, fall back to UTF-16LE,
//! then find the first two consecutive tab-separated lines and zip them
//! into a key/value map. `xheader` additionally accepts UTF-8 directly
//! (v2-only).

use std::collections::HashMap;
use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{EwfError, Result};

#[derive(Debug, Clone, Default)]
pub struct SectorRange {
    pub first_sector: u64,
    pub sector_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub first_sector: u64,
    pub sector_count: u64,
    pub flags: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Track {
    pub first_sector: u64,
    pub sector_count: u64,
}

/// Canonical display order and labels for well-known header identifiers,
/// matching the teacher's `print_info` convention.
pub const HEADER_KEY_ORDER: &[&str] = &[
    "c", "cn", "n", "en", "a", "e", "ex", "t", "nt", "av", "ov", "m", "u", "p", "r",
];

pub fn pretty_header_key(id: &str) -> &str {
    match id {
        "c" | "cn" => "Case Number",
        "n" | "en" => "Evidence Number",
        "a" => "Description",
        "e" | "ex" => "Examiner",
        "t" | "nt" => "Notes",
        "av" => "Application Version",
        "ov" => "OS Version",
        "m" => "Acquisition Date",
        "u" => "System Date",
        "p" => "Password Hash",
        "r" => "Reserved",
        _ => id,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    pub header_values: HashMap<String, String>,
    pub hash_values: HashMap<String, Vec<u8>>,
    pub acquisition_errors: Vec<SectorRange>,
    pub sessions: Vec<Session>,
    pub tracks: Vec<Track>,
}

impl MetadataStore {
    /// Merges a freshly decoded header/header2/xheader table into the
    /// store. header2 (UTF-16) and xheader (UTF-8, v2) values win over a
    /// plain ASCII `header` on key collision, per the format's own
    /// precedence (later sections refine earlier ones).
    pub fn merge_header_values(&mut self, values: HashMap<String, String>) {
        self.header_values.extend(values);
    }

    pub fn insert_hash(&mut self, algorithm: &str, digest: Vec<u8>) {
        self.hash_values.insert(algorithm.to_string(), digest);
    }
}

/// Builds a `hash` section payload from a 16-byte MD5 digest, padding out
/// to the fixed 36-byte layout [`decode_hash_section`] reads back.
pub fn encode_hash_section(md5: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 36];
    let len = md5.len().min(16);
    payload[0..len].copy_from_slice(&md5[..len]);
    payload
}

/// Builds a `digest` section payload from MD5 and/or SHA1 digests, in the
/// fixed 80-byte layout [`decode_digest_section`] reads back. A missing
/// digest is left zeroed rather than shrinking the payload, since the
/// section's two digest slots are fixed-offset regardless of which ones a
/// given run actually computed.
pub fn encode_digest_section(md5: Option<&[u8]>, sha1: Option<&[u8]>) -> Vec<u8> {
    let mut payload = vec![0u8; 80];
    if let Some(md5) = md5 {
        let len = md5.len().min(16);
        payload[0..len].copy_from_slice(&md5[..len]);
    }
    if let Some(sha1) = sha1 {
        let len = sha1.len().min(20);
        payload[16..16 + len].copy_from_slice(&sha1[..len]);
    }
    payload
}

/// Builds an `error2` section payload from acquisition read-error ranges, in
/// the fixed count-prefixed layout [`decode_error2_section`] reads back.
pub fn encode_error2_section(ranges: &[SectorRange]) -> Vec<u8> {
    let mut payload = vec![0u8; 8 + ranges.len() * 8];
    payload[0..4].copy_from_slice(&(ranges.len() as u32).to_le_bytes());
    let mut offset = 8;
    for range in ranges {
        payload[offset..offset + 4].copy_from_slice(&(range.first_sector as u32).to_le_bytes());
        payload[offset + 4..offset + 8]
            .copy_from_slice(&(range.sector_count as u32).to_le_bytes());
        offset += 8;
    }
    payload
}

/// Builds a `session` section payload from optical sessions and tracks, in
/// the fixed count-prefixed layout [`decode_session_section`] reads back.
/// Tracks are distinguished on read-back by setting flag bit 0.
pub fn encode_session_section(sessions: &[Session], tracks: &[Track]) -> Vec<u8> {
    let count = sessions.len() + tracks.len();
    let mut payload = vec![0u8; 28 + count * 16];
    payload[0..4].copy_from_slice(&(count as u32).to_le_bytes());
    let mut offset = 28;
    for session in sessions {
        payload[offset..offset + 4].copy_from_slice(&session.flags.to_le_bytes());
        payload[offset + 4..offset + 8]
            .copy_from_slice(&(session.first_sector as u32).to_le_bytes());
        payload[offset + 8..offset + 12]
            .copy_from_slice(&(session.sector_count as u32).to_le_bytes());
        offset += 16;
    }
    for track in tracks {
        payload[offset..offset + 4].copy_from_slice(&1u32.to_le_bytes());
        payload[offset + 4..offset + 8]
            .copy_from_slice(&(track.first_sector as u32).to_le_bytes());
        payload[offset + 8..offset + 12]
            .copy_from_slice(&(track.sector_count as u32).to_le_bytes());
        offset += 16;
    }
    payload
}

/// Decodes a `hash` section payload: a fixed 16-byte MD5 digest followed by
/// 16 reserved bytes and a 4-byte trailing checksum (36 bytes total).
/// Shorter-than-expected payloads (seen in some SMART-format images) still
/// yield a digest as long as the first 16 bytes are present.
pub fn decode_hash_section(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() < 16 {
        return None;
    }
    Some(payload[0..16].to_vec())
}

/// Decodes a `digest` section payload: MD5 (16 bytes) then SHA1 (20 bytes),
/// followed by reserved padding and a trailing checksum.
pub fn decode_digest_section(payload: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    if payload.len() >= 16 {
        out.push(("MD5".to_string(), payload[0..16].to_vec()));
    }
    if payload.len() >= 36 {
        out.push(("SHA1".to_string(), payload[16..36].to_vec()));
    }
    out
}

/// Decodes an `error2` section payload: a 4-byte entry count, 4 reserved
/// bytes, then that many `{first_sector: u32, sector_count: u32}` entries
/// and a trailing checksum.
pub fn decode_error2_section(payload: &[u8]) -> Vec<SectorRange> {
    if payload.len() < 8 {
        return Vec::new();
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(count);
    let mut offset = 8;
    for _ in 0..count {
        if offset + 8 > payload.len() {
            break;
        }
        let first_sector = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        let sector_count =
            u32::from_le_bytes(payload[offset + 4..offset + 8].try_into().unwrap());
        out.push(SectorRange {
            first_sector: first_sector as u64,
            sector_count: sector_count as u64,
        });
        offset += 8;
    }
    out
}

/// Decodes a `session` section payload: a 4-byte entry count, 24 reserved
/// bytes, then that many 16-byte entries of `{flags: u32, first_sector:
/// u32, sector_count: u32, reserved: u32}`. An entry's low flag bit
/// distinguishes an optical track (set) from a session (clear) — both
/// kinds share this one section in the absence of a separate `track`
/// section in the formats this crate supports.
pub fn decode_session_section(payload: &[u8]) -> (Vec<Session>, Vec<Track>) {
    let mut sessions = Vec::new();
    let mut tracks = Vec::new();
    if payload.len() < 28 {
        return (sessions, tracks);
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let mut offset = 28;
    for _ in 0..count {
        if offset + 16 > payload.len() {
            break;
        }
        let flags = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        let first_sector =
            u32::from_le_bytes(payload[offset + 4..offset + 8].try_into().unwrap()) as u64;
        let sector_count =
            u32::from_le_bytes(payload[offset + 8..offset + 12].try_into().unwrap()) as u64;
        if flags & 1 != 0 {
            tracks.push(Track {
                first_sector,
                sector_count,
            });
        } else {
            sessions.push(Session {
                first_sector,
                sector_count,
                flags,
            });
        }
        offset += 16;
    }
    (sessions, tracks)
}

/// Decodes raw header-section bytes (ASCII first, then UTF-16LE) into a
/// plain string.
fn decode_text(raw: &[u8]) -> String {
    if let Ok(txt) = String::from_utf8(raw.to_vec()) {
        return txt;
    }
    if raw.len() % 2 == 0 {
        let utf16: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if let Ok(txt) = String::from_utf16(&utf16) {
            return txt;
        }
    }
    String::new()
}

fn table_to_map(keys: &str, vals: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (k, v) in keys.split('\t').zip(vals.split('\t')) {
        map.insert(
            k.trim_matches('\0').to_string(),
            v.trim_matches('\0').to_string(),
        );
    }
    map
}

/// Parses the tab-separated key/value table out of a decoded header
/// section, coping with an optional BOM, blank lines, and the
/// one-entry-per-line fallback seen in older images.
pub fn parse_header_table(raw: &[u8]) -> HashMap<String, String> {
    let txt = decode_text(raw);
    let mut lines: Vec<&str> = txt
        .split(['\n', '\r'])
        .filter(|l| !l.trim().is_empty())
        .collect();

    if let Some(first) = lines.first_mut() {
        *first = first.trim_start_matches('\u{FEFF}');
    }

    for i in 0..lines.len().saturating_sub(1) {
        if lines[i].contains('\t') && lines[i + 1].contains('\t') {
            return table_to_map(lines[i], lines[i + 1]);
        }
    }

    let mut map = HashMap::new();
    for l in lines {
        if let Some((k, v)) = l.split_once('\t') {
            map.insert(
                k.trim_matches('\0').to_string(),
                v.trim_matches('\0').to_string(),
            );
        }
    }
    map
}

/// Inflates a zlib-compressed header/header2/xheader payload and parses its
/// key/value table.
pub fn decode_header_section(compressed: &[u8]) -> Result<HashMap<String, String>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut data = Vec::new();
    decoder.read_to_end(&mut data).map_err(|e| EwfError::CorruptSection {
        segment: 0,
        offset: 0,
        section_type: "header".into(),
        reason: format!("could not inflate header section: {e}"),
    })?;
    Ok(parse_header_table(&data))
}

/// Builds the tab-separated, zlib-compressed payload for a `header` section
/// from a flat map, in the canonical key order when possible, falling back
/// to insertion order for unknown keys. This is the write-path inverse of
/// [`decode_header_section`].
pub fn encode_header_section(values: &HashMap<String, String>) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut keys: Vec<&str> = Vec::new();
    for k in HEADER_KEY_ORDER {
        if values.contains_key(*k) {
            keys.push(k);
        }
    }
    for k in values.keys() {
        if !keys.contains(&k.as_str()) {
            keys.push(k.as_str());
        }
    }

    let key_line = keys.join("\t");
    let val_line: Vec<&str> = keys.iter().map(|k| values[*k].as_str()).collect();
    let val_line = val_line.join("\t");

    let text = format!("1\nmain\n{key_line}\n{val_line}\n\n");

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| EwfError::io("header section", e))?;
    encoder
        .finish()
        .map_err(|e| EwfError::io("header section", e))
}
