//! On-disk marker (record) format.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **Marker header** (little-endian): `size:u32 | crc:u32 | type:u32 | tick:u64`.
//! - `size` is the total marker length including the header, rounded up to
//!   an 8-byte boundary; markers are laid out back to back, so every marker
//!   starts 8-byte aligned.
//! - **Checksum**: `crc32fast` over the complete marker with the `crc`
//!   field temporarily zeroed.
//! - A logfile starts with a `Header` marker whose payload is
//!   `version:u32 | logfile_id:u64`; a sealed logfile ends with an empty
//!   `Footer` marker.
//!
//! On read, a marker is valid iff its size is at least the header size,
//! fits the remaining file, its type is recognized, and its CRC matches.
//! The first invalid marker terminates a logfile's iterable suffix.

use byteorder::{ByteOrder, LittleEndian};

/// Bytes occupied by the fixed marker header.
pub const MARKER_HEADER_SIZE: usize = 20;

/// Marker sizes are rounded up to this boundary.
pub const MARKER_ALIGNMENT: usize = 8;

/// Total size of the header marker at offset 0 of every logfile
/// (header + `version:u32 | logfile_id:u64` payload, aligned).
pub const HEADER_MARKER_SIZE: usize = 32;

/// Total size of the footer marker sealing a logfile (no payload, aligned).
pub const FOOTER_MARKER_SIZE: usize = 24;

/// Current logfile format version, stored in the header marker payload.
pub const FORMAT_VERSION: u32 = 1;

/// Marker type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MarkerKind {
    /// First marker of every logfile.
    Header = 1,
    /// Document write.
    Document = 2,
    /// Document removal.
    Deletion = 3,
    /// Terminal marker of a sealed logfile.
    Footer = 4,
}

impl MarkerKind {
    /// Decode a type tag; `None` for unrecognized values.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Header),
            2 => Some(Self::Document),
            3 => Some(Self::Deletion),
            4 => Some(Self::Footer),
            _ => None,
        }
    }
}

/// Round `len` up to the marker alignment.
pub const fn aligned_len(len: usize) -> usize {
    (len + MARKER_ALIGNMENT - 1) & !(MARKER_ALIGNMENT - 1)
}

/// Total on-disk size of a marker carrying `payload_len` payload bytes.
pub const fn marker_size(payload_len: usize) -> usize {
    aligned_len(MARKER_HEADER_SIZE + payload_len)
}

/// A validated view over one marker inside a mapped logfile.
#[derive(Debug, Clone, Copy)]
pub struct MarkerView<'a> {
    /// Decoded type tag.
    pub kind: MarkerKind,
    /// Tick assigned to the marker's slot.
    pub tick: u64,
    /// Total marker size in bytes (header + payload + padding).
    pub size: u32,
    /// Payload bytes following the header, alignment padding included.
    pub payload: &'a [u8],
}

/// CRC32 of `marker` with the `crc` field treated as zero.
pub fn marker_crc(marker: &[u8]) -> u32 {
    debug_assert!(marker.len() >= MARKER_HEADER_SIZE);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&marker[..4]);
    hasher.update(&[0u8; 4]);
    hasher.update(&marker[8..]);
    hasher.finalize()
}

/// Build a complete marker in `buf`: header fields, payload, zero padding,
/// then the CRC stamp. `buf.len()` must equal `marker_size(payload.len())`.
pub fn encode_into(buf: &mut [u8], kind: MarkerKind, tick: u64, payload: &[u8]) {
    let total = marker_size(payload.len());
    debug_assert_eq!(buf.len(), total);

    LittleEndian::write_u32(&mut buf[0..4], total as u32);
    LittleEndian::write_u32(&mut buf[4..8], 0);
    LittleEndian::write_u32(&mut buf[8..12], kind as u32);
    LittleEndian::write_u64(&mut buf[12..20], tick);
    buf[MARKER_HEADER_SIZE..MARKER_HEADER_SIZE + payload.len()].copy_from_slice(payload);
    for b in &mut buf[MARKER_HEADER_SIZE + payload.len()..] {
        *b = 0;
    }
    stamp_crc(buf);
}

/// Recompute and store the CRC of a fully populated marker. Used after a
/// writer has copied its payload into a reserved slot.
pub fn stamp_crc(marker: &mut [u8]) {
    let crc = marker_crc(marker);
    LittleEndian::write_u32(&mut marker[4..8], crc);
}

/// Try to decode the marker starting at the beginning of `buf`.
///
/// `buf` is the remainder of the file from the marker's offset; validation
/// covers size bounds, alignment, type tag, and CRC. `None` means the
/// position does not hold a valid marker and scanning must stop.
pub fn parse_marker(buf: &[u8]) -> Option<MarkerView<'_>> {
    if buf.len() < MARKER_HEADER_SIZE {
        return None;
    }
    let size = LittleEndian::read_u32(&buf[0..4]) as usize;
    if size < MARKER_HEADER_SIZE || size % MARKER_ALIGNMENT != 0 || size > buf.len() {
        return None;
    }
    let stored_crc = LittleEndian::read_u32(&buf[4..8]);
    let kind = MarkerKind::from_u32(LittleEndian::read_u32(&buf[8..12]))?;
    let tick = LittleEndian::read_u64(&buf[12..20]);

    let marker = &buf[..size];
    if marker_crc(marker) != stored_crc {
        return None;
    }

    Some(MarkerView {
        kind,
        tick,
        size: size as u32,
        payload: &marker[MARKER_HEADER_SIZE..],
    })
}

/// Encode the header marker placed at offset 0 of every logfile.
pub fn encode_header_marker(buf: &mut [u8], logfile_id: u64, tick: u64) {
    let mut payload = [0u8; 12];
    LittleEndian::write_u32(&mut payload[0..4], FORMAT_VERSION);
    LittleEndian::write_u64(&mut payload[4..12], logfile_id);
    encode_into(buf, MarkerKind::Header, tick, &payload);
}

/// Decode the payload of a header marker, returning `(version, logfile_id)`.
pub fn decode_header_payload(payload: &[u8]) -> Option<(u32, u64)> {
    if payload.len() < 12 {
        return None;
    }
    Some((
        LittleEndian::read_u32(&payload[0..4]),
        LittleEndian::read_u64(&payload[4..12]),
    ))
}
