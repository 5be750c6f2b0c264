//! Format Detection and Record Layout
//!
//! Detects bundle formats and defines the little-endian archive layout:
//!
//! ```text
//! preamble: magic "QPAK" | version:u16 | reserved:u16
//! record:   name_len:u16 | name:utf8 | scheme:u8 | rank:i32 | dims:i32[rank]
//!           | param_count:u32 | params:f64[param_count] | payload_len:u64 | payload
//! ```
//!
//! The record stream is the interchange layout: records follow each other
//! with no padding and no trailer. The 8-byte preamble is an extension of it
//! that versions the stream and lets files be told apart by content. A reader
//! of bare record streams skips the first [`PREAMBLE_LEN`] bytes of an
//! archive; [`read_record_header`] itself never looks at the preamble, so it
//! accepts a bare stream positioned at its first record.
//!
//! Version history:
//! - `1`: the layout above. The reserved field is written as 0 and ignored.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::io::{self, Read, Write};
use std::path::Path;

use quantpack_quant::{QuantError, QuantParams, QuantResult, QuantizedTensor, Scheme};

use crate::error::{SerializeError, SerializeResult};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes opening every archive.
pub const MAGIC: [u8; 4] = *b"QPAK";

/// Current archive layout version.
pub const FORMAT_VERSION: u16 = 1;

/// Length of the archive preamble in bytes.
pub const PREAMBLE_LEN: u64 = 8;

// =============================================================================
// Format Enum
// =============================================================================

/// Supported tensor container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Quantized archive (.qpak)
    Archive,
    /// JSON tensor bundle (.json)
    Json,
    /// `SafeTensors` file (.safetensors)
    SafeTensors,
}

impl Format {
    /// Get the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Archive => "qpak",
            Format::Json => "json",
            Format::SafeTensors => "safetensors",
        }
    }

    /// Get a human-readable name for this format.
    pub fn name(&self) -> &'static str {
        match self {
            Format::Archive => "Quantpack Archive",
            Format::Json => "JSON",
            Format::SafeTensors => "SafeTensors",
        }
    }

    /// Check if this format is binary.
    pub fn is_binary(&self) -> bool {
        !matches!(self, Format::Json)
    }

    /// Get all supported formats.
    pub fn all() -> &'static [Format] {
        &[Format::Archive, Format::Json, Format::SafeTensors]
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Format Detection
// =============================================================================

/// Detect the format from a file path based on extension.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Format {
    match path.as_ref().extension().and_then(|e| e.to_str()) {
        Some("json") => Format::Json,
        Some("safetensors" | "st") => Format::SafeTensors,
        _ => Format::Archive,
    }
}

/// Detect format from file contents (magic bytes).
pub fn detect_format_from_bytes(bytes: &[u8]) -> Option<Format> {
    if bytes.starts_with(&MAGIC) {
        return Some(Format::Archive);
    }

    // SafeTensors: u64 little-endian header size followed by a JSON header.
    // Checked before JSON since a small header size can start with '{'.
    if bytes.len() >= 9 {
        let header_size = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        if header_size < 100_000_000 && bytes[8] == b'{' {
            return Some(Format::SafeTensors);
        }
    }

    let first = bytes.iter().copied().find(|b| !b.is_ascii_whitespace());
    if first == Some(b'{') {
        return Some(Format::Json);
    }

    None
}

// =============================================================================
// Preamble
// =============================================================================

/// Writes the archive preamble.
pub fn write_preamble<W: Write>(writer: &mut W) -> io::Result<()> {
    let mut preamble = [0u8; PREAMBLE_LEN as usize];
    preamble[..4].copy_from_slice(&MAGIC);
    preamble[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    writer.write_all(&preamble)
}

/// Reads and validates the archive preamble, returning the layout version.
pub fn read_preamble<R: Read>(reader: &mut R) -> SerializeResult<u16> {
    let mut preamble = [0u8; PREAMBLE_LEN as usize];
    let n = fill(reader, &mut preamble)?;
    if n < preamble.len() {
        return Err(SerializeError::InvalidArchive(format!(
            "preamble truncated after {n} bytes"
        )));
    }
    if preamble[..4] != MAGIC {
        return Err(SerializeError::InvalidArchive("missing QPAK magic".to_string()));
    }
    let version = u16::from_le_bytes([preamble[4], preamble[5]]);
    if version != FORMAT_VERSION {
        return Err(SerializeError::InvalidArchive(format!(
            "unsupported archive version {version}"
        )));
    }
    Ok(version)
}

// =============================================================================
// Record Encoding
// =============================================================================

/// Decoded record header. The payload follows it directly in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    /// Tensor name.
    pub name: String,
    /// Scheme the payload is encoded with.
    pub scheme: Scheme,
    /// Original tensor shape.
    pub shape: Vec<usize>,
    /// Scheme parameters.
    pub params: QuantParams,
    /// Payload length in bytes.
    pub payload_len: u64,
}

impl RecordHeader {
    /// Length of this header on the wire.
    pub fn encoded_len(&self) -> u64 {
        header_len(self.name.len(), self.shape.len(), self.params.wire_len())
    }
}

/// Length in bytes of a record header with the given field sizes.
pub fn header_len(name_len: usize, rank: usize, param_count: usize) -> u64 {
    (2 + name_len + 1 + 4 + 4 * rank + 4 + 8 * param_count + 8) as u64
}

/// Serializes one quantized tensor into a complete record.
///
/// The tensor must be internally consistent; a payload or parameter list that
/// does not match the scheme is rejected rather than written.
pub fn encode_record(tensor: &QuantizedTensor) -> QuantResult<Vec<u8>> {
    let name = tensor.name.as_str();
    let name_len = u16::try_from(name.len())
        .map_err(|_| QuantError::invalid_shape(name, "name longer than 65535 bytes"))?;
    let rank = i32::try_from(tensor.shape.len())
        .map_err(|_| QuantError::invalid_shape(name, "rank does not fit in i32"))?;
    let dims = tensor
        .shape
        .iter()
        .map(|&d| {
            i32::try_from(d).map_err(|_| {
                QuantError::invalid_shape(name, format!("dimension {d} does not fit in i32"))
            })
        })
        .collect::<QuantResult<Vec<_>>>()?;
    let numel = tensor
        .shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| QuantError::invalid_shape(name, "element count overflows"))?;

    let params = tensor.params.to_wire(tensor.scheme);
    if params.len() != tensor.scheme.param_count(numel) {
        return Err(QuantError::corrupt(
            name,
            format!(
                "{} expects {} parameters, tensor carries {}",
                tensor.scheme.label(),
                tensor.scheme.param_count(numel),
                params.len()
            ),
        ));
    }
    if tensor.payload.len() != tensor.scheme.payload_len(numel) {
        return Err(QuantError::corrupt(
            name,
            format!(
                "{} payload must be {} bytes, tensor carries {}",
                tensor.scheme.label(),
                tensor.scheme.payload_len(numel),
                tensor.payload.len()
            ),
        ));
    }
    let param_count = u32::try_from(params.len())
        .map_err(|_| QuantError::invalid_shape(name, "too many parameters"))?;

    let header = header_len(name.len(), dims.len(), params.len()) as usize;
    let mut buf = Vec::with_capacity(header + tensor.payload.len());
    buf.extend_from_slice(&name_len.to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.push(tensor.scheme.tag());
    buf.extend_from_slice(&rank.to_le_bytes());
    for d in &dims {
        buf.extend_from_slice(&d.to_le_bytes());
    }
    buf.extend_from_slice(&param_count.to_le_bytes());
    for p in &params {
        buf.extend_from_slice(&p.to_le_bytes());
    }
    buf.extend_from_slice(&(tensor.payload.len() as u64).to_le_bytes());
    debug_assert_eq!(buf.len(), header);
    buf.extend_from_slice(&tensor.payload);
    Ok(buf)
}

// =============================================================================
// Record Decoding
// =============================================================================

/// Reads one record header, or `None` at a clean end of stream.
///
/// `remaining` is the number of bytes left in the archive; every field length
/// is checked against it before anything is allocated, so a damaged length
/// field surfaces as `CorruptPayload` rather than a huge allocation. On
/// success the payload is still unread and is known to fit in the stream.
pub fn read_record_header<R: Read>(
    reader: &mut R,
    offset: u64,
    remaining: u64,
) -> SerializeResult<Option<RecordHeader>> {
    let mut first = [0u8; 2];
    match fill(reader, &mut first)? {
        0 => return Ok(None),
        2 => {}
        _ => {
            return Err(SerializeError::corrupt(
                &format!("<record at byte {offset}>"),
                "truncated record header",
            ))
        }
    }

    let mut cursor = FieldReader {
        inner: reader,
        remaining: remaining.saturating_sub(2),
        label: format!("<record at byte {offset}>"),
    };

    let name_len = u16::from_le_bytes(first) as usize;
    let name_bytes = cursor.bytes(name_len as u64)?;
    let name = String::from_utf8(name_bytes)
        .map_err(|_| SerializeError::corrupt(&cursor.label, "tensor name is not UTF-8"))?;
    cursor.label.clone_from(&name);

    let tag = cursor.u8()?;
    let rank = cursor.i32()?;
    if rank < 0 {
        return Err(SerializeError::corrupt(&name, format!("negative rank {rank}")));
    }
    let mut shape = Vec::with_capacity((rank as usize).min(64));
    for _ in 0..rank {
        let d = cursor.i32()?;
        if d < 0 {
            return Err(SerializeError::corrupt(&name, format!("negative dimension {d}")));
        }
        shape.push(d as usize);
    }
    let numel = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| SerializeError::corrupt(&name, "element count overflows"))?;
    if u64::try_from(numel).ok().and_then(|n| n.checked_mul(4)).is_none() {
        return Err(SerializeError::corrupt(
            &name,
            format!("shape {shape:?} is too large to describe an f32 tensor"),
        ));
    }

    let param_count = cursor.u32()?;
    let param_bytes = cursor.bytes(u64::from(param_count) * 8)?;
    let wire: Vec<f64> = param_bytes
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect();
    let (scheme, params) = QuantParams::from_wire(&name, tag, &wire, numel)?;

    let payload_len = cursor.u64()?;
    let expected = scheme
        .checked_payload_len(numel)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| {
            SerializeError::corrupt(
                &name,
                format!("{} payload for shape {:?} overflows", scheme.label(), shape),
            )
        })?;
    if payload_len != expected {
        return Err(SerializeError::corrupt(
            &name,
            format!(
                "{} payload for shape {:?} must be {} bytes, header declares {}",
                scheme.label(),
                shape,
                expected,
                payload_len
            ),
        ));
    }
    if payload_len > cursor.remaining {
        return Err(SerializeError::corrupt(
            &name,
            format!(
                "payload of {} bytes truncated to {}",
                payload_len, cursor.remaining
            ),
        ));
    }

    Ok(Some(RecordHeader {
        name,
        scheme,
        shape,
        params,
        payload_len,
    }))
}

/// Bounded little-endian field reader over a record header.
struct FieldReader<'a, R> {
    inner: &'a mut R,
    remaining: u64,
    label: String,
}

impl<R: Read> FieldReader<'_, R> {
    fn bytes(&mut self, len: u64) -> SerializeResult<Vec<u8>> {
        if len > self.remaining {
            return Err(SerializeError::corrupt(&self.label, "truncated record header"));
        }
        let mut buf = vec![0u8; len as usize];
        self.inner.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                SerializeError::corrupt(&self.label, "truncated record header")
            } else {
                SerializeError::Io(e)
            }
        })?;
        self.remaining -= len;
        Ok(buf)
    }

    fn array<const N: usize>(&mut self) -> SerializeResult<[u8; N]> {
        let bytes = self.bytes(N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    fn u8(&mut self) -> SerializeResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn i32(&mut self) -> SerializeResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> SerializeResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> SerializeResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

/// Reads until `buf` is full or the stream ends, returning the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quantpack_quant::{quantize_tensor, ErrorKind, Tensor};
    use std::io::Cursor;

    fn record(scheme: Scheme) -> (QuantizedTensor, Vec<u8>) {
        let t = Tensor::new("enc.fc.weight", vec![3, 5], (0..15).map(|x| x as f32 * 0.1).collect())
            .unwrap();
        let q = quantize_tensor(&t, scheme).unwrap();
        let bytes = encode_record(&q).unwrap();
        (q, bytes)
    }

    #[test]
    fn test_detect_format_from_extension() {
        assert_eq!(detect_format("model.qpak"), Format::Archive);
        assert_eq!(detect_format("model.json"), Format::Json);
        assert_eq!(detect_format("model.safetensors"), Format::SafeTensors);
        assert_eq!(detect_format("model.st"), Format::SafeTensors);
        assert_eq!(detect_format("model.unknown"), Format::Archive);
    }

    #[test]
    fn test_detect_format_from_bytes() {
        assert_eq!(detect_format_from_bytes(b"QPAK\x01\x00\x00\x00"), Some(Format::Archive));
        assert_eq!(detect_format_from_bytes(b"  {\"tensors\": []}"), Some(Format::Json));

        let mut st = 2u64.to_le_bytes().to_vec();
        st.extend_from_slice(b"{}");
        assert_eq!(detect_format_from_bytes(&st), Some(Format::SafeTensors));

        assert_eq!(detect_format_from_bytes(b"\x00\x01"), None);
    }

    #[test]
    fn test_format_properties() {
        assert!(Format::Archive.is_binary());
        assert!(!Format::Json.is_binary());
        assert_eq!(Format::Archive.extension(), "qpak");
        assert_eq!(Format::all().len(), 3);
    }

    #[test]
    fn test_preamble_roundtrip() {
        let mut buf = Vec::new();
        write_preamble(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, PREAMBLE_LEN);
        assert_eq!(read_preamble(&mut Cursor::new(&buf)).unwrap(), FORMAT_VERSION);

        buf[0] = b'X';
        assert!(matches!(
            read_preamble(&mut Cursor::new(&buf)),
            Err(SerializeError::InvalidArchive(_))
        ));
        assert!(read_preamble(&mut Cursor::new(&b"QPA"[..])).is_err());
    }

    #[test]
    fn test_record_layout() {
        let (q, bytes) = record(Scheme::Int8Linear);
        let header = header_len(q.name.len(), 2, 2);
        assert_eq!(bytes.len() as u64, header + 15);

        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]) as usize, q.name.len());
        let tag_at = 2 + q.name.len();
        assert_eq!(bytes[tag_at], Scheme::TAG_INT8_LINEAR);
        assert_eq!(
            i32::from_le_bytes(bytes[tag_at + 1..tag_at + 5].try_into().unwrap()),
            2
        );
    }

    #[test]
    fn test_header_roundtrip() {
        for scheme in [
            Scheme::Passthrough,
            Scheme::Float16,
            Scheme::Int8Linear,
            Scheme::Int4Packed,
            Scheme::BlockInt8 { block_size: 4 },
        ] {
            let (q, bytes) = record(scheme);
            let mut cursor = Cursor::new(&bytes);
            let header = read_record_header(&mut cursor, 0, bytes.len() as u64)
                .unwrap()
                .unwrap();
            assert_eq!(header.name, q.name);
            assert_eq!(header.scheme, scheme);
            assert_eq!(header.shape, q.shape);
            assert_eq!(header.params, q.params);
            assert_eq!(header.payload_len as usize, q.payload.len());
            assert_eq!(cursor.position(), header.encoded_len());
        }
    }

    #[test]
    fn test_clean_end_of_stream() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(read_record_header(&mut empty, 8, 0).unwrap().is_none());
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let (q, mut bytes) = record(Scheme::Int8Linear);
        bytes[2 + q.name.len()] = 99;
        let err = read_record_header(&mut Cursor::new(&bytes), 0, bytes.len() as u64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptPayload);
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let (_, bytes) = record(Scheme::Int4Packed);
        for cut in [1, 5, 20] {
            let short = &bytes[..cut];
            let err = read_record_header(&mut Cursor::new(short), 0, cut as u64).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CorruptPayload, "cut at {cut}");
        }

        // Header intact, payload missing.
        let header = bytes.len() - 8;
        let err = read_record_header(&mut Cursor::new(&bytes[..header]), 0, header as u64)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptPayload);
    }

    /// Builds a record header field by field, bypassing `encode_record`.
    fn raw_header(tag: u8, dims: &[i32], params: &[f64], payload_len: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.push(b'w');
        buf.push(tag);
        buf.extend_from_slice(&(dims.len() as i32).to_le_bytes());
        for d in dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        buf.extend_from_slice(&(params.len() as u32).to_le_bytes());
        for p in params {
            buf.extend_from_slice(&p.to_le_bytes());
        }
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf
    }

    #[test]
    fn test_oversized_shape_is_corrupt() {
        let cases = [
            // numel fits usize, numel * 4 does not.
            raw_header(Scheme::TAG_PASSTHROUGH, &[i32::MAX, i32::MAX, 2], &[], 0),
            // numel * 4 wraps to exactly 2^64, i.e. a zero-length payload.
            raw_header(Scheme::TAG_PASSTHROUGH, &[1 << 30, 1 << 30, 4], &[], 0),
            // One-element blocks over a huge shape.
            raw_header(Scheme::TAG_BLOCK_INT8, &[i32::MAX, i32::MAX, 4], &[1.0], 0),
        ];
        for bytes in cases {
            let err = read_record_header(&mut Cursor::new(&bytes), 0, bytes.len() as u64)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CorruptPayload, "{err}");
        }
    }

    #[test]
    fn test_bare_record_stream_without_preamble() {
        let (first, mut stream) = record(Scheme::Int8Linear);
        let (second, tail) = record(Scheme::Float16);
        stream.extend_from_slice(&tail);

        let total = stream.len() as u64;
        let mut cursor = Cursor::new(&stream);
        let a = read_record_header(&mut cursor, 0, total).unwrap().unwrap();
        assert_eq!(a.scheme, first.scheme);
        cursor.set_position(a.encoded_len() + a.payload_len);

        let offset = cursor.position();
        let b = read_record_header(&mut cursor, offset, total - offset).unwrap().unwrap();
        assert_eq!(b.scheme, second.scheme);
        cursor.set_position(offset + b.encoded_len() + b.payload_len);
        assert!(read_record_header(&mut cursor, total, 0).unwrap().is_none());
    }

    #[test]
    fn test_raw_header_matches_encoder() {
        let bytes = raw_header(Scheme::TAG_PASSTHROUGH, &[2], &[], 8);
        let mut full = bytes.clone();
        full.extend_from_slice(&[0u8; 8]);
        let header = read_record_header(&mut Cursor::new(&full), 0, full.len() as u64)
            .unwrap()
            .unwrap();
        assert_eq!(header.shape, vec![2]);
        assert_eq!(header.encoded_len(), bytes.len() as u64);
    }

    #[test]
    fn test_encode_rejects_inconsistent_tensor() {
        let (mut q, _) = record(Scheme::Float16);
        q.payload.push(0);
        assert!(matches!(
            encode_record(&q),
            Err(QuantError::CorruptPayload { .. })
        ));
    }
}
