//! Archive Reader and Writer
//!
//! Streams quantized tensors into a single archive and reads them back by
//! name. The writer never leaves a manifest entry for a record that was not
//! fully written; the reader indexes every record header up front and then
//! seeks straight to individual payloads.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use quantpack_quant::{QuantError, QuantizedTensor};
use tracing::{debug, warn};

use crate::error::{SerializeError, SerializeResult};
use crate::format::{self, PREAMBLE_LEN};
use crate::manifest::{Manifest, ManifestEntry};
use crate::report::CompressionReport;

// =============================================================================
// Writer
// =============================================================================

/// Outcome of a completed write.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// Every record committed, in write order.
    pub manifest: Manifest,
    /// Bytes written, including the preamble.
    pub bytes_written: u64,
}

impl ArchiveSummary {
    /// Builds the compression report for this archive.
    pub fn report(&self) -> CompressionReport {
        CompressionReport::from_manifest(&self.manifest, self.bytes_written)
    }
}

/// Appends records to an archive.
///
/// Each record is serialized in memory, appended in one write and flushed
/// before it is committed, so the manifest never lists bytes still held in a
/// buffer. When the write or flush fails the stream is rewound to the end of
/// the last committed record, so the next write overwrites any partial bytes.
/// If that rewind fails too, the writer refuses further records.
pub struct ArchiveWriter<W: Write + Seek> {
    inner: W,
    manifest: Manifest,
    base: u64,
    committed: u64,
    poisoned: bool,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Starts an archive at the current position of `inner`.
    pub fn new(mut inner: W) -> SerializeResult<Self> {
        let base = inner.stream_position()?;
        format::write_preamble(&mut inner)?;
        Ok(Self {
            inner,
            manifest: Manifest::new(),
            base,
            committed: PREAMBLE_LEN,
            poisoned: false,
        })
    }

    /// Appends one tensor and returns its manifest entry.
    pub fn write(&mut self, tensor: &QuantizedTensor) -> SerializeResult<&ManifestEntry> {
        if self.manifest.contains(&tensor.name) {
            return Err(QuantError::invalid_shape(&tensor.name, "duplicate tensor name in archive").into());
        }
        if self.poisoned {
            return Err(io::Error::other(
                "archive stream could not be rewound after an earlier failure",
            )
            .into());
        }
        let record = format::encode_record(tensor)?;

        if let Err(e) = self.inner.write_all(&record).and_then(|()| self.inner.flush()) {
            self.rollback();
            return Err(e.into());
        }

        let record_offset = self.committed;
        let record_len = record.len() as u64;
        let payload_len = tensor.payload.len() as u64;
        let entry = ManifestEntry {
            name: tensor.name.clone(),
            scheme: tensor.scheme,
            shape: tensor.shape.clone(),
            params: tensor.params.clone(),
            record_offset,
            payload_offset: record_offset + record_len - payload_len,
            payload_len,
        };
        if self.manifest.insert(entry).is_err() {
            return Err(QuantError::invalid_shape(&tensor.name, "duplicate tensor name in archive").into());
        }
        self.committed += record_len;

        debug!(
            tensor = %tensor.name,
            scheme = %tensor.scheme,
            bytes = record_len,
            "wrote record"
        );
        self.manifest.lookup(&tensor.name).map_err(Into::into)
    }

    /// Records committed so far.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Bytes committed so far, including the preamble.
    pub fn bytes_written(&self) -> u64 {
        self.committed
    }

    /// Flushes and returns the underlying stream with the write summary.
    ///
    /// Bytes past the last committed record may remain in the stream after a
    /// failed write; callers owning a file should truncate to `bytes_written`.
    pub fn finish(mut self) -> SerializeResult<(W, ArchiveSummary)> {
        self.inner.flush()?;
        let summary = ArchiveSummary {
            manifest: self.manifest,
            bytes_written: self.committed,
        };
        Ok((self.inner, summary))
    }

    fn rollback(&mut self) {
        let target = self.base + self.committed;
        if let Err(e) = self.inner.seek(SeekFrom::Start(target)) {
            warn!(error = %e, offset = target, "failed to rewind archive after write error");
            self.poisoned = true;
        }
    }
}

impl ArchiveWriter<BufWriter<File>> {
    /// Creates (or truncates) an archive file.
    pub fn create<P: AsRef<Path>>(path: P) -> SerializeResult<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }

    /// Flushes, truncates the file to the committed length and syncs it.
    pub fn finish_file(self) -> SerializeResult<ArchiveSummary> {
        let (writer, summary) = self.finish()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.set_len(summary.bytes_written)?;
        file.sync_all()?;
        Ok(summary)
    }
}

/// Writes quantized tensors to a new archive file.
pub fn save_archive<P: AsRef<Path>>(path: P, tensors: &[QuantizedTensor]) -> SerializeResult<ArchiveSummary> {
    let mut writer = ArchiveWriter::create(path)?;
    for tensor in tensors {
        writer.write(tensor)?;
    }
    writer.finish_file()
}

// =============================================================================
// Reader
// =============================================================================

/// Random access to the records of an archive.
pub struct ArchiveReader<R: Read + Seek> {
    inner: R,
    manifest: Manifest,
    base: u64,
    len: u64,
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Validates the preamble and indexes every record header.
    ///
    /// Payloads are skipped, not read. Any inconsistency is reported here:
    /// an unknown scheme tag, a truncated record, unusable parameters or a
    /// repeated name.
    pub fn open(mut inner: R) -> SerializeResult<Self> {
        let base = inner.stream_position()?;
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(base))?;
        let len = end.saturating_sub(base);

        format::read_preamble(&mut inner)?;

        let mut manifest = Manifest::new();
        let mut offset = PREAMBLE_LEN;
        while let Some(header) = format::read_record_header(&mut inner, offset, len - offset)? {
            let payload_offset = offset + header.encoded_len();
            let entry = ManifestEntry {
                name: header.name,
                scheme: header.scheme,
                shape: header.shape,
                params: header.params,
                record_offset: offset,
                payload_offset,
                payload_len: header.payload_len,
            };
            offset = payload_offset + entry.payload_len;
            inner.seek(SeekFrom::Start(base + offset))?;

            if let Err(dup) = manifest.insert(entry) {
                return Err(SerializeError::corrupt(&dup.name, "tensor name appears twice in archive"));
            }
        }

        debug!(records = manifest.len(), bytes = len, "indexed archive");
        Ok(Self {
            inner,
            manifest,
            base,
            len,
        })
    }

    /// Index of all records.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Archive length in bytes.
    pub fn archive_len(&self) -> u64 {
        self.len
    }

    /// Builds the compression report for this archive.
    pub fn report(&self) -> CompressionReport {
        CompressionReport::from_manifest(&self.manifest, self.len)
    }

    /// Reads one record by name.
    pub fn read(&mut self, name: &str) -> SerializeResult<QuantizedTensor> {
        let entry = self.manifest.lookup(name)?.clone();
        self.read_entry(entry)
    }

    /// Reads every record in archive order.
    pub fn read_all(&mut self) -> SerializeResult<Vec<QuantizedTensor>> {
        let entries = self.manifest.entries().to_vec();
        entries.into_iter().map(|e| self.read_entry(e)).collect()
    }

    fn read_entry(&mut self, entry: ManifestEntry) -> SerializeResult<QuantizedTensor> {
        self.inner
            .seek(SeekFrom::Start(self.base + entry.payload_offset))?;
        let mut payload = vec![0u8; entry.payload_len as usize];
        self.inner.read_exact(&mut payload).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                SerializeError::corrupt(&entry.name, "payload truncated")
            } else {
                SerializeError::Io(e)
            }
        })?;

        Ok(QuantizedTensor {
            name: entry.name,
            scheme: entry.scheme,
            shape: entry.shape,
            params: entry.params,
            payload,
        })
    }
}

impl ArchiveReader<BufReader<File>> {
    /// Opens an archive file.
    pub fn open_path<P: AsRef<Path>>(path: P) -> SerializeResult<Self> {
        Self::open(BufReader::new(File::open(path)?))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quantpack_quant::{
        dequantize_tensor, quantize_tensor, ErrorKind, QuantParams, Scheme, Tensor,
    };
    use std::io::Cursor;

    fn tensor(name: &str, shape: Vec<usize>) -> Tensor {
        let numel: usize = shape.iter().product();
        let values = (0..numel).map(|i| ((i * 37) % 101) as f32 / 50.0 - 1.0).collect();
        Tensor::new(name, shape, values).unwrap()
    }

    fn archive(tensors: &[QuantizedTensor]) -> Vec<u8> {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        for t in tensors {
            writer.write(t).unwrap();
        }
        let (cursor, _) = writer.finish().unwrap();
        cursor.into_inner()
    }

    fn sample() -> Vec<QuantizedTensor> {
        vec![
            quantize_tensor(&tensor("a", vec![16, 8]), Scheme::Int8Linear).unwrap(),
            quantize_tensor(&tensor("b", vec![7, 3]), Scheme::Int4Packed).unwrap(),
            quantize_tensor(&tensor("c", vec![5]), Scheme::Float16).unwrap(),
        ]
    }

    #[test]
    fn test_manifest_integrity() {
        let tensors = sample();
        let bytes = archive(&tensors);
        let reader = ArchiveReader::open(Cursor::new(&bytes)).unwrap();

        let names: Vec<&str> = reader.manifest().names().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(reader.archive_len(), bytes.len() as u64);

        let report = reader.report();
        assert_eq!(report.tensor_count, 3);
        assert_eq!(report.total_original, (128 + 21 + 5) * 4);
        assert_eq!(report.archive_bytes, bytes.len() as u64);
    }

    #[test]
    fn test_read_by_name() {
        let tensors = sample();
        let bytes = archive(&tensors);
        let mut reader = ArchiveReader::open(Cursor::new(&bytes)).unwrap();

        let b = reader.read("b").unwrap();
        assert_eq!(b, tensors[1]);
        let a = reader.read("a").unwrap();
        assert_eq!(a, tensors[0]);
        assert_eq!(reader.read_all().unwrap(), tensors);
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let bytes = archive(&sample());
        let mut reader = ArchiveReader::open(Cursor::new(&bytes)).unwrap();
        let err = reader.read("missing.weight").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_block_sizes_survive_archive() {
        let t = tensor("fc.weight", vec![300]);
        let q = quantize_tensor(&t, Scheme::BlockInt8 { block_size: 128 }).unwrap();
        let bytes = archive(std::slice::from_ref(&q));

        let mut reader = ArchiveReader::open(Cursor::new(&bytes)).unwrap();
        let back = reader.read("fc.weight").unwrap();
        let QuantParams::Blocks(blocks) = &back.params else {
            panic!("expected block params");
        };
        assert_eq!(blocks.len(), 3);
        assert_eq!(back.payload.len(), 128 + 128 + 44);
        assert_eq!(dequantize_tensor(&back).unwrap(), dequantize_tensor(&q).unwrap());
    }

    #[test]
    fn test_unknown_tag_fails_open() {
        let tensors = sample();
        let mut bytes = archive(&tensors);
        let tag_at = PREAMBLE_LEN as usize + 2 + 1;
        bytes[tag_at] = 99;
        let err = ArchiveReader::open(Cursor::new(&bytes)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptPayload);
    }

    #[test]
    fn test_truncated_archive_fails_open() {
        let bytes = archive(&sample());
        let cut = &bytes[..bytes.len() - 3];
        let err = ArchiveReader::open(Cursor::new(cut)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptPayload);
    }

    #[test]
    fn test_missing_magic_fails_open() {
        let err = ArchiveReader::open(Cursor::new(b"not an archive".to_vec()))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptPayload);
    }

    #[test]
    fn test_duplicate_names() {
        let q = quantize_tensor(&tensor("a", vec![4]), Scheme::Passthrough).unwrap();
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.write(&q).unwrap();
        let err = writer.write(&q).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidShape);
        assert_eq!(writer.manifest().len(), 1);

        // A hand-spliced archive with a repeated record is corrupt.
        let mut bytes = archive(std::slice::from_ref(&q));
        let record = bytes[PREAMBLE_LEN as usize..].to_vec();
        bytes.extend_from_slice(&record);
        let err = ArchiveReader::open(Cursor::new(&bytes)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptPayload);
    }

    #[test]
    fn test_empty_archive() {
        let bytes = archive(&[]);
        assert_eq!(bytes.len() as u64, PREAMBLE_LEN);
        let reader = ArchiveReader::open(Cursor::new(&bytes)).unwrap();
        assert!(reader.manifest().is_empty());
    }

    /// Accepts a fixed number of bytes, then fails every write.
    struct FailingWriter {
        inner: Cursor<Vec<u8>>,
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.inner.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FailingWriter {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_writer_rolls_back_failed_record() {
        let tensors = sample();
        let first_len = format::encode_record(&tensors[0]).unwrap().len();
        let budget = PREAMBLE_LEN as usize + first_len + 10;
        let mut writer = ArchiveWriter::new(FailingWriter {
            inner: Cursor::new(Vec::new()),
            budget,
        })
        .unwrap();

        writer.write(&tensors[0]).unwrap();
        let err = writer.write(&tensors[1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        // Manifest only lists what was fully written.
        assert_eq!(writer.manifest().len(), 1);
        let committed = writer.bytes_written();
        assert_eq!(committed, (PREAMBLE_LEN as usize + first_len) as u64);

        let (failing, summary) = writer.finish().unwrap();
        assert_eq!(failing.inner.position(), committed);

        let mut bytes = failing.inner.into_inner();
        bytes.truncate(summary.bytes_written as usize);
        let mut reader = ArchiveReader::open(Cursor::new(&bytes)).unwrap();
        assert_eq!(reader.read("a").unwrap(), tensors[0]);
    }

    /// Buffered sink: writes land in `pending` and only reach `durable` on a
    /// successful flush. Seeking discards anything still pending.
    struct BufferedSink {
        durable: Cursor<Vec<u8>>,
        pending: Vec<u8>,
        flushes_left: usize,
        seek_fails: bool,
    }

    impl BufferedSink {
        fn new(flushes_left: usize) -> Self {
            Self {
                durable: Cursor::new(Vec::new()),
                pending: Vec::new(),
                flushes_left,
                seek_fails: false,
            }
        }
    }

    impl Write for BufferedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.pending.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.flushes_left == 0 {
                return Err(io::Error::other("device lost"));
            }
            self.flushes_left -= 1;
            self.durable.write_all(&self.pending)?;
            self.pending.clear();
            Ok(())
        }
    }

    impl Seek for BufferedSink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            if self.seek_fails {
                return Err(io::Error::other("seek refused"));
            }
            self.pending.clear();
            self.durable.seek(pos)
        }
    }

    #[test]
    fn test_manifest_only_lists_flushed_records() {
        let tensors = sample();
        let first_len = format::encode_record(&tensors[0]).unwrap().len() as u64;
        // The preamble sits unflushed in the buffer until the first record's flush.
        let mut writer = ArchiveWriter::new(BufferedSink::new(1)).unwrap();

        writer.write(&tensors[0]).unwrap();
        let err = writer.write(&tensors[1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        assert_eq!(writer.manifest().len(), 1);
        assert_eq!(writer.bytes_written(), PREAMBLE_LEN + first_len);
        let durable = writer.inner.durable.get_ref();
        assert_eq!(durable.len() as u64, writer.bytes_written());

        let mut reader = ArchiveReader::open(Cursor::new(durable.clone())).unwrap();
        assert_eq!(reader.read("a").unwrap(), tensors[0]);
    }

    #[test]
    fn test_failed_rewind_stops_writer() {
        let tensors = sample();
        let mut writer = ArchiveWriter::new(BufferedSink::new(1)).unwrap();
        writer.write(&tensors[0]).unwrap();

        writer.inner.seek_fails = true;
        assert!(writer.write(&tensors[1]).is_err());

        writer.inner.seek_fails = false;
        writer.inner.flushes_left = 10;
        let err = writer.write(&tensors[2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(writer.manifest().len(), 1);
    }

    #[test]
    fn test_archive_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.qpak");
        let tensors = sample();
        let summary = save_archive(&path, &tensors).unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), summary.bytes_written);
        let mut reader = ArchiveReader::open_path(&path).unwrap();
        assert_eq!(reader.read_all().unwrap(), tensors);
        assert_eq!(summary.report().archive_bytes, reader.archive_len());
    }
}
