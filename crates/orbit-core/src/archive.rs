//! Archive unwrapping.
//!
//! A located module may be a bare WebAssembly binary, a gzip stream, or a
//! zip archive holding the binary as a named entry. The container is
//! classified from its first bytes, then the stream is rewound so the next
//! stage sees it from offset 0.

use crate::error::UnwrapError;
use flate2::read::GzDecoder;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// Bytes read to classify a stream.
pub const HEADER_SIZE: usize = 512;

/// Name of the guest binary inside a build archive.
pub const ARTIFACT_ENTRY: &str = "artifact.wasm";

/// Entry name used by older build archives.
pub const LEGACY_ENTRY: &str = "main.wasm";

/// A readable, seekable byte source.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Raw stream handed out by a backend.
pub type SourceStream = Box<dyn ReadSeek + Send>;

/// Container format of a located module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Raw,
    Gzip,
    Zip,
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::Raw => write!(f, "raw"),
            Container::Gzip => write!(f, "gzip"),
            Container::Zip => write!(f, "zip"),
        }
    }
}

/// Classify a stream from its leading bytes.
pub fn classify(header: &[u8]) -> Container {
    match header {
        [b'P', b'K', 3, 4, ..] | [b'P', b'K', 5, 6, ..] | [b'P', b'K', 7, 8, ..] => Container::Zip,
        [0x1f, 0x8b, 0x08, ..] => Container::Gzip,
        _ => Container::Raw,
    }
}

/// Read up to [`HEADER_SIZE`] bytes, then seek back to the start.
///
/// A short read at end of stream is not an error.
pub fn read_header<R: Read + Seek + ?Sized>(source: &mut R) -> io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(HEADER_SIZE);
    Read::take(&mut *source, HEADER_SIZE as u64).read_to_end(&mut header)?;
    source.seek(SeekFrom::Start(0))?;
    Ok(header)
}

/// The canonical guest executable.
///
/// Raw and zip binaries can be seeked; a gzip binary is decompressed as it
/// is read and only supports forward reading. Dropping it releases the
/// decompressor, archive and file handle behind it.
pub struct GuestBinary {
    container: Container,
    payload: Payload,
}

enum Payload {
    Stream(SourceStream),
    Gzip(GzDecoder<SourceStream>),
    Buffered(Cursor<Vec<u8>>),
}

impl GuestBinary {
    /// Which container the bytes came out of.
    pub fn container(&self) -> Container {
        self.container
    }

    /// Whether [`Seek`] is supported.
    pub fn is_seekable(&self) -> bool {
        !matches!(self.payload, Payload::Gzip(_))
    }

    /// Read the whole binary.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, UnwrapError> {
        let container = self.container;
        let mut bytes = Vec::new();
        self.read_to_end(&mut bytes).map_err(|e| {
            let corrupt = matches!(
                e.kind(),
                io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData
            );
            if container == Container::Gzip && corrupt {
                UnwrapError::Decode {
                    container: "gzip",
                    reason: e.to_string(),
                }
            } else {
                UnwrapError::Io(e)
            }
        })?;
        Ok(bytes)
    }
}

impl Read for GuestBinary {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.payload {
            Payload::Stream(stream) => stream.read(buf),
            Payload::Gzip(decoder) => decoder.read(buf),
            Payload::Buffered(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for GuestBinary {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.payload {
            Payload::Stream(stream) => stream.seek(pos),
            Payload::Buffered(cursor) => cursor.seek(pos),
            Payload::Gzip(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "gzip guest binaries can only be read forward",
            )),
        }
    }
}

impl fmt::Debug for GuestBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestBinary")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

/// Classify `source` and return a reader over the guest binary inside it.
///
/// On error every handle opened so far, `source` included, is dropped.
pub fn unwrap(mut source: SourceStream) -> Result<GuestBinary, UnwrapError> {
    let header = read_header(&mut source)?;
    let container = classify(&header);
    tracing::debug!(%container, header_len = header.len(), "Classified module source");

    let payload = match container {
        Container::Raw => Payload::Stream(source),
        Container::Gzip => Payload::Gzip(GzDecoder::new(source)),
        Container::Zip => Payload::Buffered(Cursor::new(read_zip_entry(source)?)),
    };

    Ok(GuestBinary { container, payload })
}

fn read_zip_entry(source: SourceStream) -> Result<Vec<u8>, UnwrapError> {
    let mut archive = zip::ZipArchive::new(source).map_err(zip_error)?;

    let name = [ARTIFACT_ENTRY, LEGACY_ENTRY]
        .into_iter()
        .find(|name| archive.index_for_name(name).is_some())
        .ok_or(UnwrapError::MissingEntry {
            current: ARTIFACT_ENTRY,
            legacy: LEGACY_ENTRY,
        })?;

    if name == LEGACY_ENTRY {
        tracing::debug!(entry = name, "Using legacy archive entry");
    }

    let mut entry = archive.by_name(name).map_err(zip_error)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn zip_error(err: zip::result::ZipError) -> UnwrapError {
    match err {
        zip::result::ZipError::Io(e) => UnwrapError::Io(e),
        other => UnwrapError::Decode {
            container: "zip",
            reason: other.to_string(),
        },
    }
}
