//! Code image classification
//!
//! Sniffs a PE header to decide whether a package file is a managed code image
//! (it carries a CLI header) or a native library. Only headers are read; the
//! stream position afterwards is unspecified.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// Minimum length of anything that could carry a DOS header
const MIN_IMAGE_LEN: u64 = 64;
/// Offset of the pointer to the PE header inside the DOS header
const HEADER_POINTER_OFFSET: u64 = 0x3C;
/// Header pointer used when the DOS header leaves it zeroed
const DEFAULT_HEADER_POINTER: u64 = 0x80;
/// Room required after the PE header: signature + file header (24),
/// standard fields (28), NT fields (88 for PE32+) and the data directories (>= 128)
const REQUIRED_HEADER_ROOM: u64 = 256;
/// "PE\0\0"
const PE_SIGNATURE: u32 = 0x0000_4550;
/// Size of the COFF file header following the signature
const FILE_HEADER_LEN: i64 = 20;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;

/// Offset of the CLI header data directory (15th entry) from the PE header
const PE32_CLI_DIRECTORY: u64 = 232;
const PE32_PLUS_CLI_DIRECTORY: u64 = 248;

/// Result of classifying a package file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// PE image with a CLI header
    Managed,
    /// PE image without a CLI header
    Native,
    /// Not a PE image, or truncated
    Malformed,
}

impl ImageKind {
    pub fn is_managed(self) -> bool {
        self == ImageKind::Managed
    }
}

/// Classify a seekable stream
pub fn classify<R: Read + Seek + ?Sized>(stream: &mut R) -> ImageKind {
    inspect(stream).unwrap_or(ImageKind::Malformed)
}

/// Classify an in-memory buffer
pub fn classify_bytes(bytes: &[u8]) -> ImageKind {
    classify(&mut Cursor::new(bytes))
}

fn inspect<R: Read + Seek + ?Sized>(stream: &mut R) -> io::Result<ImageKind> {
    let length = stream.seek(SeekFrom::End(0))?;
    if length < MIN_IMAGE_LEN {
        return Ok(ImageKind::Malformed);
    }

    stream.seek(SeekFrom::Start(HEADER_POINTER_OFFSET))?;
    let mut header_pointer = u64::from(read_u32(stream)?);
    if header_pointer == 0 {
        header_pointer = DEFAULT_HEADER_POINTER;
    }

    if length < REQUIRED_HEADER_ROOM || header_pointer > length - REQUIRED_HEADER_ROOM {
        return Ok(ImageKind::Malformed);
    }

    stream.seek(SeekFrom::Start(header_pointer))?;
    if read_u32(stream)? != PE_SIGNATURE {
        return Ok(ImageKind::Malformed);
    }

    stream.seek(SeekFrom::Current(FILE_HEADER_LEN))?;

    let cli_directory = match read_u16(stream)? {
        PE32_MAGIC => PE32_CLI_DIRECTORY,
        PE32_PLUS_MAGIC => PE32_PLUS_CLI_DIRECTORY,
        _ => return Ok(ImageKind::Malformed),
    };

    stream.seek(SeekFrom::Start(header_pointer + cli_directory))?;
    let cli_header_rva = read_u32(stream)?;

    Ok(if cli_header_rva == 0 {
        ImageKind::Native
    } else {
        ImageKind::Managed
    })
}

fn read_u32<R: Read + ?Sized>(stream: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u16<R: Read + ?Sized>(stream: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}
