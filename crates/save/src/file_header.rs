// ---------------------------------------------------------------------------
// file_header – Save file header with magic bytes, version, and checksum
// ---------------------------------------------------------------------------
//
// Header format (20 bytes, fixed-size, little-endian):
//   [0..4]   Magic bytes: "WGEN"
//   [4..8]   Format version (u32)
//   [8..12]  Flags (u32: bit 0 = lz4 compressed)
//   [12..16] Uncompressed payload size (u32)
//   [16..20] xxHash32 checksum of the stored payload (everything after the header)
//
// On save: encode WorldgenSave -> optionally compress -> prepend header
// On load: check magic -> validate checksum -> strip header -> decompress -> decode
// Legacy: if the first 4 bytes are not "WGEN", treat as raw bitcode (v0 saves)

use xxhash_rust::xxh32::xxh32;

use crate::save_error::SaveError;

/// Magic bytes identifying a worldgen save file.
pub const MAGIC: [u8; 4] = *b"WGEN";

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = 20;

/// Layout version of the header itself, independent of the save schema
/// version carried inside the payload.
pub const HEADER_FORMAT_VERSION: u32 = 1;

/// Payload is an lz4 block with its uncompressed size prepended.
pub const FLAG_COMPRESSED: u32 = 1;

const XXHASH_SEED: u32 = 0;

/// Parsed file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub format_version: u32,
    pub flags: u32,
    pub uncompressed_size: u32,
    pub checksum: u32,
}

impl FileHeader {
    fn new(stored: &[u8], uncompressed_size: usize, flags: u32) -> Self {
        Self {
            format_version: HEADER_FORMAT_VERSION,
            flags,
            uncompressed_size: uncompressed_size as u32,
            checksum: xxh32(stored, XXHASH_SEED),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.format_version.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
    }
}

fn with_header(header: FileHeader, stored: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + stored.len());
    header.write(&mut out);
    out.extend_from_slice(stored);
    out
}

/// Wrap encoded save data with an uncompressed file header.
pub fn wrap_with_header(data: &[u8]) -> Vec<u8> {
    with_header(FileHeader::new(data, data.len(), 0), data)
}

/// Compress `data` with lz4 and wrap it with a header flagged as compressed.
/// The checksum covers the compressed bytes, so corruption is caught before
/// decompression is attempted.
pub fn wrap_with_header_compressed(data: &[u8]) -> Vec<u8> {
    let compressed = lz4_flex::compress_prepend_size(data);
    with_header(
        FileHeader::new(&compressed, data.len(), FLAG_COMPRESSED),
        &compressed,
    )
}

/// Result of unwrapping a save file's bytes.
#[derive(Debug)]
pub enum UnwrapResult<'a> {
    /// File has a valid header; the stored payload bytes follow.
    WithHeader {
        header: FileHeader,
        payload: &'a [u8],
    },
    /// File has no header (v0 save); the entire buffer is the payload.
    Legacy(&'a [u8]),
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Parse and validate the file header from raw bytes.
///
/// # Errors
///
/// - `InvalidHeader` if the magic is present but the file is too short
/// - `HeaderVersion` if the header layout is from a newer build
/// - `Checksum` if the payload does not match the stored checksum
pub fn unwrap_header(bytes: &[u8]) -> Result<UnwrapResult<'_>, SaveError> {
    if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
        return Ok(UnwrapResult::Legacy(bytes));
    }

    if bytes.len() < HEADER_SIZE {
        return Err(SaveError::InvalidHeader(format!(
            "file has WGEN magic but is too short ({} bytes, need at least {HEADER_SIZE})",
            bytes.len()
        )));
    }

    let header = FileHeader {
        format_version: read_u32(bytes, 4),
        flags: read_u32(bytes, 8),
        uncompressed_size: read_u32(bytes, 12),
        checksum: read_u32(bytes, 16),
    };

    if header.format_version > HEADER_FORMAT_VERSION {
        return Err(SaveError::HeaderVersion {
            expected_max: HEADER_FORMAT_VERSION,
            found: header.format_version,
        });
    }

    let payload = &bytes[HEADER_SIZE..];
    let computed = xxh32(payload, XXHASH_SEED);
    if computed != header.checksum {
        return Err(SaveError::Checksum {
            expected: header.checksum,
            found: computed,
        });
    }

    Ok(UnwrapResult::WithHeader { header, payload })
}

/// Decompress an lz4 payload produced by [`wrap_with_header_compressed`].
pub fn decompress_payload(payload: &[u8]) -> Result<Vec<u8>, SaveError> {
    Ok(lz4_flex::decompress_size_prepended(payload)?)
}

/// Strip and validate the header, returning the decoded-ready payload.
/// Compressed payloads are decompressed and checked against the recorded
/// size.
pub fn read_payload(bytes: &[u8]) -> Result<Vec<u8>, SaveError> {
    match unwrap_header(bytes)? {
        UnwrapResult::Legacy(payload) => Ok(payload.to_vec()),
        UnwrapResult::WithHeader { header, payload } => {
            let data = if header.is_compressed() {
                decompress_payload(payload)?
            } else {
                payload.to_vec()
            };
            if data.len() != header.uncompressed_size as usize {
                return Err(SaveError::Decode(format!(
                    "payload is {} bytes, header records {}",
                    data.len(),
                    header.uncompressed_size
                )));
            }
            Ok(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_and_unwrap_roundtrip() {
        let data = b"hello world save data";
        let wrapped = wrap_with_header(data);

        assert_eq!(&wrapped[..4], &MAGIC);
        assert_eq!(wrapped.len(), HEADER_SIZE + data.len());

        match unwrap_header(&wrapped).expect("unwrap should succeed") {
            UnwrapResult::WithHeader { header, payload } => {
                assert_eq!(header.format_version, HEADER_FORMAT_VERSION);
                assert!(!header.is_compressed());
                assert_eq!(header.uncompressed_size, data.len() as u32);
                assert_eq!(payload, data);
            }
            UnwrapResult::Legacy(_) => panic!("expected WithHeader, got Legacy"),
        }
    }

    #[test]
    fn test_compressed_roundtrip() {
        let data: Vec<u8> = b"road_network_state".repeat(200);
        let wrapped = wrap_with_header_compressed(&data);
        assert!(wrapped.len() < HEADER_SIZE + data.len());

        match unwrap_header(&wrapped).expect("unwrap should succeed") {
            UnwrapResult::WithHeader { header, payload } => {
                assert_eq!(header.flags & FLAG_COMPRESSED, FLAG_COMPRESSED);
                assert_eq!(header.uncompressed_size, data.len() as u32);
                assert_eq!(decompress_payload(payload).expect("decompresses"), data);
            }
            UnwrapResult::Legacy(_) => panic!("expected WithHeader"),
        }
        assert_eq!(read_payload(&wrapped).expect("reads"), data);
    }

    #[test]
    fn test_legacy_detection() {
        let data = b"\x00\x01\x02\x03some old save data";
        match unwrap_header(data).expect("unwrap should succeed") {
            UnwrapResult::Legacy(payload) => assert_eq!(payload, data.as_slice()),
            UnwrapResult::WithHeader { .. } => panic!("expected Legacy, got WithHeader"),
        }
        assert_eq!(read_payload(b"").expect("empty is legacy"), Vec::<u8>::new());
    }

    #[test]
    fn test_corrupted_checksum_detected() {
        let mut wrapped = wrap_with_header(b"test payload");
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0xFF;

        let err = unwrap_header(&wrapped).unwrap_err();
        assert!(matches!(err, SaveError::Checksum { .. }), "got {err}");
    }

    #[test]
    fn test_corrupted_compressed_payload_fails_checksum_first() {
        let mut wrapped = wrap_with_header_compressed(&[7u8; 4096]);
        wrapped[HEADER_SIZE + 5] ^= 0x55;
        assert!(matches!(
            read_payload(&wrapped),
            Err(SaveError::Checksum { .. })
        ));
    }

    #[test]
    fn test_future_header_version_rejected() {
        let mut wrapped = wrap_with_header(b"test payload");
        wrapped[4..8].copy_from_slice(&999u32.to_le_bytes());

        let err = unwrap_header(&wrapped).unwrap_err();
        assert!(matches!(
            err,
            SaveError::HeaderVersion {
                expected_max: HEADER_FORMAT_VERSION,
                found: 999
            }
        ));
    }

    #[test]
    fn test_truncated_header_detected() {
        let err = unwrap_header(b"WGEN\x01\x00").unwrap_err();
        assert!(format!("{err}").contains("too short"), "got {err}");
    }

    #[test]
    fn test_size_mismatch_detected() {
        let data = b"twelve bytes";
        let mut wrapped = wrap_with_header(data);
        // Size field is outside the checksummed payload.
        wrapped[12..16].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(read_payload(&wrapped), Err(SaveError::Decode(_))));
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let wrapped = wrap_with_header(b"");
        assert_eq!(wrapped.len(), HEADER_SIZE);
        assert!(read_payload(&wrapped).expect("reads").is_empty());
    }
}
