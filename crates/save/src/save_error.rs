// ---------------------------------------------------------------------------
// SaveError: typed errors for save/load operations
// ---------------------------------------------------------------------------

use std::fmt;

/// Errors that can occur while writing or reading a worldgen save.
#[derive(Debug)]
pub enum SaveError {
    /// I/O error (file not found, permission denied, disk full, etc.)
    Io(std::io::Error),
    /// Encoding the snapshot failed.
    Encode(String),
    /// Decoding failed (corrupt payload, bad compression block).
    Decode(String),
    /// The file is not a worldgen save or its header is truncated.
    InvalidHeader(String),
    /// The payload does not hash to the checksum stored in the header.
    Checksum { expected: u32, found: u32 },
    /// The header layout is newer than this build understands.
    HeaderVersion { expected_max: u32, found: u32 },
    /// Save schema version is newer than this build supports.
    VersionMismatch { expected_max: u32, found: u32 },
    /// A migration step could not be applied.
    MigrationFailed(String),
    /// A required resource was missing from the ECS world.
    MissingResource(String),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Io(e) => write!(f, "I/O error: {e}"),
            SaveError::Encode(msg) => write!(f, "Encoding error: {msg}"),
            SaveError::Decode(msg) => write!(f, "Decoding error: {msg}"),
            SaveError::InvalidHeader(msg) => write!(f, "Invalid save header: {msg}"),
            SaveError::Checksum { expected, found } => write!(
                f,
                "Save file is corrupted: checksum mismatch (expected {expected:#010X}, got {found:#010X})"
            ),
            SaveError::HeaderVersion {
                expected_max,
                found,
            } => write!(
                f,
                "Save header format v{found} is newer than supported v{expected_max}"
            ),
            SaveError::VersionMismatch {
                expected_max,
                found,
            } => write!(
                f,
                "Version mismatch: save is v{found}, but this build only supports up to v{expected_max}"
            ),
            SaveError::MigrationFailed(msg) => write!(f, "Migration failed: {msg}"),
            SaveError::MissingResource(name) => {
                write!(f, "Missing required resource: {name}")
            }
        }
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SaveError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SaveError {
    fn from(e: std::io::Error) -> Self {
        SaveError::Io(e)
    }
}

impl From<bitcode::Error> for SaveError {
    fn from(e: bitcode::Error) -> Self {
        SaveError::Decode(e.to_string())
    }
}

impl From<lz4_flex::block::DecompressError> for SaveError {
    fn from(e: lz4_flex::block::DecompressError) -> Self {
        SaveError::Decode(format!("lz4: {e}"))
    }
}
