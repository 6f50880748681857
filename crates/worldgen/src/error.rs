use std::fmt;

use bevy::math::IVec3;

use crate::geometry::ChunkPos;
use crate::host::HostError;

// ---------------------------------------------------------------------------
// Terminal task outcomes
// ---------------------------------------------------------------------------

/// Why a site check refused a footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteRejectReason {
    /// Too many samples would need more cut than allowed.
    ExcessCut,
    /// Too many samples would need more fill than allowed.
    ExcessFill,
    /// Too many samples sit on water.
    SurfaceWater,
    /// The footprint produced no samples at all.
    NoSamples,
}

impl fmt::Display for SiteRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SiteRejectReason::ExcessCut => "excess cut",
            SiteRejectReason::ExcessFill => "excess fill",
            SiteRejectReason::SurfaceWater => "surface water",
            SiteRejectReason::NoSamples => "no samples",
        };
        f.write_str(s)
    }
}

/// Terminal failure of a placement task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    SiteRejected(SiteRejectReason),
    /// A required chunk stayed absent for `ticks` consecutive ticks.
    Stalled { chunk: ChunkPos, ticks: u32 },
    Exception(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SiteRejected(r) => write!(f, "site rejected ({})", r),
            FailureReason::Stalled { chunk, ticks } => write!(
                f,
                "stalled waiting {} ticks for chunk ({}, {})",
                ticks, chunk.x, chunk.z
            ),
            FailureReason::Exception(msg) => write!(f, "exception: {}", msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Step errors
// ---------------------------------------------------------------------------

/// Unexpected error inside a task step. Becomes `FailureReason::Exception`
/// for that task only.
#[derive(Debug)]
pub enum PlacementError {
    Host(HostError),
    Template(TemplateError),
    MissingSection { template: String, section: [u32; 3] },
    /// A section cell names a palette entry the template does not have.
    BadPaletteIndex { template: String, section: [u32; 3], index: u16 },
    InvalidOrigin(IVec3),
}

impl fmt::Display for PlacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementError::Host(e) => write!(f, "host error: {}", e),
            PlacementError::Template(e) => write!(f, "template error: {}", e),
            PlacementError::MissingSection { template, section } => write!(
                f,
                "template '{}' has no section {:?}",
                template, section
            ),
            PlacementError::BadPaletteIndex {
                template,
                section,
                index,
            } => write!(
                f,
                "template '{}' section {:?} uses palette index {} out of range",
                template, section, index
            ),
            PlacementError::InvalidOrigin(p) => write!(f, "invalid origin {}", p),
        }
    }
}

impl std::error::Error for PlacementError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlacementError::Host(e) => Some(e),
            PlacementError::Template(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HostError> for PlacementError {
    fn from(e: HostError) -> Self {
        PlacementError::Host(e)
    }
}

impl From<TemplateError> for PlacementError {
    fn from(e: TemplateError) -> Self {
        PlacementError::Template(e)
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum TemplateError {
    Metadata(serde_json::Error),
    Io(std::io::Error),
    /// Section edge must fit the one-byte local-dims header.
    EdgeOutOfRange(u32),
    EmptyGrid,
    TransparentIndexOutOfRange { index: u16, palette_len: usize },
    PaletteTooLarge(usize),
    BadSectionName(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::Metadata(e) => write!(f, "metadata: {}", e),
            TemplateError::Io(e) => write!(f, "I/O: {}", e),
            TemplateError::EdgeOutOfRange(edge) => {
                write!(f, "section edge {} outside 1..=255", edge)
            }
            TemplateError::EmptyGrid => f.write_str("section grid has a zero dimension"),
            TemplateError::TransparentIndexOutOfRange { index, palette_len } => write!(
                f,
                "transparent index {} outside palette of {} entries",
                index, palette_len
            ),
            TemplateError::PaletteTooLarge(n) => {
                write!(f, "palette has {} entries, at most 65536 allowed", n)
            }
            TemplateError::BadSectionName(name) => write!(f, "bad section file name '{}'", name),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateError::Metadata(e) => Some(e),
            TemplateError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TemplateError {
    fn from(e: serde_json::Error) -> Self {
        TemplateError::Metadata(e)
    }
}

impl From<std::io::Error> for TemplateError {
    fn from(e: std::io::Error) -> Self {
        TemplateError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Another job with this key is still in flight.
    DuplicateJob(u64),
    UnknownTemplate(String),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::DuplicateJob(key) => write!(f, "job {:#x} is already in flight", key),
            SubmitError::UnknownTemplate(id) => write!(f, "unknown template '{}'", id),
        }
    }
}

impl std::error::Error for SubmitError {}

// ---------------------------------------------------------------------------
// Region decisions
// ---------------------------------------------------------------------------

/// Non-terminal refusal of a planned origin. Triggers a re-plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftReject {
    TooCloseToParticipant,
    TooFarFromParticipants,
    DisallowedBiome(crate::host::BiomeClass),
    TooCloseToStructure,
    TemplateUnavailable,
    /// The placement task itself failed.
    TaskFailed,
}

impl fmt::Display for SoftReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftReject::TooCloseToParticipant => f.write_str("too close to a participant"),
            SoftReject::TooFarFromParticipants => f.write_str("too far from every participant"),
            SoftReject::DisallowedBiome(b) => write!(f, "biome {:?} not allowed", b),
            SoftReject::TooCloseToStructure => f.write_str("too close to another structure"),
            SoftReject::TemplateUnavailable => f.write_str("template unavailable"),
            SoftReject::TaskFailed => f.write_str("placement task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_display() {
        let stalled = FailureReason::Stalled {
            chunk: ChunkPos::new(2, -3),
            ticks: 600,
        };
        assert_eq!(
            stalled.to_string(),
            "stalled waiting 600 ticks for chunk (2, -3)"
        );
        assert_eq!(
            FailureReason::SiteRejected(SiteRejectReason::SurfaceWater).to_string(),
            "site rejected (surface water)"
        );
    }

    #[test]
    fn test_template_error_from_json() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let te: TemplateError = err.into();
        assert!(matches!(te, TemplateError::Metadata(_)));
        assert!(std::error::Error::source(&te).is_some());
    }
}
