use thiserror::Error;

use crate::hocr::Rect;

/// Failures raised while reading hOCR boxes or placing the text overlay.
///
/// `SourceRead` is fatal for a conversion run. The other two variants are
/// page-scoped: the page image is still produced, only its text layer is
/// dropped.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The annotation document could not be loaded or decoded.
    #[error("failed to read hOCR source {source_name}: {reason}")]
    SourceRead { source_name: String, reason: String },

    /// A page or box element has no usable `bbox` entry in its title.
    #[error("malformed hOCR annotation on page {page} ({element}): {reason}")]
    MalformedAnnotation {
        page: usize,
        element: String,
        reason: String,
    },

    /// The page rectangle has no area, so no scale factor can be derived.
    #[error("degenerate page geometry on page {page}: bbox {rect} has zero size")]
    DegenerateGeometry { page: usize, rect: Rect },
}

impl OverlayError {
    /// Page the failure belongs to, if it is page-scoped.
    pub fn page(&self) -> Option<usize> {
        match self {
            OverlayError::SourceRead { .. } => None,
            OverlayError::MalformedAnnotation { page, .. }
            | OverlayError::DegenerateGeometry { page, .. } => Some(*page),
        }
    }

    pub fn is_page_scoped(&self) -> bool {
        self.page().is_some()
    }
}

pub type Result<T> = std::result::Result<T, OverlayError>;
