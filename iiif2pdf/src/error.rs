//! Error kinds, one enum per component, aggregated here.

use std::fmt;

use crate::fetch::FetchError;
use crate::generator::GeneratorError;
use crate::writer::WriterError;

/// Errors that can arise while resolving a IIIF manifest.
#[derive(Debug)]
pub enum ManifestError {
    Unreachable(FetchError),
    Malformed(String),
}
impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(e) => write!(f, "manifest unreachable: {}", e),
            Self::Malformed(msg) => write!(f, "manifest malformed: {}", msg),
        }
    }
}
impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unreachable(e) => Some(e),
            Self::Malformed(_) => None,
        }
    }
}

/// Cover-page splice failures. Always fatal: the cover page
/// is part of the contract of the output.
#[derive(Debug)]
pub enum CoverSpliceError {
    Fetch(FetchError),
    Parse(iiif2pdf_cover::CoverError),
    NotInSetupPhase,
}
impl fmt::Display for CoverSpliceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "failed to obtain cover page: {}", e),
            Self::Parse(e) => write!(f, "failed to parse cover page PDF: {}", e),
            Self::NotInSetupPhase => write!(f, "cover pages can only be inserted during setup"),
        }
    }
}
impl std::error::Error for CoverSpliceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::NotInSetupPhase => None,
        }
    }
}

/// Fatal errors that abort the pipeline before or during output.
#[derive(Debug)]
pub enum PipelineError {
    Manifest(ManifestError),
    CoverSplice(CoverSpliceError),
    Writer(WriterError),
    Generator(GeneratorError),
    Cancelled,
}
impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest(e) => write!(f, "{}", e),
            Self::CoverSplice(e) => write!(f, "{}", e),
            Self::Writer(e) => write!(f, "{}", e),
            Self::Generator(e) => write!(f, "{}", e),
            Self::Cancelled => write!(f, "conversion was cancelled"),
        }
    }
}
impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Manifest(e) => Some(e),
            Self::CoverSplice(e) => Some(e),
            Self::Writer(e) => Some(e),
            Self::Generator(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}
impl From<ManifestError> for PipelineError {
    fn from(value: ManifestError) -> Self { Self::Manifest(value) }
}
impl From<CoverSpliceError> for PipelineError {
    fn from(value: CoverSpliceError) -> Self { Self::CoverSplice(value) }
}
impl From<WriterError> for PipelineError {
    fn from(value: WriterError) -> Self { Self::Writer(value) }
}
impl From<GeneratorError> for PipelineError {
    fn from(value: GeneratorError) -> Self { Self::Generator(value) }
}

/// Per-placement or per-canvas failures that are reported but do not abort
/// the conversion; accumulated into the final conversion report.
#[derive(Debug, Clone)]
pub enum PartialFailure {
    ImageFetch { canvas_index: usize, cause: String },
    OcrFetch { canvas_index: usize, cause: String },
    OcrParse { canvas_index: usize, cause: String },
    UnsupportedFormat { canvas_index: usize, cause: String },
    UnsupportedSelector { canvas_index: usize, cause: String },
}
