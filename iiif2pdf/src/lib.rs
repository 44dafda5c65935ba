//! Streaming assembly of IIIF Presentation manifests into searchable PDFs.
//!
//! The library is organised around the components named in the design
//! document: a byte-sink writer and PDF value model at the bottom, a PDF
//! generator and cover-page splicer built on top of those, a IIIF model
//! adapter and OCR parser feeding the generator with content, a rate-limited
//! fetch coordinator supplying bytes over the network, and a conversion
//! pipeline tying all of the above into `convert`/`estimate` entry points.
//!
//! The library itself never installs a `tracing` subscriber or reads
//! process-global configuration; both are the CLI binary's job.

pub mod config;
pub mod error;
pub mod fetch;
pub mod font;
pub mod generator;
pub mod icc;
pub mod iiif;
pub mod image;
pub mod jpeg;
pub mod ocr;
pub mod pdfvalue;
pub mod pipeline;
pub mod splice;
pub mod textlayer;
pub mod writer;

pub use error::{CoverSpliceError, ManifestError, PartialFailure, PipelineError};
pub use fetch::{FetchCoordinator, FetchError, FetchOptions};
pub use pipeline::{
    convert, estimate, ConversionReport, ConvertOptions, CoverPageSource, ManifestSource,
    MessageCode, Notification, Progress,
};
