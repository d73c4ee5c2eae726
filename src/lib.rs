pub mod config;
pub mod detect;
pub mod document;
pub mod docx;
pub mod error;
pub mod ffi;
pub mod ir;
pub mod pipeline;
pub mod progress;
pub mod replace;
pub mod resolve;
pub mod runs;

pub use detect::PlaceholderDetector;
pub use document::{DocumentModel, InMemoryDocument};
pub use error::FillError;
pub use ir::{ContainerPath, FormatKind, FormattedRun, PlaceholderOccurrence, RunFormat};
pub use resolve::{FillKey, OccurrenceResolver};
