mod config;
mod context;
mod filler;
mod report;
mod trace;

pub use config::{init_default_config, CliOverrides, PipelineConfig};
pub use context::{build_classifier_view, ClassifierView, OccurrenceContext};
pub use filler::{
    detect_document, document_outline, fill_document, fill_scanned, parse_fill_request,
    DocumentScan, FillOptions, FormFiller,
};
pub use report::{FillReport, KeyOutcome};
pub use trace::TraceWriter;
