use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context};

use crate::detect::PlaceholderDetector;
use crate::docx::DocxDocument;
use crate::document::DocumentModel;
use crate::error::FillError;
use crate::ir::{ContainerPath, PlaceholderOccurrence};
use crate::progress::{clip, ConsoleProgress};
use crate::replace::replace_many;
use crate::resolve::{DocumentOutline, OccurrenceResolver, RawKeyScope, DEFAULT_ANCHOR_LOOKBACK};

use super::context::{build_classifier_view, ClassifierView};
use super::report::{FillReport, KeyOutcome};
use super::trace::TraceWriter;
use super::PipelineConfig;

/// Engine knobs of one fill, independent of where the document lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillOptions {
    pub blank_fields: bool,
    pub anchor_lookback: usize,
    pub raw_keys: RawKeyScope,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            blank_fields: true,
            anchor_lookback: DEFAULT_ANCHOR_LOOKBACK,
            raw_keys: RawKeyScope::default(),
        }
    }
}

impl From<&PipelineConfig> for FillOptions {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            blank_fields: cfg.blank_fields,
            anchor_lookback: cfg.anchor_lookback,
            raw_keys: cfg.raw_keys,
        }
    }
}

/// Everything a whole-document detection pass produces.
#[derive(Clone, Debug, Default)]
pub struct DocumentScan {
    pub outline: DocumentOutline,
    /// Ordered by container, then start offset.
    pub occurrences: Vec<PlaceholderOccurrence>,
    pub diagnostics: Vec<FillError>,
}

fn invalid(path: &ContainerPath, reason: impl Into<String>) -> FillError {
    FillError::InvalidDocument {
        container: path.to_string(),
        reason: reason.into(),
    }
}

pub fn document_outline<D: DocumentModel + ?Sized>(doc: &D) -> Result<DocumentOutline, FillError> {
    let mut entries = Vec::new();
    for path in doc.containers() {
        let text = doc
            .text(&path)
            .ok_or_else(|| invalid(&path, "no retrievable text"))?;
        entries.push((path, text));
    }
    Ok(DocumentOutline::new(entries))
}

pub fn detect_document<D: DocumentModel + ?Sized>(
    doc: &D,
    detector: &PlaceholderDetector,
) -> Result<DocumentScan, FillError> {
    let outline = document_outline(doc)?;
    let mut occurrences = Vec::new();
    let mut diagnostics = Vec::new();
    for (path, text) in outline.entries() {
        let report = detector.detect_with_diagnostics(text, path);
        occurrences.extend(report.occurrences);
        diagnostics.extend(report.diagnostics);
    }
    Ok(DocumentScan {
        outline,
        occurrences,
        diagnostics,
    })
}

/// Detects, resolves and applies `request` against `doc`.
///
/// Per-key problems land in the report; only an unusable document is an
/// error, and then nothing has been written back.
pub fn fill_document<D: DocumentModel + ?Sized>(
    doc: &mut D,
    request: &[(String, String)],
    options: &FillOptions,
) -> Result<FillReport, FillError> {
    let detector = PlaceholderDetector::new().with_blank_fields(options.blank_fields);
    let scan = detect_document(&*doc, &detector)?;
    fill_scanned(doc, &scan, request, options)
}

/// Like [`fill_document`], against a scan taken earlier from the same `doc`.
pub fn fill_scanned<D: DocumentModel + ?Sized>(
    doc: &mut D,
    scan: &DocumentScan,
    request: &[(String, String)],
    options: &FillOptions,
) -> Result<FillReport, FillError> {
    let resolver = OccurrenceResolver::new(&scan.outline)
        .with_anchor_lookback(options.anchor_lookback)
        .with_raw_key_scope(options.raw_keys);
    let batch = resolver.resolve_batch(&scan.occurrences, request);

    let mut outcomes: Vec<KeyOutcome> = request
        .iter()
        .map(|(key, value)| KeyOutcome::new(key, value))
        .collect();
    for failure in &batch.failures {
        outcomes[failure.key_index].record_error(&failure.error);
    }

    let mut by_container: BTreeMap<&ContainerPath, Vec<(usize, &PlaceholderOccurrence, &str)>> =
        BTreeMap::new();
    for a in &batch.assignments {
        let Some(occ) = scan.occurrences.get(a.handle.0) else {
            continue;
        };
        by_container
            .entry(&occ.container_path)
            .or_default()
            .push((a.key_index, occ, a.value.as_str()));
    }

    // Rewrite everything first so a failing container leaves `doc` untouched.
    let mut rewrites = Vec::with_capacity(by_container.len());
    for (path, targets) in by_container {
        let runs = doc
            .runs(path)
            .ok_or_else(|| invalid(path, "no retrievable text"))?;
        let pairs: Vec<(&PlaceholderOccurrence, &str)> =
            targets.iter().map(|&(_, occ, value)| (occ, value)).collect();
        let rewrite = replace_many(runs, &pairs);
        for (&(ki, _, _), result) in targets.iter().zip(&rewrite.results) {
            match result {
                Ok(()) => outcomes[ki].record_applied(path),
                Err(e) => outcomes[ki].record_error(e),
            }
        }
        if rewrite.changed() {
            rewrites.push((path, rewrite));
        }
    }

    let containers_changed = rewrites.len();
    for (path, rewrite) in rewrites {
        doc.replace_runs(path, rewrite)
            .map_err(|e| invalid(path, format!("{e:#}")))?;
    }
    Ok(FillReport::finish(
        outcomes,
        scan.occurrences.len(),
        containers_changed,
    ))
}

/// Reads a fill request: a JSON object of `"fill key": "value"` strings.
pub fn parse_fill_request(text: &str) -> anyhow::Result<Vec<(String, String)>> {
    let value: serde_json::Value =
        serde_json::from_str(text).context("parse fill request json")?;
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("fill request must be a JSON object of \"key\": \"value\""))?;
    let mut out = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        let value = value
            .as_str()
            .ok_or_else(|| anyhow!("value for {key:?} must be a string"))?;
        out.push((key.clone(), value.to_string()));
    }
    Ok(out)
}

/// File-level driver: DOCX in, DOCX (or detection JSON) out.
pub struct FormFiller {
    cfg: PipelineConfig,
    progress: ConsoleProgress,
    trace: TraceWriter,
}

impl FormFiller {
    pub fn new(cfg: PipelineConfig, progress: ConsoleProgress) -> Self {
        let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace)
            .unwrap_or_else(|_| TraceWriter::disabled());
        Self {
            cfg,
            progress,
            trace,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn fill_docx(
        &mut self,
        input: &Path,
        values_json: &Path,
        output: &Path,
    ) -> anyhow::Result<FillReport> {
        let text = std::fs::read_to_string(values_json)
            .with_context(|| format!("read fill request: {}", values_json.display()))?;
        let request = parse_fill_request(&text)
            .with_context(|| format!("fill request: {}", values_json.display()))?;
        self.fill_docx_with(input, &request, output)
    }

    pub fn fill_docx_with(
        &mut self,
        input: &Path,
        request: &[(String, String)],
        output: &Path,
    ) -> anyhow::Result<FillReport> {
        let (mut doc, scan) = self.scan_docx(input)?;
        self.progress.info(format!("Fill keys: {}", request.len()));

        let report = fill_scanned(&mut doc, &scan, request, &FillOptions::from(&self.cfg))?;
        let max_chars = self.cfg.log_max_chars;
        for o in &report.outcomes {
            if o.success {
                self.progress.key_result(true, &o.key, &o.value, max_chars);
            } else {
                let reason = o.error.as_deref().unwrap_or("nothing applied");
                self.progress.key_result(false, &o.key, reason, max_chars.max(80));
            }
        }
        self.progress.info(format!(
            "Filled {}/{} keys",
            report.succeeded,
            report.outcomes.len()
        ));

        self.write_trace(input, &scan, &doc, &report);

        self.progress.info(format!("Write output: {}", output.display()));
        doc.save(output)?;
        Ok(report)
    }

    /// Builds the classifier view of `input`, and writes it as JSON when
    /// `json_out` is given.
    pub fn detect_docx(
        &self,
        input: &Path,
        json_out: Option<&Path>,
    ) -> anyhow::Result<ClassifierView> {
        let (_, scan) = self.scan_docx(input)?;
        let view = build_classifier_view(&scan.outline, &scan.occurrences, self.cfg.context_window);
        if let Some(path) = json_out {
            let text = serde_json::to_string_pretty(&view).context("serialize detection json")?;
            std::fs::write(path, text)
                .with_context(|| format!("write detection json: {}", path.display()))?;
            self.progress
                .info(format!("Wrote detection: {}", path.display()));
        }
        Ok(view)
    }

    fn scan_docx(&self, input: &Path) -> anyhow::Result<(DocxDocument, DocumentScan)> {
        self.progress.info(format!("Read DOCX: {}", input.display()));
        let doc = DocxDocument::open(input)?;
        let detector = PlaceholderDetector::new().with_blank_fields(self.cfg.blank_fields);
        let scan = detect_document(&doc, &detector)?;
        self.progress
            .info(format!("Containers: {}", scan.outline.len()));
        self.progress.info(format!(
            "Detected {} placeholder occurrences",
            scan.occurrences.len()
        ));
        for d in &scan.diagnostics {
            self.progress
                .info(format!("  skipped: {}", clip(&d.to_string(), 120)));
        }
        Ok((doc, scan))
    }

    fn write_trace(&self, input: &Path, scan: &DocumentScan, doc: &DocxDocument, report: &FillReport) {
        if !self.trace.is_enabled() {
            return;
        }
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        for (path, before) in scan.outline.entries() {
            let Some(after) = doc.text(path) else {
                continue;
            };
            if &after == before {
                continue;
            }
            let _ = self.trace.write_container_text(&stem, path, "before", before);
            let _ = self.trace.write_container_text(&stem, path, "after", &after);
        }
        let _ = self
            .trace
            .write_json(&format!("{stem}.fill_report.json"), report);
    }
}
