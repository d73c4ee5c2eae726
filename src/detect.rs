use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::FillError;
use crate::ir::{ContainerPath, DetectionSource, FormatKind, PlaceholderOccurrence};
use crate::runs::char_offsets_by_byte;

// Alphanumerics, blanks and a bounded punctuation set. Never a line break or
// another delimiter, so a match cannot run across unrelated brackets.
macro_rules! safe_class {
    () => {
        r"[A-Za-z0-9_ \t,./():;&'@#%+?!=\-]"
    };
}

static DOUBLE_CURLY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(r"\{\{(", safe_class!(), r"+)\}\}")).expect("double curly regex")
});
static BRACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(concat!(r"\[(", safe_class!(), r"+)\]")).expect("bracket regex"));
static CURLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(concat!(r"\{(", safe_class!(), r"+)\}")).expect("curly regex"));
static ANGLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(concat!(r"<(", safe_class!(), r"+)>")).expect("angle regex"));
// The closing underscore must end a word, so `_a_ and _b_` stays two fields
// while `_phone_number_` stays one.
static DOUBLE_UNDERSCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(r"__(", safe_class!(), r"+?)__\b")).expect("double underscore regex")
});
static UNDERSCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(concat!(r"_(", safe_class!(), r"+?)_\b")).expect("underscore regex"));

static BLANK_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*([A-Z][A-Za-z ]*?)[ \t]*:").expect("blank label regex"));

/// Explicit patterns in the order they claim text. Double delimiters run
/// before their single counterparts, and enclosing brackets run before the
/// underscore forms so `[_____]` stays one placeholder.
pub const PATTERN_PRIORITY: [FormatKind; 6] = [
    FormatKind::DoubleCurly,
    FormatKind::Bracket,
    FormatKind::Curly,
    FormatKind::Angle,
    FormatKind::DoubleUnderscore,
    FormatKind::Underscore,
];

fn pattern_for(kind: FormatKind) -> Option<&'static Regex> {
    match kind {
        FormatKind::DoubleCurly => Some(&DOUBLE_CURLY_RE),
        FormatKind::Bracket => Some(&BRACKET_RE),
        FormatKind::Curly => Some(&CURLY_RE),
        FormatKind::Angle => Some(&ANGLE_RE),
        FormatKind::DoubleUnderscore => Some(&DOUBLE_UNDERSCORE_RE),
        FormatKind::Underscore => Some(&UNDERSCORE_RE),
        FormatKind::BlankField => None,
    }
}

#[derive(Clone, Debug, Default)]
pub struct DetectionReport {
    pub occurrences: Vec<PlaceholderOccurrence>,
    /// Matches discarded during the scan (`PatternOverlapRejected`,
    /// `EmptyCapture`). Informational only.
    pub diagnostics: Vec<FillError>,
}

#[derive(Clone, Debug)]
pub struct PlaceholderDetector {
    priority: Vec<FormatKind>,
    blank_fields: bool,
}

impl Default for PlaceholderDetector {
    fn default() -> Self {
        Self {
            priority: PATTERN_PRIORITY.to_vec(),
            blank_fields: true,
        }
    }
}

impl PlaceholderDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blank_fields(mut self, enabled: bool) -> Self {
        self.blank_fields = enabled;
        self
    }

    /// Occurrences in `text`, ascending by start offset.
    pub fn detect(&self, text: &str, container: &ContainerPath) -> Vec<PlaceholderOccurrence> {
        self.detect_with_diagnostics(text, container).occurrences
    }

    pub fn detect_with_diagnostics(&self, text: &str, container: &ContainerPath) -> DetectionReport {
        let mut report = DetectionReport::default();
        if text.is_empty() {
            return report;
        }
        let char_at = char_offsets_by_byte(text);

        let mut explicit: Vec<PlaceholderOccurrence> = Vec::new();
        // Byte spans of `explicit`, kept sorted.
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        for &kind in &self.priority {
            let Some(re) = pattern_for(kind) else {
                continue;
            };

            for m in re.find_iter(text) {
                let (start, end) = (char_at[m.start()], char_at[m.end()]);
                if let Some(kept) = explicit.iter().find(|o| intersects(o, start, end)) {
                    report.diagnostics.push(FillError::PatternOverlapRejected {
                        kept: kept.text.clone(),
                        dropped: m.as_str().to_string(),
                        dropped_kind: kind,
                    });
                }
            }

            // Only the text no higher-priority pattern claimed is searched, so a
            // rejected candidate never hides a later match behind it.
            let mut found: Vec<(usize, usize)> = Vec::new();
            for (gap_start, gap_end) in free_gaps(&claimed, text.len()) {
                let gap = &text[gap_start..gap_end];
                for caps in re.captures_iter(gap) {
                    let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                        continue;
                    };
                    let Some(label_name) = label_for(kind, inner.as_str()) else {
                        report.diagnostics.push(FillError::EmptyCapture {
                            text: whole.as_str().to_string(),
                            kind,
                        });
                        continue;
                    };
                    let (byte_start, byte_end) = (gap_start + whole.start(), gap_start + whole.end());
                    found.push((byte_start, byte_end));
                    explicit.push(PlaceholderOccurrence {
                        text: whole.as_str().to_string(),
                        label_name,
                        format_kind: kind,
                        start_offset: char_at[byte_start],
                        end_offset: char_at[byte_end],
                        container_path: container.clone(),
                        detection_source: DetectionSource::Pattern,
                    });
                }
            }
            claimed.extend(found);
            claimed.sort_unstable();
        }

        let mut all = explicit;
        if self.blank_fields {
            for occ in detect_blank_fields(text, &char_at, container) {
                if let Some(kept) = all
                    .iter()
                    .find(|o| o.format_kind.is_explicit() && intersects(o, occ.start_offset, occ.end_offset))
                {
                    report.diagnostics.push(FillError::PatternOverlapRejected {
                        kept: kept.text.clone(),
                        dropped: occ.text.clone(),
                        dropped_kind: FormatKind::BlankField,
                    });
                    continue;
                }
                all.push(occ);
            }
        }

        all.sort_by_key(|o| (o.start_offset, o.end_offset));
        report.occurrences = all;
        report
    }
}

fn intersects(occ: &PlaceholderOccurrence, start: usize, end: usize) -> bool {
    occ.start_offset < end && start < occ.end_offset
}

/// Byte ranges of `[0, len)` not covered by the sorted, disjoint `claimed`.
fn free_gaps(claimed: &[(usize, usize)], len: usize) -> Vec<(usize, usize)> {
    let mut gaps: Vec<(usize, usize)> = Vec::with_capacity(claimed.len() + 1);
    let mut pos = 0usize;
    for &(start, end) in claimed {
        if start > pos {
            gaps.push((pos, start));
        }
        pos = pos.max(end);
    }
    if pos < len {
        gaps.push((pos, len));
    }
    gaps
}

/// Normalized identifier for a captured inner text, or `None` when the
/// capture cannot name a placeholder.
fn label_for(kind: FormatKind, inner: &str) -> Option<String> {
    let inner = inner.trim();
    if inner.is_empty() {
        return None;
    }
    let name = normalize_label(inner);
    if !name.is_empty() {
        return Some(name);
    }
    match kind {
        // `_____` between underscores is a drawn line, not a name.
        FormatKind::Underscore | FormatKind::DoubleUnderscore => None,
        _ => Some("blank".to_string()),
    }
}

pub fn normalize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// `Label:` at the start of a line, followed by the end of the line or by a
/// run of two or more blanks (space, tab, underscore).
fn detect_blank_fields(
    text: &str,
    char_at: &[usize],
    container: &ContainerPath,
) -> Vec<PlaceholderOccurrence> {
    let mut out: Vec<PlaceholderOccurrence> = Vec::new();
    for caps in BLANK_LABEL_RE.captures_iter(text) {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let label_text = label.as_str().trim_end();
        if label_text.chars().count() < 2 {
            continue;
        }

        let after = &text[whole.end()..];
        let blank_bytes: usize = after
            .chars()
            .take_while(|c| matches!(c, ' ' | '\t' | '_'))
            .map(char::len_utf8)
            .sum();
        let rest = &after[blank_bytes..];
        let at_line_end = rest.is_empty() || rest.starts_with('\n') || rest.starts_with('\r');
        if !at_line_end && blank_bytes < 2 {
            continue;
        }

        let start = char_at[label.start()];
        let end = char_at[whole.end() + blank_bytes];
        out.push(PlaceholderOccurrence {
            text: format!("{label_text}: "),
            label_name: normalize_label(label_text),
            format_kind: FormatKind::BlankField,
            start_offset: start,
            end_offset: end,
            container_path: container.clone(),
            detection_source: DetectionSource::Heuristic,
        });
    }
    out
}
