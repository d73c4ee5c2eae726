use std::fmt;

use serde::{Deserialize, Serialize};

/// Stand-in character for an inline object (drawing, field, hyperlink) that
/// takes part in a paragraph's run sequence but carries no editable text.
pub const OBJECT_REPLACEMENT: char = '\u{FFFC}';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    Bracket,
    Curly,
    DoubleCurly,
    Angle,
    Underscore,
    DoubleUnderscore,
    BlankField,
}

impl FormatKind {
    pub fn is_explicit(self) -> bool {
        !matches!(self, FormatKind::BlankField)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormatKind::Bracket => "bracket",
            FormatKind::Curly => "curly",
            FormatKind::DoubleCurly => "double_curly",
            FormatKind::Angle => "angle",
            FormatKind::Underscore => "underscore",
            FormatKind::DoubleUnderscore => "double_underscore",
            FormatKind::BlankField => "blank_field",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Pattern,
    Heuristic,
}

/// Location of one paragraph-like container.
///
/// The derived ordering is document traversal order: body paragraphs first,
/// then table cell paragraphs by table, row, cell and paragraph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "container", rename_all = "snake_case")]
pub enum ContainerPath {
    Paragraph {
        index: usize,
    },
    TableCell {
        table: usize,
        row: usize,
        cell: usize,
        paragraph: usize,
    },
}

impl fmt::Display for ContainerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerPath::Paragraph { index } => write!(f, "p[{index}]"),
            ContainerPath::TableCell {
                table,
                row,
                cell,
                paragraph,
            } => write!(f, "t[{table}].r[{row}].c[{cell}].p[{paragraph}]"),
        }
    }
}

/// One concrete fill-in location.
///
/// Offsets count characters (not bytes) of the owning container's logical
/// text and are meaningless against any other container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderOccurrence {
    pub text: String,
    pub label_name: String,
    pub format_kind: FormatKind,
    pub start_offset: usize,
    pub end_offset: usize,
    pub container_path: ContainerPath,
    pub detection_source: DetectionSource,
}

impl PlaceholderOccurrence {
    /// Whether a fill key's text addresses this occurrence.
    ///
    /// Blank fields accept any spelling of their label key: `"Email:"`,
    /// `"Email: "`, `"Email:\t"` and `"Email: ____"` all address `"Email: "`.
    pub fn matches_key_text(&self, key_text: &str) -> bool {
        if self.text == key_text {
            return true;
        }
        if self.format_kind != FormatKind::BlankField {
            return false;
        }
        let key = key_text.trim_end_matches(&[' ', '\t', '_'][..]);
        !key.is_empty() && key.ends_with(':') && self.text.trim_end() == key
    }

    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Character formatting of a run. `None` means "inherit the document
/// default", never "off".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
    /// Half-points, the unit WordprocessingML stores sizes in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    /// `RRGGBB` hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Verbatim run-property markup from the host document. Written back
    /// unchanged when present, so two runs only compare equal when their
    /// source markup is identical.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_props: Option<String>,
}

impl RunFormat {
    pub fn is_default(&self) -> bool {
        *self == RunFormat::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedRun {
    pub text: String,
    #[serde(default)]
    pub format: RunFormat,
}

impl FormattedRun {
    pub fn new(text: impl Into<String>, format: RunFormat) -> Self {
        Self {
            text: text.into(),
            format,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, RunFormat::default())
    }

    pub fn bold(text: impl Into<String>) -> Self {
        Self::new(
            text,
            RunFormat {
                bold: Some(true),
                ..RunFormat::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(label: &str) -> PlaceholderOccurrence {
        PlaceholderOccurrence {
            text: format!("{label}: "),
            label_name: label.to_lowercase(),
            format_kind: FormatKind::BlankField,
            start_offset: 0,
            end_offset: label.len() + 2,
            container_path: ContainerPath::Paragraph { index: 0 },
            detection_source: DetectionSource::Heuristic,
        }
    }

    #[test]
    fn container_order_is_paragraphs_then_cells() {
        let mut paths = vec![
            ContainerPath::TableCell {
                table: 0,
                row: 1,
                cell: 0,
                paragraph: 0,
            },
            ContainerPath::Paragraph { index: 7 },
            ContainerPath::TableCell {
                table: 0,
                row: 0,
                cell: 2,
                paragraph: 0,
            },
            ContainerPath::Paragraph { index: 1 },
        ];
        paths.sort();
        assert_eq!(paths[0], ContainerPath::Paragraph { index: 1 });
        assert_eq!(paths[1], ContainerPath::Paragraph { index: 7 });
        assert_eq!(paths[2].to_string(), "t[0].r[0].c[2].p[0]");
        assert_eq!(paths[3].to_string(), "t[0].r[1].c[0].p[0]");
    }

    #[test]
    fn blank_field_accepts_label_spellings() {
        let occ = blank("Email");
        assert!(occ.matches_key_text("Email: "));
        assert!(occ.matches_key_text("Email:"));
        assert!(occ.matches_key_text("Email:\t"));
        assert!(occ.matches_key_text("Email: ____"));
        assert!(!occ.matches_key_text("Email"));
        assert!(!occ.matches_key_text("Emails: "));
    }

    #[test]
    fn explicit_requires_exact_text() {
        let occ = PlaceholderOccurrence {
            text: "[Name]".to_string(),
            label_name: "name".to_string(),
            format_kind: FormatKind::Bracket,
            start_offset: 0,
            end_offset: 6,
            container_path: ContainerPath::Paragraph { index: 0 },
            detection_source: DetectionSource::Pattern,
        };
        assert!(occ.matches_key_text("[Name]"));
        assert!(!occ.matches_key_text("[Name] "));
        assert!(!occ.matches_key_text("[name]"));
    }
}
