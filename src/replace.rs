use crate::error::FillError;
use crate::ir::{FormatKind, FormattedRun, PlaceholderOccurrence, RunFormat, OBJECT_REPLACEMENT};
use crate::runs::{build_run_index, RunIndex};

/// How one rewrite changed a paragraph's logical text: the first
/// `prefix_len` and last `suffix_len` characters survive untouched, the
/// middle of length `old_len - prefix_len - suffix_len` was swapped for
/// `new_len - prefix_len - suffix_len` new characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Splice {
    pub prefix_len: usize,
    pub suffix_len: usize,
    pub old_len: usize,
    pub new_len: usize,
}

impl Splice {
    /// Carries an offset in the old text over to the new text. Offsets inside
    /// the replaced middle collapse onto its start.
    pub fn remap(&self, offset: usize) -> usize {
        if offset <= self.prefix_len {
            offset
        } else if offset >= self.old_len - self.suffix_len {
            offset + self.new_len - self.old_len
        } else {
            self.prefix_len
        }
    }

    pub fn is_identity(&self) -> bool {
        self.prefix_len + self.suffix_len == self.old_len && self.old_len == self.new_len
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebuiltParagraph {
    pub runs: Vec<FormattedRun>,
    pub text: String,
    pub splice: Splice,
}

/// Rewrites the paragraph so that `occurrence` reads `value`.
///
/// Characters outside the changed middle keep their run formatting; new
/// characters take the formatting of the character just before the change,
/// or just after it when the change starts the paragraph.
pub fn replace(
    runs: &[FormattedRun],
    occurrence: &PlaceholderOccurrence,
    value: &str,
) -> Result<RebuiltParagraph, FillError> {
    let index = build_run_index(runs);
    let old = index.chars();
    let value: Vec<char> = value.chars().filter(|&c| c != OBJECT_REPLACEMENT).collect();

    let new_text = match occurrence.format_kind {
        FormatKind::BlankField => fill_blank(old, occurrence, &value)?,
        _ => fill_explicit(old, occurrence, &value)?,
    };

    let splice = diff_bounds(old, &new_text);
    let formats = inherit_formats(&index, &splice);
    Ok(RebuiltParagraph {
        runs: group_runs(&new_text, &formats),
        text: new_text.iter().collect(),
        splice,
    })
}

fn stale(occurrence: &PlaceholderOccurrence) -> FillError {
    FillError::StaleOccurrence {
        text: occurrence.text.clone(),
        container: occurrence.container_path.to_string(),
        start: occurrence.start_offset,
        end: occurrence.end_offset,
    }
}

fn fill_explicit(
    old: &[char],
    occurrence: &PlaceholderOccurrence,
    value: &[char],
) -> Result<Vec<char>, FillError> {
    let (start, end) = (occurrence.start_offset, occurrence.end_offset);
    if start > end || end > old.len() || !old[start..end].iter().copied().eq(occurrence.text.chars()) {
        return Err(stale(occurrence));
    }
    let mut out = Vec::with_capacity(old.len() - (end - start) + value.len());
    out.extend_from_slice(&old[..start]);
    out.extend_from_slice(value);
    out.extend_from_slice(&old[end..]);
    Ok(out)
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '_')
}

/// Label stays, the blank region after it becomes `" " + value`.
fn fill_blank(
    old: &[char],
    occurrence: &PlaceholderOccurrence,
    value: &[char],
) -> Result<Vec<char>, FillError> {
    let (start, end) = (occurrence.start_offset, occurrence.end_offset);
    let label = occurrence.text.trim_end();
    let name = label.strip_suffix(':').unwrap_or(label);
    if name.is_empty() || start >= end || end > old.len() {
        return Err(stale(occurrence));
    }
    // The recorded span may hold blanks between the name and its colon.
    let Some(colon) = old[start..end].iter().position(|&c| c == ':').map(|p| start + p) else {
        return Err(stale(occurrence));
    };
    let written = old[start..colon]
        .iter()
        .rev()
        .skip_while(|&&c| c == ' ' || c == '\t')
        .count();
    if !old[start..start + written].iter().copied().eq(name.chars()) {
        return Err(stale(occurrence));
    }
    let label_end = colon + 1;

    let line_end = old[label_end..]
        .iter()
        .position(|&c| c == '\n')
        .map_or(old.len(), |p| label_end + p);
    let blank_end = old[label_end..line_end]
        .iter()
        .position(|&c| !is_blank(c))
        .map_or(line_end, |p| label_end + p);

    let (region_end, separator) = if blank_end > label_end {
        // Whitespace right before following text stays as its separator.
        let mut end = blank_end;
        if blank_end < line_end {
            while end > label_end && matches!(old[end - 1], ' ' | '\t') {
                end -= 1;
            }
        }
        (end, true)
    } else if label_end < line_end {
        // A value already sits against the label: overwrite it in place.
        let end = old[label_end..line_end]
            .iter()
            .position(|&c| c == ' ' || c == '\t')
            .map_or(line_end, |p| label_end + p);
        (end, false)
    } else {
        (label_end, true)
    };

    let mut out = Vec::with_capacity(old.len() + value.len() + 1);
    out.extend_from_slice(&old[..label_end]);
    if separator {
        out.push(' ');
    }
    out.extend_from_slice(value);
    out.extend_from_slice(&old[region_end..]);
    Ok(out)
}

fn diff_bounds(old: &[char], new: &[char]) -> Splice {
    let min = old.len().min(new.len());
    let prefix_len = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix_len = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(min - prefix_len)
        .take_while(|(a, b)| a == b)
        .count();
    Splice {
        prefix_len,
        suffix_len,
        old_len: old.len(),
        new_len: new.len(),
    }
}

fn inherit_formats<'a>(index: &RunIndex<'a>, splice: &Splice) -> Vec<Option<&'a RunFormat>> {
    let Splice {
        prefix_len,
        suffix_len,
        old_len,
        new_len,
    } = *splice;
    let boundary = if prefix_len > 0 {
        index.format_at(prefix_len - 1)
    } else if suffix_len > 0 {
        index.format_at(old_len - suffix_len)
    } else {
        None
    };
    (0..new_len)
        .map(|i| {
            if i < prefix_len {
                index.format_at(i)
            } else if i >= new_len - suffix_len {
                index.format_at(old_len - (new_len - i))
            } else {
                boundary
            }
        })
        .collect()
}

fn group_runs(text: &[char], formats: &[Option<&RunFormat>]) -> Vec<FormattedRun> {
    let default = RunFormat::default();
    let mut out: Vec<FormattedRun> = Vec::new();
    let mut current: Option<(&RunFormat, String)> = None;
    for (&ch, fmt) in text.iter().zip(formats) {
        let fmt = fmt.unwrap_or(&default);
        if let Some((f, buf)) = current.as_mut() {
            if *f == fmt {
                buf.push(ch);
                continue;
            }
        }
        if let Some((f, buf)) = current.replace((fmt, ch.to_string())) {
            out.push(FormattedRun::new(buf, f.clone()));
        }
    }
    if let Some((f, buf)) = current {
        out.push(FormattedRun::new(buf, f.clone()));
    }
    out
}

/// Result of applying several replacements to one paragraph.
#[derive(Clone, Debug, Default)]
pub struct ParagraphRewrite {
    pub runs: Vec<FormattedRun>,
    /// Applied splices, in application order.
    pub splices: Vec<Splice>,
    /// One entry per target, in the order the targets were given.
    pub results: Vec<Result<(), FillError>>,
}

impl ParagraphRewrite {
    pub fn changed(&self) -> bool {
        self.splices.iter().any(|s| !s.is_identity())
    }

    /// Carries an offset of the original paragraph text through every splice.
    pub fn remap(&self, offset: usize) -> usize {
        self.splices.iter().fold(offset, |o, s| s.remap(o))
    }
}

impl From<RebuiltParagraph> for ParagraphRewrite {
    fn from(rebuilt: RebuiltParagraph) -> Self {
        Self {
            runs: rebuilt.runs,
            splices: vec![rebuilt.splice],
            results: vec![Ok(())],
        }
    }
}

/// Applies several replacements within one paragraph, last to first by start
/// offset, so every target's recorded offsets are still valid when its turn
/// comes. A failed target leaves the text it covers unchanged.
pub fn replace_many(
    runs: &[FormattedRun],
    targets: &[(&PlaceholderOccurrence, &str)],
) -> ParagraphRewrite {
    let mut order: Vec<usize> = (0..targets.len()).collect();
    order.sort_by(|&a, &b| {
        let (oa, ob) = (targets[a].0, targets[b].0);
        (ob.start_offset, ob.end_offset).cmp(&(oa.start_offset, oa.end_offset))
    });

    let mut current: Vec<FormattedRun> = runs.to_vec();
    let mut splices: Vec<Splice> = Vec::new();
    let mut results: Vec<Result<(), FillError>> = vec![Ok(()); targets.len()];
    for i in order {
        let (occurrence, value) = targets[i];
        match replace(&current, occurrence, value) {
            Ok(rebuilt) => {
                current = rebuilt.runs;
                splices.push(rebuilt.splice);
            }
            Err(e) => results[i] = Err(e),
        }
    }
    ParagraphRewrite {
        runs: current,
        splices,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::PlaceholderDetector;
    use crate::ir::ContainerPath;
    use crate::runs::logical_text;

    const P0: ContainerPath = ContainerPath::Paragraph { index: 0 };

    fn italic(text: &str) -> FormattedRun {
        FormattedRun::new(
            text,
            RunFormat {
                italic: Some(true),
                ..RunFormat::default()
            },
        )
    }

    fn occurrences(runs: &[FormattedRun]) -> Vec<PlaceholderOccurrence> {
        PlaceholderDetector::new().detect(&logical_text(runs), &P0)
    }

    fn assert_minimal(runs: &[FormattedRun]) {
        for pair in runs.windows(2) {
            assert_ne!(pair[0].format, pair[1].format, "adjacent runs share formatting: {runs:?}");
        }
        assert!(runs.iter().all(|r| !r.text.is_empty()), "empty run in {runs:?}");
    }

    #[test]
    fn explicit_placeholder_is_replaced() {
        let runs = vec![FormattedRun::plain("Company: [Company Name]")];
        let occs = occurrences(&runs);
        let out = replace(&runs, &occs[0], "Acme").unwrap();
        assert_eq!(out.text, "Company: Acme");
        assert_eq!(out.runs, vec![FormattedRun::plain("Company: Acme")]);
    }

    #[test]
    fn blank_field_keeps_bold_label_and_plain_value() {
        let runs = vec![FormattedRun::bold("Email:"), FormattedRun::plain("   ")];
        let occs = occurrences(&runs);
        assert_eq!(occs[0].text, "Email: ");
        let out = replace(&runs, &occs[0], "a@b.com").unwrap();
        assert_eq!(out.text, "Email: a@b.com");
        assert_eq!(
            out.runs,
            vec![FormattedRun::bold("Email:"), FormattedRun::plain(" a@b.com")]
        );
        assert_minimal(&out.runs);
    }

    #[test]
    fn repeated_underscore_blank_changes_only_target() {
        let runs = vec![FormattedRun::plain("Fee $[_____________] and cap $[_____________].")];
        let occs = occurrences(&runs);
        assert_eq!(occs.len(), 2);

        let second = replace(&runs, &occs[1], "5000000").unwrap();
        assert_eq!(second.text, "Fee $[_____________] and cap $5000000.");

        // The first occurrence's offsets survive the later rewrite.
        let first = replace(&second.runs, &occs[0], "100000").unwrap();
        assert_eq!(first.text, "Fee $100000 and cap $5000000.");
    }

    #[test]
    fn blank_field_variants() {
        let cases = [
            ("Name: ______", "Jane", "Name: Jane"),
            ("Phone:", "555", "Phone: 555"),
            ("Date:\t\t", "today", "Date: today"),
            ("Name: ____   Title", "Jane", "Name: Jane   Title"),
            ("Address: \nEmail: ", "x@y", "Address: x@y\nEmail: "),
            ("Address : ____", "X", "Address : X"),
        ];
        for (text, value, expected) in cases {
            let runs = vec![FormattedRun::plain(text)];
            let occs = occurrences(&runs);
            let out = replace(&runs, &occs[0], value).unwrap();
            assert_eq!(out.text, expected, "filling {text:?}");
        }
    }

    #[test]
    fn prefilled_blank_field_is_overwritten_in_place() {
        let runs = vec![FormattedRun::plain("Name:Jane rest")];
        let occ = PlaceholderOccurrence {
            text: "Name: ".to_string(),
            label_name: "name".to_string(),
            format_kind: FormatKind::BlankField,
            start_offset: 0,
            end_offset: 5,
            container_path: P0,
            detection_source: crate::ir::DetectionSource::Heuristic,
        };
        let out = replace(&runs, &occ, "Joan").unwrap();
        assert_eq!(out.text, "Name:Joan rest");
    }

    #[test]
    fn new_text_takes_preceding_format() {
        let runs = vec![
            FormattedRun::plain("Dear "),
            FormattedRun::bold("[Name]"),
            italic(", welcome"),
        ];
        let occs = occurrences(&runs);
        let out = replace(&runs, &occs[0], "Bo").unwrap();
        assert_eq!(out.text, "Dear Bo, welcome");
        assert_eq!(
            out.runs,
            vec![FormattedRun::plain("Dear Bo"), italic(", welcome")]
        );
    }

    #[test]
    fn leading_change_takes_following_format() {
        let runs = vec![FormattedRun::bold("[Name]"), italic(" signs here")];
        let occs = occurrences(&runs);
        let out = replace(&runs, &occs[0], "Bo").unwrap();
        assert_eq!(out.runs, vec![italic("Bo signs here")]);
    }

    #[test]
    fn whole_text_change_is_default_format() {
        let runs = vec![FormattedRun::bold("<who>")];
        let occs = occurrences(&runs);
        let out = replace(&runs, &occs[0], "me").unwrap();
        assert_eq!(out.runs, vec![FormattedRun::plain("me")]);
        assert_eq!(
            out.splice,
            Splice {
                prefix_len: 0,
                suffix_len: 0,
                old_len: 5,
                new_len: 2
            }
        );
    }

    #[test]
    fn prefix_and_suffix_keep_their_formats() {
        let runs = vec![
            FormattedRun::bold("To: "),
            FormattedRun::plain("{recipient}"),
            italic(" (primary)"),
        ];
        let occs = occurrences(&runs);
        let out = replace(&runs, &occs[0], "Ann").unwrap();
        let before = build_run_index(&runs);
        let after = build_run_index(&out.runs);
        let s = out.splice;
        for i in 0..s.prefix_len {
            assert_eq!(after.format_at(i), before.format_at(i));
        }
        for k in 1..=s.suffix_len {
            assert_eq!(after.format_at(s.new_len - k), before.format_at(s.old_len - k));
        }
        assert_minimal(&out.runs);
    }

    #[test]
    fn stale_offsets_fail_without_change() {
        let runs = vec![FormattedRun::plain("Hello [Name]")];
        let mut occ = occurrences(&runs).remove(0);
        occ.start_offset -= 1;
        occ.end_offset -= 1;
        let err = replace(&runs, &occ, "x").unwrap_err();
        assert!(matches!(err, FillError::StaleOccurrence { .. }));

        let mut blank = occurrences(&[FormattedRun::plain("Name: ")]).remove(0);
        blank.start_offset = 3;
        assert!(matches!(
            replace(&runs, &blank, "x"),
            Err(FillError::StaleOccurrence { .. })
        ));
    }

    #[test]
    fn object_replacement_is_stripped_from_values() {
        let runs = vec![FormattedRun::plain("[X]")];
        let occs = occurrences(&runs);
        let out = replace(&runs, &occs[0], "a\u{FFFC}b").unwrap();
        assert_eq!(out.text, "ab");
    }

    #[test]
    fn many_targets_apply_last_to_first() {
        let runs = vec![
            FormattedRun::plain("[A] and "),
            FormattedRun::bold("[A]"),
            FormattedRun::plain(" end"),
        ];
        let occs = occurrences(&runs);
        let rewrite = replace_many(&runs, &[(&occs[0], "first"), (&occs[1], "second")]);
        assert!(rewrite.results.iter().all(Result::is_ok));
        assert_eq!(logical_text(&rewrite.runs), "first and second end");
        assert!(rewrite.changed());
        // Offset of " end" in the old text lands on " end" in the new text.
        assert_eq!(rewrite.remap(11), 16);
        assert_eq!(rewrite.remap(0), 0);
    }

    #[test]
    fn failed_target_does_not_block_others() {
        let runs = vec![FormattedRun::plain("[A] [B]")];
        let occs = occurrences(&runs);
        let mut bogus = occs[1].clone();
        bogus.text = "[C]".to_string();
        let rewrite = replace_many(&runs, &[(&occs[0], "a"), (&bogus, "c")]);
        assert!(rewrite.results[0].is_ok());
        assert!(rewrite.results[1].is_err());
        assert_eq!(logical_text(&rewrite.runs), "a [B]");
    }
}
