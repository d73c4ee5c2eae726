use crate::ir::{FormattedRun, RunFormat};

/// A paragraph's runs flattened into one logical character string, with the
/// owning run of every character.
///
/// Built on demand for a single replacement and dropped afterwards.
#[derive(Clone, Debug)]
pub struct RunIndex<'a> {
    runs: &'a [FormattedRun],
    chars: Vec<char>,
    offset_to_run: Vec<usize>,
}

pub fn build_run_index(runs: &[FormattedRun]) -> RunIndex<'_> {
    let total: usize = runs.iter().map(|r| r.text.len()).sum();
    let mut chars: Vec<char> = Vec::with_capacity(total);
    let mut offset_to_run: Vec<usize> = Vec::with_capacity(total);
    for (run_idx, run) in runs.iter().enumerate() {
        for ch in run.text.chars() {
            chars.push(ch);
            offset_to_run.push(run_idx);
        }
    }
    RunIndex {
        runs,
        chars,
        offset_to_run,
    }
}

/// Concatenated text of a run list.
pub fn logical_text(runs: &[FormattedRun]) -> String {
    runs.iter().map(|r| r.text.as_str()).collect()
}

impl<'a> RunIndex<'a> {
    pub fn logical_text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn offset_to_run(&self) -> &[usize] {
        &self.offset_to_run
    }

    /// Index of the run that owns logical character `offset`.
    pub fn run_at(&self, offset: usize) -> Option<usize> {
        self.offset_to_run.get(offset).copied()
    }

    pub fn format_at(&self, offset: usize) -> Option<&'a RunFormat> {
        let runs = self.runs;
        self.run_at(offset).map(|i| &runs[i].format)
    }

    /// Characters `[start, end)` as a string; clamps to the text length.
    pub fn slice(&self, start: usize, end: usize) -> String {
        let end = end.min(self.chars.len());
        let start = start.min(end);
        self.chars[start..end].iter().collect()
    }
}

/// Char offset for every byte boundary of `text`, plus one entry for the end.
///
/// Regex matches report byte offsets; occurrences store char offsets.
pub(crate) fn char_offsets_by_byte(text: &str) -> Vec<usize> {
    let mut out = vec![0usize; text.len() + 1];
    let mut chars = 0usize;
    for (byte, ch) in text.char_indices() {
        for slot in out.iter_mut().skip(byte).take(ch.len_utf8()) {
            *slot = chars;
        }
        chars += 1;
    }
    out[text.len()] = chars;
    out
}
