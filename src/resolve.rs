use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::error::FillError;
use crate::ir::{ContainerPath, PlaceholderOccurrence};

pub const DEFAULT_ANCHOR_LOOKBACK: usize = 20;

const LEGACY_POS_MARKER: &str = "__pos_";

/// Which occurrence of a placeholder text a fill key addresses.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FillSelector {
    /// Bare placeholder text.
    First,
    /// 0-based rank among occurrences with the same text.
    Nth(usize),
    /// First occurrence preceded by a container mentioning the keyword.
    Anchored(String),
}

/// A parsed fill key.
///
/// Accepted spellings: `text`, `text#N`, `text__pos_N` and `text#@keyword`.
/// Anything that does not parse as a qualified key is taken verbatim as
/// placeholder text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FillKey {
    pub text: String,
    pub selector: FillSelector,
}

impl FillKey {
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selector: FillSelector::First,
        }
    }

    pub fn nth(text: impl Into<String>, index: usize) -> Self {
        Self {
            text: text.into(),
            selector: FillSelector::Nth(index),
        }
    }

    pub fn anchored(text: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selector: FillSelector::Anchored(keyword.into()),
        }
    }

    pub fn parse(raw: &str) -> Self {
        if let Some(pos) = raw.rfind(LEGACY_POS_MARKER) {
            let (text, rest) = raw.split_at(pos);
            if let Some(n) = parse_index(&rest[LEGACY_POS_MARKER.len()..]) {
                if !text.is_empty() {
                    return Self::nth(text, n);
                }
            }
        }
        if let Some(pos) = raw.rfind('#') {
            let (text, rest) = (&raw[..pos], &raw[pos + 1..]);
            if !text.is_empty() {
                if let Some(n) = parse_index(rest) {
                    return Self::nth(text, n);
                }
                if let Some(keyword) = rest.strip_prefix('@') {
                    let keyword = keyword.trim();
                    if !keyword.is_empty() {
                        return Self::anchored(text, keyword);
                    }
                }
            }
        }
        Self::raw(raw)
    }

    pub fn is_raw(&self) -> bool {
        self.selector == FillSelector::First
    }
}

impl fmt::Display for FillKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            FillSelector::First => write!(f, "{}", self.text),
            FillSelector::Nth(n) => write!(f, "{}#{n}", self.text),
            FillSelector::Anchored(keyword) => write!(f, "{}#@{keyword}", self.text),
        }
    }
}

fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Index into the occurrence list a resolver was handed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OccurrenceHandle(pub usize);

/// Plain text of every container in document order.
///
/// Used for section anchors and for classifier context windows.
#[derive(Clone, Debug, Default)]
pub struct DocumentOutline {
    entries: Vec<(ContainerPath, String)>,
    positions: HashMap<ContainerPath, usize>,
    lowered: Vec<String>,
    /// Char offset of each container within `joined_text()`.
    starts: Vec<usize>,
}

impl DocumentOutline {
    pub fn new(mut entries: Vec<(ContainerPath, String)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut positions = HashMap::with_capacity(entries.len());
        let mut lowered = Vec::with_capacity(entries.len());
        let mut starts = Vec::with_capacity(entries.len());
        let mut cursor = 0usize;
        for (i, (path, text)) in entries.iter().enumerate() {
            positions.insert(path.clone(), i);
            lowered.push(text.to_lowercase());
            starts.push(cursor);
            cursor += text.chars().count() + 1;
        }
        Self {
            entries,
            positions,
            lowered,
            starts,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(ContainerPath, String)] {
        &self.entries
    }

    pub fn position(&self, path: &ContainerPath) -> Option<usize> {
        self.positions.get(path).copied()
    }

    pub fn text(&self, path: &ContainerPath) -> Option<&str> {
        self.position(path).map(|i| self.entries[i].1.as_str())
    }

    /// All container texts joined with `\n`.
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for (i, (_, text)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(text);
        }
        out
    }

    /// Maps a container-local char offset into `joined_text()` coordinates.
    pub fn global_offset(&self, path: &ContainerPath, local: usize) -> Option<usize> {
        self.position(path).map(|i| self.starts[i] + local)
    }

    /// Whether one of the `lookback` containers strictly before `path`
    /// mentions `keyword` (case-insensitive).
    pub fn anchored_by(&self, path: &ContainerPath, keyword: &str, lookback: usize) -> bool {
        let Some(pos) = self.position(path) else {
            return false;
        };
        let needle = keyword.to_lowercase();
        if needle.is_empty() {
            return false;
        }
        let from = pos.saturating_sub(lookback);
        self.lowered[from..pos].iter().any(|t| t.contains(&needle))
    }
}

/// How many occurrences a bare placeholder key fills in a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RawKeyScope {
    /// Only the first occurrence not claimed by a qualified key.
    #[default]
    FirstUnresolved,
    /// Every occurrence not claimed by a qualified key.
    AllUnresolved,
}

impl RawKeyScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(RawKeyScope::AllUnresolved),
            "first" => Some(RawKeyScope::FirstUnresolved),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    /// Position of the fill key in the request.
    pub key_index: usize,
    pub handle: OccurrenceHandle,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyFailure {
    pub key_index: usize,
    pub error: FillError,
}

#[derive(Clone, Debug, Default)]
pub struct BatchResolution {
    pub keys: Vec<FillKey>,
    pub assignments: Vec<Assignment>,
    pub failures: Vec<KeyFailure>,
}

impl BatchResolution {
    pub fn failure_for(&self, key_index: usize) -> Option<&FillError> {
        self.failures
            .iter()
            .find(|f| f.key_index == key_index)
            .map(|f| &f.error)
    }

    pub fn applied_count(&self, key_index: usize) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.key_index == key_index)
            .count()
    }
}

#[derive(Clone, Debug)]
pub struct OccurrenceResolver<'o> {
    outline: &'o DocumentOutline,
    anchor_lookback: usize,
    raw_key_scope: RawKeyScope,
}

impl<'o> OccurrenceResolver<'o> {
    pub fn new(outline: &'o DocumentOutline) -> Self {
        Self {
            outline,
            anchor_lookback: DEFAULT_ANCHOR_LOOKBACK,
            raw_key_scope: RawKeyScope::default(),
        }
    }

    pub fn with_anchor_lookback(mut self, lookback: usize) -> Self {
        self.anchor_lookback = lookback;
        self
    }

    pub fn with_raw_key_scope(mut self, scope: RawKeyScope) -> Self {
        self.raw_key_scope = scope;
        self
    }

    /// Resolves one key against `occurrences`, which must be in document order.
    pub fn resolve(
        &self,
        occurrences: &[PlaceholderOccurrence],
        key: &FillKey,
    ) -> Option<OccurrenceHandle> {
        let mut matching = occurrences
            .iter()
            .enumerate()
            .filter(|(_, occ)| occ.matches_key_text(&key.text));
        let found = match &key.selector {
            FillSelector::First => matching.next(),
            FillSelector::Nth(n) => matching.nth(*n),
            FillSelector::Anchored(keyword) => matching.find(|(_, occ)| {
                self.outline
                    .anchored_by(&occ.container_path, keyword, self.anchor_lookback)
            }),
        };
        found.map(|(i, _)| OccurrenceHandle(i))
    }

    /// Resolves a whole fill request.
    ///
    /// Qualified keys (`#N`, `#@keyword`) are resolved first; bare keys then
    /// take what is left. An occurrence wanted by two keys goes to neither, and
    /// both keys fail with `DuplicateResolution`.
    pub fn resolve_batch(
        &self,
        occurrences: &[PlaceholderOccurrence],
        request: &[(String, String)],
    ) -> BatchResolution {
        let keys: Vec<FillKey> = request.iter().map(|(k, _)| FillKey::parse(k)).collect();
        let mut failures: Vec<KeyFailure> = Vec::new();
        let mut failed: HashSet<usize> = HashSet::new();

        let mut qualified: BTreeMap<OccurrenceHandle, Vec<usize>> = BTreeMap::new();
        for (ki, key) in keys.iter().enumerate() {
            if key.is_raw() {
                continue;
            }
            match self.resolve(occurrences, key) {
                Some(handle) => qualified.entry(handle).or_default().push(ki),
                None => {
                    failed.insert(ki);
                    failures.push(KeyFailure {
                        key_index: ki,
                        error: FillError::OccurrenceNotFound {
                            key: request[ki].0.clone(),
                        },
                    });
                }
            }
        }

        // Every occurrence some qualified key landed on, contested or not, is
        // off limits to bare keys.
        let taken: HashSet<OccurrenceHandle> = qualified.keys().copied().collect();

        let mut wanted: BTreeMap<OccurrenceHandle, Vec<usize>> = qualified;
        for (ki, key) in keys.iter().enumerate() {
            if !key.is_raw() {
                continue;
            }
            let mut free = occurrences
                .iter()
                .enumerate()
                .filter(|(i, occ)| {
                    occ.matches_key_text(&key.text) && !taken.contains(&OccurrenceHandle(*i))
                })
                .map(|(i, _)| OccurrenceHandle(i));
            let claims: Vec<OccurrenceHandle> = match self.raw_key_scope {
                RawKeyScope::AllUnresolved => free.collect(),
                RawKeyScope::FirstUnresolved => free.next().into_iter().collect(),
            };
            if claims.is_empty() {
                failed.insert(ki);
                failures.push(KeyFailure {
                    key_index: ki,
                    error: FillError::OccurrenceNotFound {
                        key: request[ki].0.clone(),
                    },
                });
                continue;
            }
            for handle in claims {
                wanted.entry(handle).or_default().push(ki);
            }
        }

        let mut duplicated: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for claimants in wanted.values().filter(|c| c.len() > 1) {
            for &ki in claimants {
                let others = duplicated.entry(ki).or_default();
                for &other in claimants.iter().filter(|&&o| o != ki) {
                    let name = &request[other].0;
                    if !others.contains(name) {
                        others.push(name.clone());
                    }
                }
            }
        }
        for (ki, others) in duplicated {
            failed.insert(ki);
            failures.push(KeyFailure {
                key_index: ki,
                error: FillError::DuplicateResolution {
                    key: request[ki].0.clone(),
                    others,
                },
            });
        }

        let mut assignments: Vec<Assignment> = Vec::new();
        for (handle, claimants) in wanted {
            if let &[ki] = claimants.as_slice() {
                if !failed.contains(&ki) {
                    assignments.push(Assignment {
                        key_index: ki,
                        handle,
                        value: request[ki].1.clone(),
                    });
                }
            }
        }

        failures.sort_by_key(|f| f.key_index);
        BatchResolution {
            keys,
            assignments,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::PlaceholderDetector;

    fn scan(texts: &[&str]) -> (DocumentOutline, Vec<PlaceholderOccurrence>) {
        let detector = PlaceholderDetector::new();
        let entries: Vec<(ContainerPath, String)> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| (ContainerPath::Paragraph { index: i }, t.to_string()))
            .collect();
        let occs = entries
            .iter()
            .flat_map(|(path, text)| detector.detect(text, path))
            .collect();
        (DocumentOutline::new(entries), occs)
    }

    fn request(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_key_grammar() {
        assert_eq!(FillKey::parse("[Name]"), FillKey::raw("[Name]"));
        assert_eq!(FillKey::parse("Address: #1"), FillKey::nth("Address: ", 1));
        assert_eq!(FillKey::parse("Address: __pos_3"), FillKey::nth("Address: ", 3));
        assert_eq!(
            FillKey::parse("Address: #@ Investor"),
            FillKey::anchored("Address: ", "Investor")
        );
        // Not a qualifier: kept verbatim.
        assert_eq!(FillKey::parse("#3"), FillKey::raw("#3"));
        assert_eq!(FillKey::parse("[Item #x]"), FillKey::raw("[Item #x]"));
        assert_eq!(FillKey::parse("{{a}}#@"), FillKey::raw("{{a}}#@"));
        assert_eq!(FillKey::nth("Address: ", 1).to_string(), "Address: #1");
        assert_eq!(FillKey::anchored("[X]", "buyer").to_string(), "[X]#@buyer");
    }

    #[test]
    fn indexed_keys_pick_distinct_occurrences() {
        let (outline, occs) = scan(&["Address: ", "Address: "]);
        let resolver = OccurrenceResolver::new(&outline);
        let batch = resolver.resolve_batch(
            &occs,
            &request(&[("Address: #0", "123 A St"), ("Address: #1", "456 B Ave")]),
        );
        assert!(batch.failures.is_empty(), "{:?}", batch.failures);
        assert_eq!(batch.assignments.len(), 2);
        assert_eq!(batch.assignments[0].handle, OccurrenceHandle(0));
        assert_eq!(batch.assignments[0].value, "123 A St");
        assert_eq!(batch.assignments[1].handle, OccurrenceHandle(1));
        assert_eq!(batch.assignments[1].value, "456 B Ave");
    }

    #[test]
    fn out_of_range_index_is_not_found_and_others_still_apply() {
        let (outline, occs) = scan(&["Fee: $[_____________]", "Cap: $[_____________]"]);
        let resolver = OccurrenceResolver::new(&outline);
        let batch = resolver.resolve_batch(
            &occs,
            &request(&[
                ("[_____________]#0", "100000"),
                ("[_____________]#2", "9"),
            ]),
        );
        assert_eq!(batch.assignments.len(), 1);
        assert_eq!(batch.assignments[0].handle, OccurrenceHandle(0));
        assert!(matches!(
            batch.failure_for(1),
            Some(FillError::OccurrenceNotFound { key }) if key == "[_____________]#2"
        ));
    }

    #[test]
    fn two_anchors_on_one_occurrence_fail_both() {
        let (outline, occs) = scan(&["COMPANY", "INVESTOR", "Address: "]);
        let resolver = OccurrenceResolver::new(&outline);
        let batch = resolver.resolve_batch(
            &occs,
            &request(&[
                ("Address: #@company", "123 A St"),
                ("Address: #@investor", "456 B Ave"),
            ]),
        );
        assert!(batch.assignments.is_empty());
        assert_eq!(batch.failures.len(), 2);
        for f in &batch.failures {
            assert!(matches!(f.error, FillError::DuplicateResolution { .. }));
        }
    }

    #[test]
    fn anchor_respects_lookback_window() {
        let (outline, occs) = scan(&["Company", "filler", "filler", "Name: "]);
        let near = OccurrenceResolver::new(&outline).with_anchor_lookback(3);
        let far = OccurrenceResolver::new(&outline).with_anchor_lookback(2);
        let key = FillKey::anchored("Name: ", "COMPANY");
        assert_eq!(near.resolve(&occs, &key), Some(OccurrenceHandle(0)));
        assert_eq!(far.resolve(&occs, &key), None);
    }

    #[test]
    fn anchored_key_skips_unanchored_candidates() {
        let (outline, occs) = scan(&["Seller", "Name: ", "Buyer", "Name: "]);
        let resolver = OccurrenceResolver::new(&outline).with_anchor_lookback(1);
        let handle = resolver.resolve(&occs, &FillKey::anchored("Name:", "buyer"));
        assert_eq!(handle, Some(OccurrenceHandle(1)));
        assert_eq!(occs[1].container_path, ContainerPath::Paragraph { index: 3 });
    }

    #[test]
    fn bare_key_fills_what_qualified_keys_leave() {
        let (outline, occs) = scan(&["[Date]", "[Date]", "[Date]"]);
        let resolver = OccurrenceResolver::new(&outline);
        let batch = resolver.resolve_batch(&occs, &request(&[("[Date]", "today"), ("[Date]#0", "x")]));
        assert!(batch.failures.is_empty(), "{:?}", batch.failures);
        assert_eq!(batch.applied_count(0), 1);
        assert_eq!(
            batch.assignments.iter().find(|a| a.key_index == 0).map(|a| a.handle),
            Some(OccurrenceHandle(1))
        );
    }

    #[test]
    fn bare_key_fills_only_the_first_by_default() {
        let (outline, occs) = scan(&["[Name]", "[Name]"]);
        let resolver = OccurrenceResolver::new(&outline);
        let batch = resolver.resolve_batch(&occs, &request(&[("[Name]", "Jo")]));
        assert_eq!(batch.assignments.len(), 1);
        assert_eq!(batch.assignments[0].handle, OccurrenceHandle(0));
    }

    #[test]
    fn all_scope_fills_every_unclaimed_occurrence() {
        let (outline, occs) = scan(&["[Date]", "[Date]", "[Date]"]);
        let all = OccurrenceResolver::new(&outline).with_raw_key_scope(RawKeyScope::AllUnresolved);
        let batch = all.resolve_batch(&occs, &request(&[("[Date]", "today"), ("[Date]#1", "x")]));
        assert!(batch.failures.is_empty());
        let mut handles: Vec<(usize, usize)> = batch
            .assignments
            .iter()
            .map(|a| (a.handle.0, a.key_index))
            .collect();
        handles.sort();
        assert_eq!(handles, vec![(0, 0), (1, 1), (2, 0)]);
        assert_eq!(batch.applied_count(0), 2);
    }

    #[test]
    fn label_spellings_collide() {
        let (outline, occs) = scan(&["Email:"]);
        let resolver = OccurrenceResolver::new(&outline);
        let batch = resolver.resolve_batch(&occs, &request(&[("Email:", "a"), ("Email: ", "b")]));
        assert!(batch.assignments.is_empty());
        assert!(matches!(
            batch.failure_for(0),
            Some(FillError::DuplicateResolution { others, .. }) if others == &vec!["Email: ".to_string()]
        ));
    }

    #[test]
    fn unknown_text_is_not_found() {
        let (outline, occs) = scan(&["Name: [Name]"]);
        let resolver = OccurrenceResolver::new(&outline);
        let batch = resolver.resolve_batch(&occs, &request(&[("[Missing]", "x"), ("[Name]", "Bo")]));
        assert_eq!(batch.assignments.len(), 1);
        assert!(matches!(batch.failure_for(0), Some(FillError::OccurrenceNotFound { .. })));
    }

    #[test]
    fn outline_offsets_follow_joined_text() {
        let outline = DocumentOutline::new(vec![
            (ContainerPath::Paragraph { index: 1 }, "dé".to_string()),
            (ContainerPath::Paragraph { index: 0 }, "abc".to_string()),
        ]);
        assert_eq!(outline.joined_text(), "abc\ndé");
        assert_eq!(outline.global_offset(&ContainerPath::Paragraph { index: 1 }, 1), Some(5));
        assert_eq!(outline.text(&ContainerPath::Paragraph { index: 0 }), Some("abc"));
    }
}
