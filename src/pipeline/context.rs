use std::collections::BTreeMap;

use serde::Serialize;

use crate::ir::PlaceholderOccurrence;
use crate::resolve::{DocumentOutline, FillKey};

/// What an external classifier sees of one occurrence.
#[derive(Clone, Debug, Serialize)]
pub struct OccurrenceContext {
    pub index: usize,
    /// Position among occurrences with the same text, counted from 0.
    pub occurrence_index: usize,
    /// Key that addresses exactly this occurrence (`text#N`).
    pub fill_key: String,
    #[serde(flatten)]
    pub occurrence: PlaceholderOccurrence,
    pub before: String,
    pub after: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ClassifierView {
    pub occurrences: Vec<OccurrenceContext>,
    /// Occurrence count per placeholder text.
    pub occurrences_summary: BTreeMap<String, usize>,
}

/// Attaches `window` characters of surrounding document text to every
/// occurrence. Containers are joined by `\n`, so a window may reach into
/// neighbouring paragraphs.
pub fn build_classifier_view(
    outline: &DocumentOutline,
    occurrences: &[PlaceholderOccurrence],
    window: usize,
) -> ClassifierView {
    let joined: Vec<char> = outline.joined_text().chars().collect();
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut view = ClassifierView::default();

    for (index, occ) in occurrences.iter().enumerate() {
        let counter = seen.entry(occ.text.clone()).or_insert(0);
        let occurrence_index = *counter;
        *counter += 1;

        let (before, after) = match outline.global_offset(&occ.container_path, occ.start_offset) {
            Some(start) => {
                let start = start.min(joined.len());
                let end = (start + occ.char_len()).min(joined.len());
                let from = start.saturating_sub(window);
                let to = (end + window).min(joined.len());
                (
                    joined[from..start].iter().collect(),
                    joined[end..to].iter().collect(),
                )
            }
            None => (String::new(), String::new()),
        };

        view.occurrences.push(OccurrenceContext {
            index,
            occurrence_index,
            fill_key: FillKey::nth(occ.text.clone(), occurrence_index).to_string(),
            occurrence: occ.clone(),
            before,
            after,
        });
    }
    view.occurrences_summary = seen;
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::PlaceholderDetector;
    use crate::ir::ContainerPath;

    fn scan(texts: &[&str]) -> (DocumentOutline, Vec<PlaceholderOccurrence>) {
        let detector = PlaceholderDetector::new();
        let mut entries = Vec::new();
        let mut occs = Vec::new();
        for (i, t) in texts.iter().enumerate() {
            let path = ContainerPath::Paragraph { index: i };
            occs.extend(detector.detect(t, &path));
            entries.push((path, t.to_string()));
        }
        (DocumentOutline::new(entries), occs)
    }

    #[test]
    fn windows_cross_paragraph_boundaries() {
        let (outline, occs) = scan(&["Seller", "Name: [Name]", "Buyer", "Name: [Name]"]);
        let view = build_classifier_view(&outline, &occs, 8);
        assert_eq!(view.occurrences.len(), 2);

        let second = &view.occurrences[1];
        assert_eq!(second.occurrence_index, 1);
        assert_eq!(second.fill_key, "[Name]#1");
        assert_eq!(second.before, "r\nName: ");
        assert_eq!(second.after, "");
        assert_eq!(view.occurrences[0].before, "r\nName: ");
        assert_eq!(view.occurrences[0].after, "\nBuyer\nN");
        assert_eq!(view.occurrences_summary.get("[Name]"), Some(&2));
    }

    #[test]
    fn zero_window_gives_empty_context() {
        let (outline, occs) = scan(&["Dear {{name}},"]);
        let view = build_classifier_view(&outline, &occs, 0);
        assert_eq!(view.occurrences[0].before, "");
        assert_eq!(view.occurrences[0].after, "");
    }

    #[test]
    fn serialized_view_flattens_occurrence() {
        let (outline, occs) = scan(&["Date: <date>"]);
        let json = serde_json::to_value(build_classifier_view(&outline, &occs, 5)).expect("json");
        let first = &json["occurrences"][0];
        assert_eq!(first["text"], "<date>");
        assert_eq!(first["before"], "ate: ");
        assert_eq!(first["occurrence_index"], 0);
    }
}
