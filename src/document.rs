use std::collections::BTreeMap;

use anyhow::anyhow;

use crate::ir::{ContainerPath, FormattedRun};
use crate::replace::ParagraphRewrite;
use crate::runs::logical_text;

/// Paragraph-level view of a document the engine can read and rewrite.
///
/// Implementations own the run lists. The engine never mutates them in
/// place: it computes a new list and hands it back through
/// [`DocumentModel::replace_runs`].
pub trait DocumentModel {
    /// Every paragraph-like container, in document order.
    fn containers(&self) -> Vec<ContainerPath>;

    /// Current runs of one container, or `None` when it has no retrievable
    /// text (a malformed document).
    fn runs(&self, path: &ContainerPath) -> Option<&[FormattedRun]>;

    /// Swaps in the rewritten run list of one container.
    fn replace_runs(&mut self, path: &ContainerPath, rewrite: ParagraphRewrite)
        -> anyhow::Result<()>;

    fn text(&self, path: &ContainerPath) -> Option<String> {
        self.runs(path).map(logical_text)
    }
}

/// A document held as plain run lists, with no backing file.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDocument {
    containers: BTreeMap<ContainerPath, Vec<FormattedRun>>,
}

impl InMemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// One unformatted body paragraph per input string.
    pub fn from_paragraph_texts<S: AsRef<str>>(texts: &[S]) -> Self {
        let mut doc = Self::new();
        for (index, text) in texts.iter().enumerate() {
            doc.insert(
                ContainerPath::Paragraph { index },
                vec![FormattedRun::plain(text.as_ref())],
            );
        }
        doc
    }

    pub fn insert(&mut self, path: ContainerPath, runs: Vec<FormattedRun>) {
        let runs = runs.into_iter().filter(|r| !r.text.is_empty()).collect();
        self.containers.insert(path, runs);
    }
}

impl DocumentModel for InMemoryDocument {
    fn containers(&self) -> Vec<ContainerPath> {
        self.containers.keys().cloned().collect()
    }

    fn runs(&self, path: &ContainerPath) -> Option<&[FormattedRun]> {
        self.containers.get(path).map(Vec::as_slice)
    }

    fn replace_runs(
        &mut self,
        path: &ContainerPath,
        rewrite: ParagraphRewrite,
    ) -> anyhow::Result<()> {
        let slot = self
            .containers
            .get_mut(path)
            .ok_or_else(|| anyhow!("unknown container: {path}"))?;
        *slot = rewrite.runs;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containers_come_back_in_document_order() {
        let mut doc = InMemoryDocument::new();
        doc.insert(
            ContainerPath::TableCell {
                table: 0,
                row: 0,
                cell: 0,
                paragraph: 0,
            },
            vec![FormattedRun::plain("cell")],
        );
        doc.insert(
            ContainerPath::Paragraph { index: 0 },
            vec![FormattedRun::plain("a"), FormattedRun::plain(""), FormattedRun::bold("b")],
        );
        let paths = doc.containers();
        assert_eq!(paths[0], ContainerPath::Paragraph { index: 0 });
        assert_eq!(doc.text(&paths[0]).as_deref(), Some("ab"));
        assert_eq!(doc.runs(&paths[0]).map(|r| r.len()), Some(2));
        assert_eq!(doc.text(&paths[1]).as_deref(), Some("cell"));
    }

    #[test]
    fn replacing_unknown_container_fails() {
        let mut doc = InMemoryDocument::from_paragraph_texts(&["x"]);
        let err = doc
            .replace_runs(&ContainerPath::Paragraph { index: 4 }, ParagraphRewrite::default())
            .unwrap_err();
        assert!(err.to_string().contains("p[4]"));
    }
}
