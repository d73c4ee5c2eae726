pub mod apply;
pub mod extract;
pub mod package;
pub mod xml;

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek};
use std::path::Path;

use anyhow::{anyhow, Context};

use crate::document::DocumentModel;
use crate::ir::{ContainerPath, FormattedRun, OBJECT_REPLACEMENT};
use crate::replace::ParagraphRewrite;

use self::apply::apply_paragraphs;
use self::extract::{extract_paragraphs, DocxParagraph};
use self::package::{DocxPackage, MAIN_DOCUMENT_PART};
use self::xml::{parse_xml_part, write_xml_part, XmlPart};

/// A .docx file seen through [`DocumentModel`]: the body and table-cell
/// paragraphs of `word/document.xml`.
pub struct DocxDocument {
    package: DocxPackage,
    part: XmlPart,
    paragraphs: Vec<DocxParagraph>,
    by_path: BTreeMap<ContainerPath, usize>,
}

impl DocxDocument {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let package = DocxPackage::read(path)?;
        Self::from_package(package).with_context(|| format!("load docx: {}", path.display()))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        Self::from_package(DocxPackage::from_reader(reader)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> anyhow::Result<Self> {
        Self::from_package(DocxPackage::from_bytes(bytes)?)
    }

    pub fn from_package(package: DocxPackage) -> anyhow::Result<Self> {
        let entry = package
            .entry(MAIN_DOCUMENT_PART)
            .ok_or_else(|| anyhow!("missing part: {MAIN_DOCUMENT_PART}"))?;
        let part = parse_xml_part(&entry.name, &entry.data)?;
        let paragraphs = extract_paragraphs(&part)?;
        let by_path = paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| (p.path.clone(), i))
            .collect();
        Ok(Self {
            package,
            part,
            paragraphs,
            by_path,
        })
    }

    pub fn dirty_count(&self) -> usize {
        self.paragraphs.iter().filter(|p| p.dirty).count()
    }

    /// The main document part with every rewritten paragraph written back.
    pub fn render_main_part(&self) -> anyhow::Result<Vec<u8>> {
        let mut part = self.part.clone();
        apply_paragraphs(&mut part, &self.paragraphs)?;
        write_xml_part(&part)
    }

    fn replacements(&self) -> anyhow::Result<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::new();
        if self.dirty_count() > 0 {
            out.insert(self.part.name.clone(), self.render_main_part()?);
        }
        Ok(out)
    }

    pub fn save(&self, output: &Path) -> anyhow::Result<()> {
        let replacements = self.replacements()?;
        self.package
            .write_with_replacements(output, &replacements)
            .with_context(|| format!("write docx: {}", output.display()))
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        self.package.to_bytes(&self.replacements()?)
    }
}

impl DocumentModel for DocxDocument {
    fn containers(&self) -> Vec<ContainerPath> {
        self.by_path.keys().cloned().collect()
    }

    fn runs(&self, path: &ContainerPath) -> Option<&[FormattedRun]> {
        self.by_path
            .get(path)
            .map(|&i| self.paragraphs[i].runs.as_slice())
    }

    fn replace_runs(
        &mut self,
        path: &ContainerPath,
        rewrite: ParagraphRewrite,
    ) -> anyhow::Result<()> {
        let &i = self
            .by_path
            .get(path)
            .ok_or_else(|| anyhow!("unknown container: {path}"))?;
        let para = &mut self.paragraphs[i];
        let objects = rewrite
            .runs
            .iter()
            .flat_map(|r| r.text.chars())
            .filter(|&c| c == OBJECT_REPLACEMENT)
            .count();
        if objects != para.anchors.len() {
            return Err(anyhow!(
                "{path}: rewrite keeps {objects} of {} inline objects",
                para.anchors.len()
            ));
        }
        for marker in &mut para.markers {
            marker.offset = rewrite.remap(marker.offset);
        }
        para.runs = rewrite.runs;
        para.dirty = true;
        Ok(())
    }
}
