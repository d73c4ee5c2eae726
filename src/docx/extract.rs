use anyhow::Context;

use crate::ir::{ContainerPath, FormattedRun, RunFormat, OBJECT_REPLACEMENT};

use super::xml::{subtree_end, write_events, XmlEvent, XmlPart};

/// One fillable paragraph of a WordprocessingML part.
///
/// Runs that only carry text, tabs and line breaks become [`FormattedRun`]s.
/// Everything else the paragraph holds is kept as verbatim markup: children
/// with visible content become anchors, each standing for one
/// [`OBJECT_REPLACEMENT`] character of the logical text, and the rest become
/// zero-width markers pinned to a character offset.
#[derive(Clone, Debug)]
pub struct DocxParagraph {
    pub path: ContainerPath,
    /// Event index of the opening `w:p` (equal to `end` for `<w:p/>`).
    pub start: usize,
    pub end: usize,
    pub ppr: Vec<XmlEvent>,
    pub runs: Vec<FormattedRun>,
    pub anchors: Vec<Vec<XmlEvent>>,
    pub markers: Vec<Marker>,
    pub dirty: bool,
}

#[derive(Clone, Debug)]
pub struct Marker {
    pub offset: usize,
    pub events: Vec<XmlEvent>,
}

#[derive(Default)]
struct TableCursor {
    depth: usize,
    table: Option<usize>,
    row: Option<usize>,
    cell: Option<usize>,
    cell_paragraph: usize,
}

impl TableCursor {
    fn enter(&mut self, name: &str) {
        match name {
            "w:tbl" => {
                self.depth += 1;
                if self.depth == 1 {
                    self.table = Some(self.table.map_or(0, |t| t + 1));
                    self.row = None;
                }
            }
            "w:tr" if self.depth == 1 => {
                self.row = Some(self.row.map_or(0, |r| r + 1));
                self.cell = None;
            }
            "w:tc" if self.depth == 1 => {
                self.cell = Some(self.cell.map_or(0, |c| c + 1));
                self.cell_paragraph = 0;
            }
            _ => {}
        }
    }

    fn leave(&mut self, name: &str) {
        if name == "w:tbl" {
            self.depth = self.depth.saturating_sub(1);
        }
    }

    fn next_cell_path(&mut self) -> ContainerPath {
        let path = ContainerPath::TableCell {
            table: self.table.unwrap_or(0),
            row: self.row.unwrap_or(0),
            cell: self.cell.unwrap_or(0),
            paragraph: self.cell_paragraph,
        };
        self.cell_paragraph += 1;
        path
    }
}

/// Finds every body and table-cell paragraph of `part`, in event order.
pub fn extract_paragraphs(part: &XmlPart) -> anyhow::Result<Vec<DocxParagraph>> {
    let events = &part.events;
    let mut out: Vec<DocxParagraph> = Vec::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut tables = TableCursor::default();
    let mut body_index = 0usize;

    let mut i = 0usize;
    while i < events.len() {
        match &events[i] {
            XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. }
                if name == "w:p" && is_container_parent(stack.last().copied()) =>
            {
                let path = if tables.depth > 0 {
                    tables.next_cell_path()
                } else {
                    body_index += 1;
                    ContainerPath::Paragraph {
                        index: body_index - 1,
                    }
                };
                let end = subtree_end(events, i)
                    .with_context(|| format!("{}: paragraph {path}", part.name))?;
                out.push(parse_paragraph(events, i, end, path)?);
                i = end + 1;
                continue;
            }
            XmlEvent::Start { name, .. } => {
                tables.enter(name);
                stack.push(name.as_str());
            }
            XmlEvent::End { name } => {
                tables.leave(name);
                let _ = stack.pop();
            }
            _ => {}
        }
        i += 1;
    }
    Ok(out)
}

fn is_container_parent(parent: Option<&str>) -> bool {
    matches!(parent, Some("w:body" | "w:tc" | "w:sdtContent"))
}

fn parse_paragraph(
    events: &[XmlEvent],
    start: usize,
    end: usize,
    path: ContainerPath,
) -> anyhow::Result<DocxParagraph> {
    let mut para = DocxParagraph {
        path,
        start,
        end,
        ppr: Vec::new(),
        runs: Vec::new(),
        anchors: Vec::new(),
        markers: Vec::new(),
        dirty: false,
    };
    let mut offset = 0usize;

    let mut j = start + 1;
    while j < end {
        let child_end = match &events[j] {
            XmlEvent::Start { .. } | XmlEvent::Empty { .. } => subtree_end(events, j)?,
            _ => j,
        };
        let child = &events[j..=child_end];
        match events[j].name() {
            Some("w:pPr") => para.ppr = child.to_vec(),
            Some("w:r") => match text_run(child)? {
                Some(run) => {
                    offset += run.text.chars().count();
                    if !run.text.is_empty() {
                        para.runs.push(run);
                    }
                }
                None => {
                    let format = run_format(child)?;
                    para.runs.push(FormattedRun::new(OBJECT_REPLACEMENT.to_string(), format));
                    para.anchors.push(child.to_vec());
                    offset += 1;
                }
            },
            Some(name) if has_visible_content(name, child) => {
                para.runs.push(FormattedRun::plain(OBJECT_REPLACEMENT.to_string()));
                para.anchors.push(child.to_vec());
                offset += 1;
            }
            _ => para.markers.push(Marker {
                offset,
                events: child.to_vec(),
            }),
        }
        j = child_end + 1;
    }
    Ok(para)
}

/// Reads a `w:r` that holds nothing but formatting, text, tabs and line
/// breaks. Any other content makes the run opaque (`None`).
fn text_run(run: &[XmlEvent]) -> anyhow::Result<Option<FormattedRun>> {
    let mut text = String::new();
    let mut format = RunFormat::default();
    if run.len() < 2 {
        return Ok(Some(FormattedRun::new(text, format)));
    }

    let last = run.len() - 1;
    let mut j = 1usize;
    while j < last {
        let child_end = match &run[j] {
            XmlEvent::Start { .. } | XmlEvent::Empty { .. } => subtree_end(run, j)?,
            _ => j,
        };
        let child = &run[j..=child_end];
        match &run[j] {
            XmlEvent::Text { text: t } if t.trim().is_empty() => {}
            XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } => match name.as_str() {
                "w:rPr" => format = parse_rpr(child)?,
                "w:t" => {
                    for ev in child {
                        if let XmlEvent::Text { text: t } | XmlEvent::CData { text: t } = ev {
                            text.push_str(t);
                        }
                    }
                }
                "w:tab" => text.push('\t'),
                "w:cr" => text.push('\n'),
                "w:br" if is_text_wrapping_break(run[j].attrs()) => text.push('\n'),
                "w:lastRenderedPageBreak" => {}
                _ => return Ok(None),
            },
            _ => return Ok(None),
        }
        j = child_end + 1;
    }
    if text.contains(OBJECT_REPLACEMENT) {
        return Ok(None);
    }
    Ok(Some(FormattedRun::new(text, format)))
}

fn is_text_wrapping_break(attrs: &[(String, String)]) -> bool {
    matches!(find_attr(attrs, "w:type"), None | Some("textWrapping"))
}

fn run_format(run: &[XmlEvent]) -> anyhow::Result<RunFormat> {
    let mut depth = 0usize;
    for (j, ev) in run.iter().enumerate() {
        match ev {
            XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. }
                if depth == 1 && name == "w:rPr" =>
            {
                let end = subtree_end(run, j)?;
                return parse_rpr(&run[j..=end]);
            }
            XmlEvent::Start { .. } => depth += 1,
            XmlEvent::End { .. } => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(RunFormat::default())
}

fn has_visible_content(name: &str, child: &[XmlEvent]) -> bool {
    if matches!(name, "w:del" | "w:moveFrom") {
        return false;
    }
    child
        .iter()
        .any(|ev| matches!(ev.name(), Some("w:r" | "m:r")))
}

/// Reads the direct properties of a `w:rPr` subtree and keeps its markup.
fn parse_rpr(rpr: &[XmlEvent]) -> anyhow::Result<RunFormat> {
    let mut format = RunFormat::default();
    let mut depth = 0usize;
    for ev in rpr {
        match ev {
            XmlEvent::Start { name, attrs } => {
                if depth == 1 {
                    parse_w_rpr_property(&mut format, name, attrs);
                }
                depth += 1;
            }
            XmlEvent::Empty { name, attrs } if depth == 1 => {
                parse_w_rpr_property(&mut format, name, attrs);
            }
            XmlEvent::End { .. } => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    let mut raw = Vec::new();
    write_events(&mut raw, rpr)?;
    format.raw_props = Some(String::from_utf8(raw).context("run properties utf8")?);
    Ok(format)
}

pub(crate) fn find_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn parse_w_rpr_property(format: &mut RunFormat, name: &str, attrs: &[(String, String)]) {
    match name {
        "w:b" => format.bold = Some(parse_w_bool(attrs)),
        "w:i" => format.italic = Some(parse_w_bool(attrs)),
        "w:u" => {
            format.underline = Some(!matches!(find_attr(attrs, "w:val"), Some("none")));
        }
        "w:color" => format.color = find_attr(attrs, "w:val").map(|v| v.to_string()),
        "w:sz" => format.font_size = find_attr(attrs, "w:val").and_then(|v| v.trim().parse().ok()),
        "w:rFonts" => {
            format.font_name = find_attr(attrs, "w:ascii")
                .or_else(|| find_attr(attrs, "w:hAnsi"))
                .map(|v| v.to_string());
        }
        _ => {}
    }
}

fn parse_w_bool(attrs: &[(String, String)]) -> bool {
    if let Some(v) = find_attr(attrs, "w:val") {
        let s = v.trim().to_ascii_lowercase();
        return !(s == "0" || s == "false" || s == "off" || s == "none");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::xml::parse_xml_part;
    use crate::runs::logical_text;

    fn part(body: &str) -> XmlPart {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="urn:w"><w:body>{body}<w:sectPr/></w:body></w:document>"#
        );
        parse_xml_part("word/document.xml", xml.as_bytes()).expect("parse")
    }

    #[test]
    fn reads_runs_tabs_and_breaks_with_formatting() {
        let p = part(
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:rPr><w:b/><w:sz w:val="28"/><w:rFonts w:ascii="Arial"/></w:rPr><w:t>Email:</w:t></w:r><w:r><w:tab/><w:t xml:space="preserve"> x</w:t><w:br/><w:t>y</w:t></w:r></w:p>"#,
        );
        let paras = extract_paragraphs(&p).expect("extract");
        assert_eq!(paras.len(), 1);
        let para = &paras[0];
        assert_eq!(para.path, ContainerPath::Paragraph { index: 0 });
        assert_eq!(para.ppr.len(), 3);
        assert_eq!(logical_text(&para.runs), "Email:\t x\ny");
        let f = &para.runs[0].format;
        assert_eq!(f.bold, Some(true));
        assert_eq!(f.font_size, Some(28));
        assert_eq!(f.font_name.as_deref(), Some("Arial"));
        assert!(f.raw_props.as_deref().is_some_and(|r| r.starts_with("<w:rPr>")));
        assert!(para.runs[1].format.is_default());
    }

    #[test]
    fn opaque_content_becomes_anchors_and_markers() {
        let p = part(
            r#"<w:p><w:bookmarkStart w:id="0" w:name="a"/><w:r><w:t>Go </w:t></w:r><w:hyperlink r:id="rId5"><w:r><w:t>here</w:t></w:r></w:hyperlink><w:r><w:drawing/></w:r><w:r><w:br w:type="page"/></w:r><w:bookmarkEnd w:id="0"/></w:p>"#,
        );
        let paras = extract_paragraphs(&p).expect("extract");
        let para = &paras[0];
        assert_eq!(logical_text(&para.runs), "Go \u{FFFC}\u{FFFC}\u{FFFC}");
        assert_eq!(para.anchors.len(), 3);
        assert_eq!(para.markers.len(), 2);
        assert_eq!(para.markers[0].offset, 0);
        assert_eq!(para.markers[1].offset, 6);
    }

    #[test]
    fn table_cells_follow_top_level_table() {
        let p = part(
            r#"<w:p/><w:tbl><w:tr><w:tc><w:p><w:r><w:t>a</w:t></w:r></w:p></w:tc><w:tc><w:p/><w:p><w:r><w:t>b</w:t></w:r></w:p></w:tc></w:tr><w:tr><w:tc><w:tbl><w:tr><w:tc><w:p><w:r><w:t>nested</w:t></w:r></w:p></w:tc></w:tr></w:tbl><w:p/></w:tc></w:tr></w:tbl><w:p><w:r><w:t>after</w:t></w:r></w:p><w:tbl><w:tr><w:tc><w:p/></w:tc></w:tr></w:tbl>"#,
        );
        let paths: Vec<String> = extract_paragraphs(&p)
            .expect("extract")
            .iter()
            .map(|p| p.path.to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "p[0]",
                "t[0].r[0].c[0].p[0]",
                "t[0].r[0].c[1].p[0]",
                "t[0].r[0].c[1].p[1]",
                "t[0].r[1].c[0].p[0]",
                "t[0].r[1].c[0].p[1]",
                "p[1]",
                "t[1].r[0].c[0].p[0]",
            ]
        );
    }

    #[test]
    fn underline_none_and_bool_off() {
        let p = part(
            r#"<w:p><w:r><w:rPr><w:b w:val="0"/><w:u w:val="none"/><w:color w:val="FF0000"/></w:rPr><w:t>z</w:t></w:r></w:p>"#,
        );
        let paras = extract_paragraphs(&p).expect("extract");
        let f = &paras[0].runs[0].format;
        assert_eq!(f.bold, Some(false));
        assert_eq!(f.underline, Some(false));
        assert_eq!(f.color.as_deref(), Some("FF0000"));
    }
}
