use anyhow::{anyhow, Context};

use crate::ir::{RunFormat, OBJECT_REPLACEMENT};

use super::extract::DocxParagraph;
use super::xml::{parse_xml_fragment, verify_structure_unchanged, XmlEvent, XmlPart};

/// Writes every dirty paragraph back into `part`, last to first so earlier
/// event indices stay valid, then checks that nothing outside the rewritten
/// runs moved.
pub fn apply_paragraphs(part: &mut XmlPart, paragraphs: &[DocxParagraph]) -> anyhow::Result<()> {
    let mut dirty: Vec<&DocxParagraph> = paragraphs.iter().filter(|p| p.dirty).collect();
    dirty.sort_by_key(|p| std::cmp::Reverse(p.start));
    for para in dirty {
        let opening = part
            .events
            .get(para.start)
            .with_context(|| format!("paragraph {} start out of range", para.path))?;
        let rendered =
            render_paragraph(opening, para).with_context(|| format!("render {}", para.path))?;
        part.events.splice(para.start..=para.end, rendered);
    }
    verify_structure_unchanged(part)
}

/// Markup for a whole `w:p`: its properties, then the runs with anchors and
/// markers put back where the logical text places them.
pub fn render_paragraph(opening: &XmlEvent, para: &DocxParagraph) -> anyhow::Result<Vec<XmlEvent>> {
    let attrs = opening.attrs().to_vec();
    let mut out: Vec<XmlEvent> = vec![XmlEvent::Start {
        name: "w:p".to_string(),
        attrs,
    }];
    out.extend(para.ppr.iter().cloned());

    let mut anchors = para.anchors.iter();
    let mut markers = para.markers.iter().peekable();
    let mut offset = 0usize;
    for run in &para.runs {
        let mut pending = RunWriter::new(&run.format);
        for ch in run.text.chars() {
            while let Some(m) = markers.next_if(|m| m.offset <= offset) {
                pending.flush_into(&mut out)?;
                out.extend(m.events.iter().cloned());
            }
            if ch == OBJECT_REPLACEMENT {
                pending.flush_into(&mut out)?;
                let anchor = anchors
                    .next()
                    .ok_or_else(|| anyhow!("more object characters than anchors"))?;
                out.extend(anchor.iter().cloned());
            } else {
                pending.push(ch);
            }
            offset += 1;
        }
        pending.flush_into(&mut out)?;
    }
    for m in markers {
        out.extend(m.events.iter().cloned());
    }
    if anchors.next().is_some() {
        return Err(anyhow!("anchors left over after the last object character"));
    }

    out.push(XmlEvent::End {
        name: "w:p".to_string(),
    });
    Ok(out)
}

/// Accumulates the content of one `w:r`.
struct RunWriter<'f> {
    format: &'f RunFormat,
    text: String,
    body: Vec<XmlEvent>,
}

impl<'f> RunWriter<'f> {
    fn new(format: &'f RunFormat) -> Self {
        Self {
            format,
            text: String::new(),
            body: Vec::new(),
        }
    }

    fn push(&mut self, ch: char) {
        match ch {
            '\t' => {
                self.close_text();
                self.body.push(empty("w:tab"));
            }
            '\n' => {
                self.close_text();
                self.body.push(empty("w:br"));
            }
            '\r' => {}
            _ => self.text.push(ch),
        }
    }

    fn close_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let mut attrs = Vec::new();
        if text.starts_with(' ') || text.ends_with(' ') {
            attrs.push(("xml:space".to_string(), "preserve".to_string()));
        }
        self.body.push(XmlEvent::Start {
            name: "w:t".to_string(),
            attrs,
        });
        self.body.push(XmlEvent::Text { text });
        self.body.push(XmlEvent::End {
            name: "w:t".to_string(),
        });
    }

    fn flush_into(&mut self, out: &mut Vec<XmlEvent>) -> anyhow::Result<()> {
        self.close_text();
        if self.body.is_empty() {
            return Ok(());
        }
        out.push(XmlEvent::Start {
            name: "w:r".to_string(),
            attrs: Vec::new(),
        });
        out.extend(run_properties(self.format)?);
        out.append(&mut self.body);
        out.push(XmlEvent::End {
            name: "w:r".to_string(),
        });
        Ok(())
    }
}

fn empty(name: &str) -> XmlEvent {
    XmlEvent::Empty {
        name: name.to_string(),
        attrs: Vec::new(),
    }
}

fn val(name: &str, value: &str) -> XmlEvent {
    XmlEvent::Empty {
        name: name.to_string(),
        attrs: vec![("w:val".to_string(), value.to_string())],
    }
}

/// `w:rPr` for a format: the markup it was read from when there is one,
/// otherwise built from the individual properties.
pub fn run_properties(format: &RunFormat) -> anyhow::Result<Vec<XmlEvent>> {
    if let Some(raw) = &format.raw_props {
        return parse_xml_fragment(raw.as_bytes()).context("parse stored run properties");
    }
    if format.is_default() {
        return Ok(Vec::new());
    }

    let mut props: Vec<XmlEvent> = Vec::new();
    if let Some(font) = &format.font_name {
        props.push(XmlEvent::Empty {
            name: "w:rFonts".to_string(),
            attrs: vec![
                ("w:ascii".to_string(), font.clone()),
                ("w:hAnsi".to_string(), font.clone()),
            ],
        });
    }
    if let Some(b) = format.bold {
        props.push(val("w:b", if b { "1" } else { "0" }));
    }
    if let Some(i) = format.italic {
        props.push(val("w:i", if i { "1" } else { "0" }));
    }
    if let Some(color) = &format.color {
        props.push(val("w:color", color));
    }
    if let Some(size) = format.font_size {
        props.push(val("w:sz", &size.to_string()));
    }
    if let Some(u) = format.underline {
        props.push(val("w:u", if u { "single" } else { "none" }));
    }

    let mut out = Vec::with_capacity(props.len() + 2);
    out.push(XmlEvent::Start {
        name: "w:rPr".to_string(),
        attrs: Vec::new(),
    });
    out.extend(props);
    out.push(XmlEvent::End {
        name: "w:rPr".to_string(),
    });
    Ok(out)
}
