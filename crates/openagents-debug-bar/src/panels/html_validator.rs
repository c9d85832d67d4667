use maud::{Markup, html};

use crate::panel::{Panel, PanelContext, PanelError};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlIssue {
    pub line: usize,
    pub message: String,
}

impl HtmlIssue {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Structural checks on the rendered page: doctype, title, and tag balance.
#[derive(Debug, Clone, Default)]
pub struct HtmlValidatorPanel {
    issues: Option<Vec<HtmlIssue>>,
}

impl HtmlValidatorPanel {
    pub fn issues(&self) -> Option<&[HtmlIssue]> {
        self.issues.as_deref()
    }
}

impl Panel for HtmlValidatorPanel {
    fn title(&self) -> String {
        match self.issues.as_deref() {
            Some([]) => "HTML ok".to_string(),
            Some(issues) => format!("HTML ({} issues)", issues.len()),
            None => "HTML".to_string(),
        }
    }

    fn render(&self, ctx: &PanelContext<'_>) -> Result<Markup, PanelError> {
        Ok(html! {
            h2 { "HTML validator" }
            @match self.issues.as_deref() {
                None => p { "Page markup was not inspected." },
                Some([]) => p { "No structural problems found." },
                Some(issues) => {
                    table {
                        @for issue in issues {
                            tr {
                                th { "line " (issue.line) }
                                td { (ctx.dumper.truncate(&issue.message)) }
                            }
                        }
                    }
                }
            }
        })
    }

    fn supports_ajax(&self) -> bool {
        false
    }

    fn inspect_html(&mut self, html: &str) {
        self.issues = Some(validate(html));
    }
}

pub fn validate(html: &str) -> Vec<HtmlIssue> {
    let lower = html.to_ascii_lowercase();
    let mut issues = Vec::new();

    if !lower.trim_start().starts_with("<!doctype html") {
        issues.push(HtmlIssue::new(1, "missing <!DOCTYPE html>"));
    }
    if !lower.contains("<title") {
        issues.push(HtmlIssue::new(1, "document has no <title>"));
    }

    let mut open: Vec<(&str, usize)> = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = lower[cursor..].find('<') {
        let start = cursor + offset;
        let rest = &lower[start..];

        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => cursor = start + end + 3,
                None => {
                    issues.push(HtmlIssue::new(line_at(html, start), "unterminated comment"));
                    break;
                }
            }
            continue;
        }

        let Some(end) = rest.find('>') else {
            issues.push(HtmlIssue::new(line_at(html, start), "unterminated tag"));
            break;
        };
        let tag = &rest[1..end];
        cursor = start + end + 1;

        if tag.starts_with('!') || tag.starts_with('?') {
            continue;
        }

        if let Some(closing) = tag.strip_prefix('/') {
            let name = tag_name(closing);
            match open.iter().rposition(|(open_name, _)| *open_name == name) {
                Some(index) => {
                    for (unclosed, line) in open.drain(index + 1..) {
                        issues.push(HtmlIssue::new(
                            line,
                            format!("<{unclosed}> is not closed before </{name}>"),
                        ));
                    }
                    open.pop();
                }
                None => issues.push(HtmlIssue::new(
                    line_at(html, start),
                    format!("unexpected </{name}>"),
                )),
            }
            continue;
        }

        let name = tag_name(tag);
        if name.is_empty() || tag.ends_with('/') || VOID_ELEMENTS.contains(&name) {
            continue;
        }

        open.push((name, line_at(html, start)));
        if RAW_TEXT_ELEMENTS.contains(&name) {
            match lower[cursor..].find(&format!("</{name}")) {
                Some(position) => cursor += position,
                None => break,
            }
        }
    }

    for (name, line) in open {
        issues.push(HtmlIssue::new(line, format!("<{name}> is never closed")));
    }
    issues
}

fn tag_name(tag: &str) -> &str {
    if !tag.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return "";
    }
    let end = tag
        .find(|c: char| c.is_ascii_whitespace() || c == '/')
        .unwrap_or(tag.len());
    &tag[..end]
}

fn line_at(html: &str, offset: usize) -> usize {
    html.as_bytes()[..offset].iter().filter(|byte| **byte == b'\n').count() + 1
}
