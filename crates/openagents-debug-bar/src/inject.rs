use crate::config::AppendTo;
use crate::debugger::ASSET_MARKER;

const BODY_CLOSE: &str = "</body>";
const HTML_CLOSE: &str = "</html>";
const HEAD_CLOSE: &str = "</head>";

/// Shape of a response body. Handlers can override the inferred kind by
/// inserting one of these into the response extensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseKind {
    #[default]
    Regular,
    BinaryFile,
    Streamed,
}

/// Everything the deny predicate looks at for one response.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub ajax: bool,
    pub status: u16,
    pub content_type: Option<&'a str>,
    pub kind: ResponseKind,
    pub accepts: &'a [String],
    pub append_to: AppendTo,
}

/// Whether the bar must stay out of this response.
///
/// AJAX responses are never denied. Binary downloads, streams, and redirects
/// always are. Error responses without a content type are admitted. For the
/// rest, an empty `accepts` list admits everything, and a non-empty one
/// requires the content type to contain one of its entries.
pub fn deny(ctx: &RenderContext<'_>) -> bool {
    if ctx.ajax {
        return false;
    }
    if matches!(ctx.kind, ResponseKind::BinaryFile | ResponseKind::Streamed) {
        return true;
    }
    if (300..400).contains(&ctx.status) {
        return true;
    }

    let content_type = ctx
        .content_type
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if content_type.is_none() && ctx.status >= 400 {
        return false;
    }
    if ctx.accepts.is_empty() {
        return false;
    }

    let content_type = content_type.unwrap_or_default().to_lowercase();
    !ctx
        .accepts
        .iter()
        .any(|accept| content_type.contains(&accept.to_lowercase()))
}

/// Inserts `fragment` before the last case-insensitive occurrence of `tag`.
pub fn splice_before_last(body: &str, tag: &str, fragment: &str) -> Option<String> {
    let position = body.to_ascii_lowercase().rfind(&tag.to_ascii_lowercase())?;
    let mut spliced = String::with_capacity(body.len() + fragment.len());
    spliced.push_str(&body[..position]);
    spliced.push_str(fragment);
    spliced.push_str(&body[position..]);
    Some(spliced)
}

/// `Body`: before the last `</body>`, or appended when there is none.
/// `Html`: before the last `</body>`, then the last `</html>`, or appended.
pub fn inject_bar(body: &str, bar: &str, append_to: AppendTo) -> String {
    let spliced = match append_to {
        AppendTo::Body => splice_before_last(body, BODY_CLOSE, bar),
        AppendTo::Html => splice_before_last(body, BODY_CLOSE, bar)
            .or_else(|| splice_before_last(body, HTML_CLOSE, bar)),
    };
    spliced.unwrap_or_else(|| format!("{body}{bar}"))
}

/// Places the loader before the last `</head>`. Pages without a head are
/// returned unchanged.
pub fn inject_loader(body: &str, loader: &str) -> String {
    splice_before_last(body, HEAD_CLOSE, loader).unwrap_or_else(|| body.to_string())
}

/// Prefixes the relative asset query references with the mount path.
pub fn rewrite_base_path(fragment: &str, base_path: Option<&str>) -> String {
    let Some(base) = base_path.map(|base| base.trim_end_matches('/')) else {
        return fragment.to_string();
    };
    let marker = format!("\"?{ASSET_MARKER}=");
    fragment.replace(&marker, &format!("\"{base}/?{ASSET_MARKER}="))
}
