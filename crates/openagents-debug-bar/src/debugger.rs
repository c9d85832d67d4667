use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{DEFAULT_EDITOR, DEFAULT_MAX_DEPTH, DEFAULT_MAX_LENGTH, DebugBarConfig};
use crate::fatal::{FatalError, Severity};
use crate::session::{SessionGateway, SessionScope};

/// Query parameter that routes a request to asset dispatch.
pub const ASSET_MARKER: &str = "_debug_bar";

const CACHE_ASSET: &str = "max-age=86400";
const CONTENT_TYPE_CSS: &str = "text/css; charset=utf-8";
const CONTENT_TYPE_JS: &str = "text/javascript; charset=utf-8";
const CONTENT_ID_PREFIX: &str = "content.";
const CONTENT_SESSION_KEY_PREFIX: &str = "debug_bar.content.";
/// Stashed bar content older than this is dropped on the next stash.
const STASHED_CONTENT_TTL_SECS: i64 = 60;
pub(crate) const MAX_STASHED_CONTENT: usize = 8;
const BAR_CSS: &str = include_str!("../assets/bar.css");
const BAR_JS: &str = include_str!("../assets/bar.js");
const ERROR_PAGE_STYLES: &str = "body{margin:0;font:14px/1.5 system-ui,sans-serif;background:#1b3a6b;color:#f2f5fa}\
header{padding:24px 32px;background:#12294d}\
h1{margin:4px 0 0;font-size:22px;font-weight:600;word-break:break-word}\
.oa-error-kind{margin:0;color:#9fb8e0}\
section{padding:16px 32px}\
a{color:#9fd0ff}\
ol{padding-left:20px}\
footer{padding:16px 32px;color:#9fb8e0;font-size:12px}";
const TRUNCATION_MARK: &str = "\u{2026}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerOptions {
    /// Editor URL template; `%file` and `%line` are substituted.
    pub editor: String,
    /// Path prefix rewrites applied before building editor links.
    pub editor_mapping: BTreeMap<String, String>,
    pub max_depth: usize,
    pub max_length: usize,
    pub scream: bool,
    pub show_location: bool,
    pub strict_mode: bool,
    pub time: DateTime<Utc>,
}

impl Default for DebuggerOptions {
    fn default() -> Self {
        Self {
            editor: DEFAULT_EDITOR.to_string(),
            editor_mapping: BTreeMap::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_length: DEFAULT_MAX_LENGTH,
            scream: true,
            show_location: true,
            strict_mode: true,
            time: Utc::now(),
        }
    }
}

impl DebuggerOptions {
    pub fn from_config(config: &DebugBarConfig) -> Self {
        Self {
            editor: config.editor.clone(),
            editor_mapping: config.editor_mapping.clone(),
            max_depth: config.max_depth,
            max_length: config.max_length,
            scream: config.scream,
            show_location: config.show_location,
            strict_mode: config.strict_mode,
            time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    Css,
    Js,
    /// Deferred bar content stashed in the session under this id.
    Content(String),
}

impl AssetKind {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "css" => Self::Css,
            "js" => Self::Js,
            other => Self::Content(
                other
                    .strip_prefix(CONTENT_ID_PREFIX)
                    .unwrap_or(other)
                    .to_string(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub content_type: &'static str,
    pub cache_control: Option<&'static str>,
    pub body: String,
}

impl AssetResponse {
    /// Header list in emission order: type, cache policy when cacheable,
    /// then length.
    pub fn headers(&self) -> Vec<(HeaderName, String)> {
        let mut headers = vec![(CONTENT_TYPE, self.content_type.to_string())];
        if let Some(cache_control) = self.cache_control {
            headers.push((CACHE_CONTROL, cache_control.to_string()));
        }
        headers.push((CONTENT_LENGTH, self.body.len().to_string()));
        headers
    }
}

impl IntoResponse for AssetResponse {
    fn into_response(self) -> Response {
        let headers = self.headers();
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::OK;
        for (name, value) in headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// What the error page shows about a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub severity: Option<Severity>,
    pub location: Option<(String, u32)>,
    pub causes: Vec<String>,
}

impl ErrorReport {
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            severity: None,
            location: None,
            causes,
        }
    }

    pub fn from_fatal(error: &FatalError) -> Self {
        let location = (!error.file.is_empty()).then(|| (error.file.clone(), error.line));
        Self {
            kind: error.severity.label().to_string(),
            message: error.message.clone(),
            severity: Some(error.severity),
            location,
            causes: Vec::new(),
        }
    }
}

impl From<&FatalError> for ErrorReport {
    fn from(error: &FatalError) -> Self {
        Self::from_fatal(error)
    }
}

/// Bounded rendering of JSON values for panels.
#[derive(Debug, Clone, Copy)]
pub struct Dumper {
    max_depth: usize,
    max_length: usize,
}

impl Dumper {
    pub fn new(max_depth: usize, max_length: usize) -> Self {
        Self {
            max_depth,
            max_length,
        }
    }

    pub fn truncate(&self, text: &str) -> String {
        truncate_chars(text, self.max_length)
    }

    pub fn dump(&self, value: &serde_json::Value) -> Markup {
        html! {
            div class="oa-dump" { (self.dump_at(value, 0)) }
        }
    }

    fn dump_at(&self, value: &serde_json::Value, depth: usize) -> Markup {
        match value {
            serde_json::Value::Array(items) => {
                if depth >= self.max_depth {
                    return html! { "[" (TRUNCATION_MARK) "]" };
                }
                html! {
                    "array(" (items.len()) ")"
                    ul {
                        @for (index, item) in items.iter().enumerate() {
                            li { (index) " => " (self.dump_at(item, depth + 1)) }
                        }
                    }
                }
            }
            serde_json::Value::Object(entries) => {
                if depth >= self.max_depth {
                    return html! { "{" (TRUNCATION_MARK) "}" };
                }
                html! {
                    "object(" (entries.len()) ")"
                    ul {
                        @for (key, item) in entries {
                            li { (self.truncate(key)) " => " (self.dump_at(item, depth + 1)) }
                        }
                    }
                }
            }
            serde_json::Value::String(text) => {
                html! { span class="oa-dump-string" { (self.truncate(text)) } }
            }
            other => html! { (other.to_string()) },
        }
    }
}

/// Built once per process and shared behind an `Arc`; never mutated after
/// construction.
#[derive(Debug)]
pub struct Debugger {
    options: DebuggerOptions,
    css_version: String,
    js_version: String,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new(DebuggerOptions::default())
    }
}

impl Debugger {
    pub fn new(options: DebuggerOptions) -> Self {
        Self {
            options,
            css_version: asset_version(BAR_CSS),
            js_version: asset_version(BAR_JS),
        }
    }

    pub fn options(&self) -> &DebuggerOptions {
        &self.options
    }

    pub fn dumper(&self) -> Dumper {
        Dumper::new(self.options.max_depth, self.options.max_length)
    }

    pub fn css_version(&self) -> &str {
        &self.css_version
    }

    pub fn js_version(&self) -> &str {
        &self.js_version
    }

    /// Serves the bar stylesheet, script, or deferred content by id.
    ///
    /// Deferred content is read from the session, which is opened for the
    /// duration of the lookup when it is not already open.
    pub fn dispatch_assets(&self, kind: &AssetKind, session: &dyn SessionGateway) -> AssetResponse {
        match kind {
            AssetKind::Css => AssetResponse {
                content_type: CONTENT_TYPE_CSS,
                cache_control: Some(CACHE_ASSET),
                body: BAR_CSS.to_string(),
            },
            AssetKind::Js => AssetResponse {
                content_type: CONTENT_TYPE_JS,
                cache_control: Some(CACHE_ASSET),
                body: BAR_JS.to_string(),
            },
            AssetKind::Content(id) => {
                let scope = SessionScope::open(session);
                let content = scope
                    .gateway()
                    .remove(&content_session_key(id))
                    .and_then(|value| serde_json::from_str::<StashedContent>(&value).ok());
                drop(scope);
                AssetResponse {
                    content_type: CONTENT_TYPE_JS,
                    cache_control: None,
                    body: content
                        .map(|stashed| content_script(&stashed.html))
                        .unwrap_or_default(),
                }
            }
        }
    }

    /// Stores bar markup in an open session for the loader script and
    /// returns whether it was written. Expired entries are pruned first and
    /// at most `MAX_STASHED_CONTENT` entries are kept, oldest evicted.
    pub fn stash_content(&self, session: &dyn SessionGateway, id: &str, html: &str) -> bool {
        self.stash_content_at(session, id, html, Utc::now())
    }

    pub(crate) fn stash_content_at(
        &self,
        session: &dyn SessionGateway,
        id: &str,
        html: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if !session.is_started() {
            return false;
        }

        let now = now.timestamp();
        let mut live: Vec<(i64, String)> = Vec::new();
        for (key, value) in session.entries() {
            if !key.starts_with(CONTENT_SESSION_KEY_PREFIX) {
                continue;
            }
            match serde_json::from_str::<StashedContent>(&value) {
                Ok(stashed) if now - stashed.stored_at < STASHED_CONTENT_TTL_SECS => {
                    live.push((stashed.stored_at, key));
                }
                _ => {
                    session.remove(&key);
                }
            }
        }
        live.sort();
        let excess = (live.len() + 1).saturating_sub(MAX_STASHED_CONTENT);
        for (_, key) in live.into_iter().take(excess) {
            session.remove(&key);
        }

        let stashed = StashedContent {
            stored_at: now,
            html: html.to_string(),
        };
        match serde_json::to_string(&stashed) {
            Ok(value) => {
                session.insert(&content_session_key(id), value);
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "debug bar content could not be stashed");
                false
            }
        }
    }

    pub fn editor_link(&self, file: &str, line: u32) -> Option<String> {
        if self.options.editor.trim().is_empty() || file.is_empty() {
            return None;
        }

        let mut mapped = file.to_string();
        for (from, to) in &self.options.editor_mapping {
            if let Some(rest) = file.strip_prefix(from.as_str()) {
                mapped = format!("{to}{rest}");
                break;
            }
        }

        Some(
            self.options
                .editor
                .replace("%file", &mapped)
                .replace("%line", &line.to_string()),
        )
    }

    /// Full-page error rendering.
    pub fn render_exception(&self, report: &ErrorReport) -> String {
        let dumper = self.dumper();
        let title = dumper.truncate(&report.message);
        let location = report
            .location
            .as_ref()
            .filter(|_| self.options.show_location);

        let markup = html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    meta name="robots" content="noindex";
                    title { (report.kind) ": " (title) }
                    style { (PreEscaped(ERROR_PAGE_STYLES)) }
                }
                body id="oa-blue-screen" {
                    header {
                        p class="oa-error-kind" {
                            (report.kind)
                            @if let Some(severity) = report.severity {
                                " (" (severity.label()) ")"
                            }
                        }
                        h1 { (title) }
                    }
                    @if let Some((file, line)) = location {
                        section class="oa-error-location" {
                            @if let Some(link) = self.editor_link(file, *line) {
                                a href=(link) { (file) ":" (line) }
                            } @else {
                                (file) ":" (line)
                            }
                        }
                    }
                    @if !report.causes.is_empty() {
                        section class="oa-error-causes" {
                            h2 { "Caused by" }
                            ol {
                                @for cause in report.causes.iter().take(self.options.max_depth) {
                                    li { (dumper.truncate(cause)) }
                                }
                            }
                        }
                    }
                    footer {
                        "Process started "
                        (self.options.time.to_rfc3339_opts(SecondsFormat::Secs, true))
                    }
                }
            }
        };

        markup.into_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StashedContent {
    stored_at: i64,
    html: String,
}

pub(crate) fn content_session_key(id: &str) -> String {
    format!("{CONTENT_SESSION_KEY_PREFIX}{id}")
}

fn content_script(html: &str) -> String {
    let encoded = serde_json::to_string(html).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(function(){{if(document.getElementById(\"oa-debug-bar\")){{return;}}\
document.body.insertAdjacentHTML(\"beforeend\",{encoded});\
if(window.OpenAgentsDebugBar){{window.OpenAgentsDebugBar.init();}}}})();"
    )
}

fn asset_version(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..6])
}

fn truncate_chars(text: &str, max_length: usize) -> String {
    match text.char_indices().nth(max_length) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARK}", &text[..cut]),
        None => text.to_string(),
    }
}
