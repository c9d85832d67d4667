use std::sync::Arc;
use std::time::Instant;

use axum::http::Uri;
use uuid::Uuid;

use crate::config::{AppendTo, ConfigError, DebugBarConfig};
use crate::debugger::{
    ASSET_MARKER, AssetKind, AssetResponse, Debugger, DebuggerOptions, ErrorReport,
};
use crate::fatal::FatalError;
use crate::inject::{self, RenderContext};
use crate::panel::{PanelCatalog, PanelLog, PanelRegistry, PanelSeed};
use crate::panels::HTML_VALIDATOR_PANEL;
use crate::render::{self, BarMeta};
use crate::session::SessionGateway;

/// Result of looking at an incoming request before the application runs.
#[derive(Debug)]
pub enum Dispatch {
    /// The request targets the bar's own asset endpoint.
    Asset(AssetResponse),
    Continue,
}

/// State the bar keeps for one request, from `begin` until the response
/// has been rendered.
#[derive(Debug)]
pub struct RequestScope {
    registry: PanelRegistry,
    log: PanelLog,
    started_at: Instant,
    warnings: Vec<String>,
    rendered: bool,
}

impl RequestScope {
    pub fn registry(&self) -> &PanelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PanelRegistry {
        &mut self.registry
    }

    pub fn log(&self) -> &PanelLog {
        &self.log
    }

    pub fn is_ajax(&self) -> bool {
        self.registry.is_ajax()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether the bar was already rendered for this request.
    pub fn is_rendered(&self) -> bool {
        self.rendered
    }
}

struct DebugBarInner {
    config: DebugBarConfig,
    debugger: Arc<Debugger>,
    catalog: PanelCatalog,
    console: bool,
}

#[derive(Clone)]
pub struct DebugBar {
    inner: Arc<DebugBarInner>,
}

pub struct DebugBarBuilder {
    config: DebugBarConfig,
    catalog: Option<PanelCatalog>,
    debugger: Option<Arc<Debugger>>,
    console: bool,
}

impl DebugBarBuilder {
    pub fn catalog(mut self, catalog: PanelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn debugger(mut self, debugger: Arc<Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    /// Console runs never show the bar.
    pub fn console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn build(self) -> DebugBar {
        let config = self.config;
        let debugger = self
            .debugger
            .unwrap_or_else(|| Arc::new(Debugger::new(DebuggerOptions::from_config(&config))));
        DebugBar {
            inner: Arc::new(DebugBarInner {
                catalog: self.catalog.unwrap_or_else(PanelCatalog::builtin),
                config,
                debugger,
                console: self.console,
            }),
        }
    }
}

impl DebugBar {
    pub fn new(config: DebugBarConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: DebugBarConfig) -> DebugBarBuilder {
        DebugBarBuilder {
            config,
            catalog: None,
            debugger: None,
            console: false,
        }
    }

    pub fn config(&self) -> &DebugBarConfig {
        &self.inner.config
    }

    pub fn debugger(&self) -> &Arc<Debugger> {
        &self.inner.debugger
    }

    pub fn enabled(&self) -> bool {
        self.inner.config.enabled && !self.inner.console
    }

    pub fn show_bar(&self) -> bool {
        self.inner.config.show_bar
    }

    pub fn accepts(&self) -> &[String] {
        &self.inner.config.accepts
    }

    pub fn append_to(&self) -> AppendTo {
        self.inner.config.append_to
    }

    /// Builds the panel registry for a request from the configured panel
    /// names.
    pub fn begin(&self, seed: PanelSeed) -> Result<RequestScope, ConfigError> {
        let registry = self
            .inner
            .catalog
            .build_registry(&self.inner.config.enabled_panels(), &seed)?;
        Ok(RequestScope {
            registry,
            log: seed.log,
            started_at: Instant::now(),
            warnings: Vec::new(),
            rendered: false,
        })
    }

    /// Looks for the `_debug_bar` marker in the query string.
    pub fn intercept(&self, uri: &Uri, session: &dyn SessionGateway) -> Dispatch {
        if !self.enabled() {
            return Dispatch::Continue;
        }
        match asset_marker(uri) {
            Some(marker) => Dispatch::Asset(self.dispatch(&marker, session)),
            None => Dispatch::Continue,
        }
    }

    /// Serves a bar asset and leaves the session closed.
    pub fn dispatch(&self, marker: &str, session: &dyn SessionGateway) -> AssetResponse {
        let asset = self
            .inner
            .debugger
            .dispatch_assets(&AssetKind::parse(marker), session);
        if let Err(error) = session.close() {
            tracing::debug!(error = %error, "debug bar session close skipped");
        }
        asset
    }

    pub fn exception_handler(&self, report: &ErrorReport) -> String {
        self.inner.debugger.render_exception(report)
    }

    /// End-of-request hook. A fatal error replaces the page with the error
    /// screen; anything milder is listed in the bar when `scream` is on.
    pub fn shutdown_handler(
        &self,
        scope: &mut RequestScope,
        session: &dyn SessionGateway,
        content: &str,
        error: Option<&FatalError>,
    ) -> String {
        if let Some(error) = error {
            if self.is_fatal(error) {
                tracing::error!(
                    error = %error.message,
                    file = %error.file,
                    line = error.line,
                    "fatal error during request"
                );
                return self.exception_handler(&ErrorReport::from(error));
            }
            self.record_warning(scope, error);
        }
        self.append_debug_bar(scope, session, content, 200)
    }

    /// Whether `error` ends the request under the configured strictness.
    pub fn is_fatal(&self, error: &FatalError) -> bool {
        error.severity.is_fatal(self.inner.config.strict_mode)
    }

    /// Lists a non-fatal error in the bar strip when `scream` is on.
    pub fn record_warning(&self, scope: &mut RequestScope, error: &FatalError) {
        if !self.inner.config.scream {
            return;
        }
        scope.warnings.push(format!(
            "{}: {} ({}:{})",
            error.severity.label(),
            error.message,
            error.file,
            error.line
        ));
    }

    /// Renders the bar and splices it into `content`.
    pub fn append_debug_bar(
        &self,
        scope: &mut RequestScope,
        session: &dyn SessionGateway,
        content: &str,
        status: u16,
    ) -> String {
        if !self.show_bar() {
            return content.to_string();
        }
        if scope.rendered {
            tracing::debug!("debug bar already rendered for this request");
            return content.to_string();
        }
        scope.rendered = true;

        if status == 200 {
            if let Some(validator) = scope.registry.get_mut(HTML_VALIDATOR_PANEL) {
                validator.inspect_html(content);
            }
        }

        let append_to = self.append_to();
        let use_loader = session.is_started() || append_to == AppendTo::Html;
        let content_id = use_loader.then(|| Uuid::new_v4().simple().to_string());

        let meta = BarMeta {
            elapsed: scope.started_at.elapsed(),
            warnings: scope.warnings.clone(),
            ajax: scope.is_ajax(),
        };
        let base_path = self.inner.config.base_path.as_deref();
        let rendered = render::render_bar(
            &self.inner.debugger,
            &scope.registry,
            session,
            &meta,
            content_id.as_deref(),
        );

        let bar = inject::rewrite_base_path(&rendered.markup, base_path);
        let output = inject::inject_bar(content, &bar, append_to);
        match content_id.filter(|_| rendered.stashed) {
            Some(id) => {
                let loader = inject::rewrite_base_path(&render::render_loader(&id), base_path);
                inject::inject_loader(&output, &loader)
            }
            None => output,
        }
    }

    pub fn render_context<'a>(
        &'a self,
        scope: &RequestScope,
        status: u16,
        content_type: Option<&'a str>,
        kind: inject::ResponseKind,
    ) -> RenderContext<'a> {
        RenderContext {
            ajax: scope.is_ajax(),
            status,
            content_type,
            kind,
            accepts: self.accepts(),
            append_to: self.append_to(),
        }
    }

    /// `None` when the response must be left alone.
    pub fn render_response(
        &self,
        scope: &mut RequestScope,
        session: &dyn SessionGateway,
        ctx: &RenderContext<'_>,
        body: &str,
    ) -> Option<String> {
        if inject::deny(ctx) {
            return None;
        }
        Some(self.append_debug_bar(scope, session, body, ctx.status))
    }
}

impl std::fmt::Debug for DebugBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugBar")
            .field("enabled", &self.enabled())
            .field("show_bar", &self.show_bar())
            .field("append_to", &self.append_to())
            .finish_non_exhaustive()
    }
}

/// Value of the `_debug_bar` query parameter, if present.
pub fn asset_marker(uri: &Uri) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == ASSET_MARKER).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use axum::http::Uri;

    use super::{DebugBar, Dispatch, asset_marker};
    use crate::config::{AppendTo, DebugBarConfig, PanelToggle};
    use crate::debugger::MAX_STASHED_CONTENT;
    use crate::fatal::{FatalError, Severity};
    use crate::inject::ResponseKind;
    use crate::panel::{PanelCatalog, PanelSeed};
    use crate::panel::test_support::StaticPanel;
    use crate::session::{DetachedSession, MemorySession, SessionGateway};

    fn catalog() -> PanelCatalog {
        let mut catalog = PanelCatalog::empty();
        catalog.insert("request", |_seed: &PanelSeed| {
            StaticPanel::boxed("Request", "request-body")
        });
        catalog
    }

    fn bar(config: DebugBarConfig) -> DebugBar {
        DebugBar::builder(config).catalog(catalog()).build()
    }

    fn request_only() -> DebugBarConfig {
        DebugBarConfig {
            panels: vec![PanelToggle::new("request", true)],
            ..DebugBarConfig::default()
        }
    }

    const PAGE: &str = "<html><head></head><body></body></html>";

    #[test]
    fn begin_fails_on_unknown_panel() {
        let config = DebugBarConfig {
            panels: vec![PanelToggle::new("queue", true)],
            ..DebugBarConfig::default()
        };
        assert!(bar(config).begin(PanelSeed::default()).is_err());
    }

    #[test]
    fn default_configuration_builds_with_builtin_panels() {
        let bar = DebugBar::new(DebugBarConfig::default());
        let scope = bar.begin(PanelSeed::default()).expect("builtin panels resolve");
        assert_eq!(
            scope.registry().ids(),
            vec!["database", "session", "request", "auth"]
        );
    }

    #[test]
    fn appends_bar_before_body_close_without_loader() {
        let bar = bar(request_only());
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let output = bar.append_debug_bar(&mut scope, &DetachedSession, PAGE, 200);

        let body_close = output.find("</body>").expect("body close kept");
        let panel = output.find("request-body").expect("panel rendered");
        assert!(panel < body_close);
        assert!(output.starts_with("<html><head></head><body>"));
        assert!(!output.contains("content."));
    }

    #[test]
    fn open_session_switches_to_loader_and_stashes_content() {
        let bar = bar(request_only());
        let session = MemorySession::started();
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let output = bar.append_debug_bar(&mut scope, &session, PAGE, 200);

        let head = output.find("</head>").expect("head close kept");
        let loader = output
            .find("<script src=\"?_debug_bar=content.")
            .expect("loader injected");
        assert!(loader < head);
        assert!(!session.is_started());

        let start = loader + "<script src=\"?_debug_bar=content.".len();
        let id: String = output[start..].chars().take_while(|c| *c != '"').collect();
        assert!(session.start().is_ok());
        assert!(session.get(&format!("debug_bar.content.{id}")).is_some());
    }

    #[test]
    fn html_target_uses_the_loader() {
        let config = DebugBarConfig {
            append_to: AppendTo::Html,
            ..request_only()
        };
        let bar = bar(config);
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let output = bar.append_debug_bar(&mut scope, &MemorySession::new(), PAGE, 200);
        assert!(output.contains("?_debug_bar=content."));
        assert!(output.find("request-body") < output.find("</body>"));
    }

    #[test]
    fn repeated_loader_renders_keep_the_session_bounded() {
        let config = DebugBarConfig {
            append_to: AppendTo::Html,
            ..request_only()
        };
        let bar = bar(config);
        let session = MemorySession::new();
        for _ in 0..50 {
            let mut scope = bar.begin(PanelSeed::default()).expect("scope");
            let _ = bar.append_debug_bar(&mut scope, &session, PAGE, 200);
        }

        assert!(session.start().is_ok());
        let stashed = session
            .entries()
            .into_iter()
            .filter(|(key, _)| key.starts_with("debug_bar.content."))
            .count();
        assert_eq!(stashed, MAX_STASHED_CONTENT);
    }

    #[test]
    fn loader_is_skipped_when_the_stash_cannot_be_written() {
        let config = DebugBarConfig {
            append_to: AppendTo::Html,
            ..request_only()
        };
        let bar = bar(config);
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let session = MemorySession::rejecting("headers already sent");
        let output = bar.append_debug_bar(&mut scope, &session, PAGE, 200);

        assert!(!output.contains("?_debug_bar=content."));
        assert!(output.find("request-body") < output.find("</body>"));
    }

    #[test]
    fn validator_inspects_only_successful_pages() {
        let config = DebugBarConfig {
            panels: vec![PanelToggle::new("html-validator", true)],
            ..DebugBarConfig::default()
        };
        let bar = DebugBar::new(config);

        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let output = bar.append_debug_bar(&mut scope, &DetachedSession, PAGE, 200);
        assert!(output.contains("HTML (2 issues)"));
        assert!(output.contains("missing &lt;!DOCTYPE html&gt;"));

        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let output = bar.append_debug_bar(&mut scope, &DetachedSession, PAGE, 404);
        assert!(output.contains("Page markup was not inspected."));
    }

    #[test]
    fn hidden_bar_returns_content_unchanged() {
        let config = DebugBarConfig {
            show_bar: false,
            ..request_only()
        };
        let bar = bar(config);
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        assert_eq!(
            bar.append_debug_bar(&mut scope, &DetachedSession, PAGE, 200),
            PAGE
        );
    }

    #[test]
    fn bar_renders_once_per_request() {
        let bar = bar(request_only());
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let first = bar.append_debug_bar(&mut scope, &DetachedSession, PAGE, 200);
        let second = bar.append_debug_bar(&mut scope, &DetachedSession, &first, 200);
        assert_eq!(first, second);
        assert!(scope.is_rendered());
    }

    #[test]
    fn fatal_error_renders_the_error_screen() {
        let bar = bar(request_only());
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let error = FatalError::new("memory exhausted", Severity::Error, "src/jobs.rs", 88);
        let output = bar.shutdown_handler(&mut scope, &DetachedSession, "", Some(&error));

        assert_eq!(
            output,
            bar.exception_handler(&crate::debugger::ErrorReport::from(&error))
        );
        assert!(output.contains("oa-blue-screen"));
        assert!(!output.contains("request-body"));
    }

    #[test]
    fn warnings_are_listed_when_screaming() {
        let config = DebugBarConfig {
            strict_mode: false,
            ..request_only()
        };
        let bar = bar(config);
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let warning = FatalError::new("undefined index", Severity::Warning, "src/view.rs", 7);
        let output = bar.shutdown_handler(&mut scope, &DetachedSession, PAGE, Some(&warning));

        assert!(output.contains("Warning: undefined index (src/view.rs:7)"));
        assert!(output.contains("request-body"));
    }

    #[test]
    fn strict_mode_makes_warnings_fatal() {
        let bar = bar(request_only());
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let warning = FatalError::new("undefined index", Severity::Warning, "src/view.rs", 7);
        let output = bar.shutdown_handler(&mut scope, &DetachedSession, PAGE, Some(&warning));
        assert!(output.contains("oa-blue-screen"));
    }

    #[test]
    fn render_response_respects_deny() {
        let config = DebugBarConfig {
            accepts: vec!["text/html".to_string()],
            ..request_only()
        };
        let bar = bar(config);
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");

        let json =
            bar.render_context(&scope, 200, Some("application/json"), ResponseKind::Regular);
        assert_eq!(
            bar.render_response(&mut scope, &DetachedSession, &json, "{}"),
            None
        );

        let html = bar.render_context(&scope, 200, Some("text/html"), ResponseKind::Regular);
        let output = bar.render_response(&mut scope, &DetachedSession, &html, PAGE);
        assert!(output.is_some_and(|page| page.contains("request-body")));
    }

    #[test]
    fn base_path_prefixes_asset_links() {
        let config = DebugBarConfig {
            base_path: Some("/admin".to_string()),
            ..request_only()
        };
        let bar = bar(config);
        let mut scope = bar.begin(PanelSeed::default()).expect("scope");
        let output = bar.append_debug_bar(&mut scope, &DetachedSession, PAGE, 200);
        assert!(output.contains("\"/admin/?_debug_bar=css"));
        assert!(!output.contains("\"?_debug_bar="));
    }

    #[test]
    fn intercept_serves_assets_and_closes_the_session() {
        let bar = bar(request_only());
        let session = MemorySession::started();
        let uri: Uri = "/page?x=1&_debug_bar=css".parse().expect("uri");
        match bar.intercept(&uri, &session) {
            Dispatch::Asset(asset) => assert_eq!(asset.content_type, "text/css; charset=utf-8"),
            Dispatch::Continue => panic!("asset request must short-circuit"),
        }
        assert!(!session.is_started());

        let plain: Uri = "/page?x=1".parse().expect("uri");
        assert!(matches!(bar.intercept(&plain, &session), Dispatch::Continue));
    }

    #[test]
    fn console_mode_disables_the_bar() {
        let bar = DebugBar::builder(request_only()).console(true).build();
        assert!(!bar.enabled());
        let uri: Uri = "/?_debug_bar=js".parse().expect("uri");
        assert!(matches!(bar.intercept(&uri, &DetachedSession), Dispatch::Continue));
    }

    #[test]
    fn asset_marker_reads_the_query_parameter() {
        let uri: Uri = "/?a=b&_debug_bar=content.abc".parse().expect("uri");
        assert_eq!(asset_marker(&uri).as_deref(), Some("content.abc"));
        let uri: Uri = "/?_debug_bar".parse().expect("uri");
        assert_eq!(asset_marker(&uri).as_deref(), Some(""));
        let uri: Uri = "/".parse().expect("uri");
        assert_eq!(asset_marker(&uri), None);
    }
}
