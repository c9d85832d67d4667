use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::Request;
use axum::http::{HeaderMap, Method, Uri};
use chrono::{DateTime, Utc};
use maud::Markup;
use thiserror::Error;

use crate::config::ConfigError;
use crate::debugger::Dumper;
use crate::session::SessionGateway;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PanelError {
    #[error("panel render failed: {0}")]
    Render(String),
    #[error("panel panicked: {0}")]
    Panicked(String),
}

/// What a panel can see while it renders. The session is open for the
/// duration of the render call.
pub struct PanelContext<'a> {
    pub dumper: Dumper,
    pub session: &'a dyn SessionGateway,
}

pub trait Panel: Send {
    /// Tab label shown in the bar strip.
    fn title(&self) -> String;

    fn render(&self, ctx: &PanelContext<'_>) -> Result<Markup, PanelError>;

    /// Panels that return `false` are never registered for AJAX requests.
    fn supports_ajax(&self) -> bool {
        true
    }

    /// Receives the final page markup before the bar is injected. Only
    /// called for `200` responses.
    fn inspect_html(&mut self, _html: &str) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelEntry {
    pub panel: String,
    pub label: String,
    pub detail: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

/// Request-scoped log that handlers use to feed recorder panels. Available
/// as a request extension while the debug bar is active.
#[derive(Clone, Default)]
pub struct PanelLog {
    entries: Arc<Mutex<Vec<PanelEntry>>>,
}

impl PanelLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, panel: &str, label: impl Into<String>) {
        self.push(panel, label.into(), None);
    }

    pub fn record_with(&self, panel: &str, label: impl Into<String>, detail: serde_json::Value) {
        self.push(panel, label.into(), Some(detail));
    }

    pub fn entries_for(&self, panel: &str) -> Vec<PanelEntry> {
        self.lock()
            .iter()
            .filter(|entry| entry.panel == panel)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, panel: &str, label: String, detail: Option<serde_json::Value>) {
        self.lock().push(PanelEntry {
            panel: panel.to_string(),
            label,
            detail,
            recorded_at: Utc::now(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PanelEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PanelLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelLog")
            .field("entries", &self.len())
            .finish()
    }
}

/// Request facts handed to panel factories.
#[derive(Debug, Clone)]
pub struct PanelSeed {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub ajax: bool,
    pub log: PanelLog,
}

impl PanelSeed {
    pub fn from_request(request: &Request, log: PanelLog) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            ajax: is_ajax(request.headers()),
            log,
        }
    }
}

impl Default for PanelSeed {
    fn default() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            ajax: false,
            log: PanelLog::default(),
        }
    }
}

/// `X-Requested-With: XMLHttpRequest` or an htmx request.
pub fn is_ajax(headers: &HeaderMap) -> bool {
    let header_matches = |name: &str, expected: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    };
    header_matches("x-requested-with", "XMLHttpRequest") || header_matches("hx-request", "true")
}

/// Ordered panel set for one request. Registration order is render order.
pub struct PanelRegistry {
    ajax: bool,
    panels: Vec<(String, Box<dyn Panel>)>,
}

impl PanelRegistry {
    pub fn new(ajax: bool) -> Self {
        Self {
            ajax,
            panels: Vec::new(),
        }
    }

    pub fn is_ajax(&self) -> bool {
        self.ajax
    }

    /// Inserts or replaces in place. Returns `false` when the panel was
    /// skipped because it cannot render for AJAX requests.
    pub fn register(&mut self, id: impl Into<String>, panel: Box<dyn Panel>) -> bool {
        if self.ajax && !panel.supports_ajax() {
            return false;
        }

        let id = id.into();
        match self.panels.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, slot)) => *slot = panel,
            None => self.panels.push((id, panel)),
        }
        true
    }

    pub fn get(&self, id: &str) -> Option<&dyn Panel> {
        self.panels
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, panel)| panel.as_ref())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut (dyn Panel + 'static)> {
        self.panels
            .iter_mut()
            .find(|(existing, _)| existing == id)
            .map(|(_, panel)| panel.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Panel)> {
        self.panels
            .iter()
            .map(|(id, panel)| (id.as_str(), panel.as_ref()))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.panels.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}

impl fmt::Debug for PanelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelRegistry")
            .field("ajax", &self.ajax)
            .field("panels", &self.ids())
            .finish()
    }
}

pub type PanelFactory = Arc<dyn Fn(&PanelSeed) -> Box<dyn Panel> + Send + Sync>;

/// Static mapping from configured panel names to factories.
#[derive(Clone, Default)]
pub struct PanelCatalog {
    factories: BTreeMap<String, PanelFactory>,
}

impl PanelCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every panel name the default configuration can enable, plus
    /// `html-validator`.
    pub fn builtin() -> Self {
        crate::panels::builtin_catalog()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PanelSeed) -> Box<dyn Panel> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(&self, name: &str, seed: &PanelSeed) -> Result<Box<dyn Panel>, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPanel(name.to_string()))?;
        Ok(factory(seed))
    }

    /// Builds the registry for one request. Every name must resolve before
    /// any panel is registered.
    pub fn build_registry(
        &self,
        names: &[String],
        seed: &PanelSeed,
    ) -> Result<PanelRegistry, ConfigError> {
        if let Some(missing) = names.iter().find(|name| !self.contains(name)) {
            return Err(ConfigError::UnknownPanel(missing.clone()));
        }

        let mut registry = PanelRegistry::new(seed.ajax);
        for name in names {
            let panel = self.create(name, seed)?;
            if !registry.register(name.clone(), panel) {
                tracing::debug!(panel = %name, "panel skipped for ajax request");
            }
        }
        Ok(registry)
    }
}

impl fmt::Debug for PanelCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelCatalog")
            .field("names", &self.names())
            .finish()
    }
}
