use axum::http::header::{AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION};
use maud::{Markup, html};

use crate::panel::{Panel, PanelContext, PanelError, PanelSeed};

const REDACTED: &str = "[redacted]";

/// Method, URI, and headers of the current request.
#[derive(Debug, Clone)]
pub struct RequestPanel {
    method: String,
    uri: String,
    ajax: bool,
    headers: Vec<(String, String)>,
}

impl RequestPanel {
    pub fn from_seed(seed: &PanelSeed) -> Self {
        let headers = seed
            .headers
            .iter()
            .map(|(name, value)| {
                let shown = if [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE].contains(name) {
                    REDACTED.to_string()
                } else {
                    String::from_utf8_lossy(value.as_bytes()).into_owned()
                };
                (name.as_str().to_string(), shown)
            })
            .collect();

        Self {
            method: seed.method.to_string(),
            uri: seed.uri.to_string(),
            ajax: seed.ajax,
            headers,
        }
    }
}

impl Panel for RequestPanel {
    fn title(&self) -> String {
        format!("{} {}", self.method, self.uri)
    }

    fn render(&self, ctx: &PanelContext<'_>) -> Result<Markup, PanelError> {
        Ok(html! {
            h2 { "Request" }
            table {
                tr { th { "Method" } td { (self.method) } }
                tr { th { "URI" } td { (ctx.dumper.truncate(&self.uri)) } }
                tr { th { "AJAX" } td { (if self.ajax { "yes" } else { "no" }) } }
            }
            h3 { "Headers" }
            table {
                @for (name, value) in &self.headers {
                    tr { th { (name) } td { (ctx.dumper.truncate(value)) } }
                }
            }
        })
    }
}
