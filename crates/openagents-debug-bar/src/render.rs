use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use maud::{Markup, PreEscaped, html};

use crate::debugger::{ASSET_MARKER, Debugger};
use crate::fatal::panic_message;
use crate::panel::{Panel, PanelContext, PanelError, PanelRegistry};
use crate::session::{SessionGateway, SessionScope};

pub const BAR_ELEMENT_ID: &str = "oa-debug-bar";

/// Request facts shown in the info strip.
#[derive(Debug, Clone, Default)]
pub struct BarMeta {
    pub elapsed: Duration,
    pub warnings: Vec<String>,
    pub ajax: bool,
}

/// Bar markup, and whether it was stashed in the session for the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBar {
    pub markup: String,
    pub stashed: bool,
}

struct RenderedPanel<'a> {
    id: &'a str,
    title: String,
    body: Result<Markup, PanelError>,
}

/// Renders every registered panel inside an open session and returns the
/// bar markup. A panel that errors or panics is replaced by an error stub;
/// the rest of the bar still renders.
///
/// With `stash_id` set, the finished markup is also written to the session
/// under that id before the session is closed again. `stashed` is `false`
/// when the session could not be opened for that write.
pub fn render_bar(
    debugger: &Debugger,
    registry: &PanelRegistry,
    session: &dyn SessionGateway,
    meta: &BarMeta,
    stash_id: Option<&str>,
) -> RenderedBar {
    let scope = SessionScope::open(session);
    let ctx = PanelContext {
        dumper: debugger.dumper(),
        session: scope.gateway(),
    };

    let panels: Vec<RenderedPanel<'_>> = registry
        .iter()
        .map(|(id, panel)| render_panel(id, panel, &ctx))
        .collect();

    let markup = bar_markup(debugger, &panels, meta).into_string();
    let stashed = stash_id.is_some_and(|id| debugger.stash_content(scope.gateway(), id, &markup));
    drop(scope);
    RenderedBar { markup, stashed }
}

/// Script tag that pulls stashed bar content by id.
pub fn render_loader(content_id: &str) -> String {
    let src = format!("?{ASSET_MARKER}=content.{content_id}");
    html! { script src=(src) async {} }.into_string()
}

fn render_panel<'a>(id: &'a str, panel: &dyn Panel, ctx: &PanelContext<'_>) -> RenderedPanel<'a> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (panel.title(), panel.render(ctx))));
    let (title, body) = match outcome {
        Ok(rendered) => rendered,
        Err(payload) => (
            id.to_string(),
            Err(PanelError::Panicked(panic_message(payload.as_ref()))),
        ),
    };

    if let Err(error) = &body {
        tracing::warn!(panel = %id, error = %error, "debug bar panel failed to render");
    }

    RenderedPanel { id, title, body }
}

fn bar_markup(debugger: &Debugger, panels: &[RenderedPanel<'_>], meta: &BarMeta) -> Markup {
    let css_href = format!("?{ASSET_MARKER}=css&v={}", debugger.css_version());
    let js_src = format!("?{ASSET_MARKER}=js&v={}", debugger.js_version());
    let elapsed_ms = meta.elapsed.as_secs_f64() * 1000.0;

    html! {
        link rel="stylesheet" href=(css_href);
        div id=(BAR_ELEMENT_ID) data-ajax=(meta.ajax) {
            div class="oa-debug-bar-strip" {
                span class="oa-debug-bar-info" title="Request time" {
                    (format!("{elapsed_ms:.1} ms"))
                }
                @for warning in &meta.warnings {
                    span class="oa-debug-bar-warning" { (warning) }
                }
                @for panel in panels {
                    div class="oa-debug-bar-panel" data-panel=(panel.id) {
                        button type="button" class="oa-debug-bar-tab" { (panel.title) }
                        div class="oa-debug-bar-body" {
                            @match &panel.body {
                                Ok(body) => (body),
                                Err(error) => p class="oa-debug-bar-error" { (error) },
                            }
                        }
                    }
                }
            }
        }
        script src=(js_src) defer {}
        script { (PreEscaped("window.OpenAgentsDebugBar&&window.OpenAgentsDebugBar.init();")) }
    }
}
