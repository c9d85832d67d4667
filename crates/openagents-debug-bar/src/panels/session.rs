use maud::{Markup, html};

use crate::panel::{Panel, PanelContext, PanelError};

/// Keys the bar writes into the session for itself.
const INTERNAL_KEY_PREFIX: &str = "debug_bar.";

/// Session contents, read while the renderer holds the session open.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPanel;

impl Panel for SessionPanel {
    fn title(&self) -> String {
        "Session".to_string()
    }

    fn render(&self, ctx: &PanelContext<'_>) -> Result<Markup, PanelError> {
        let entries: Vec<(String, String)> = ctx
            .session
            .entries()
            .into_iter()
            .filter(|(key, _)| !key.starts_with(INTERNAL_KEY_PREFIX))
            .collect();

        Ok(html! {
            h2 { "Session" }
            @if entries.is_empty() {
                p { "No session data." }
            } @else {
                table {
                    @for (key, value) in &entries {
                        tr {
                            th { (ctx.dumper.truncate(key)) }
                            td { (render_value(ctx, value)) }
                        }
                    }
                }
            }
        })
    }
}

/// Values stored as JSON objects or arrays get the structured dump.
fn render_value(ctx: &PanelContext<'_>, value: &str) -> Markup {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(parsed) if parsed.is_object() || parsed.is_array() => ctx.dumper.dump(&parsed),
        _ => html! { (ctx.dumper.truncate(value)) },
    }
}
