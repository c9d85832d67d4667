use maud::{Markup, html};

use crate::panel::{Panel, PanelContext, PanelError, PanelLog};

/// Lists whatever handlers recorded under this panel's name for the
/// current request.
#[derive(Debug, Clone)]
pub struct RecorderPanel {
    name: &'static str,
    title: &'static str,
    ajax: bool,
    log: PanelLog,
}

impl RecorderPanel {
    pub fn new(name: &'static str, title: &'static str, ajax: bool, log: PanelLog) -> Self {
        Self {
            name,
            title,
            ajax,
            log,
        }
    }
}

impl Panel for RecorderPanel {
    fn title(&self) -> String {
        let count = self.log.entries_for(self.name).len();
        if count == 0 {
            self.title.to_string()
        } else {
            format!("{} ({count})", self.title)
        }
    }

    fn render(&self, ctx: &PanelContext<'_>) -> Result<Markup, PanelError> {
        let entries = self.log.entries_for(self.name);
        Ok(html! {
            h2 { (self.title) }
            @if entries.is_empty() {
                p { "Nothing recorded." }
            } @else {
                ol {
                    @for entry in &entries {
                        li {
                            time datetime=(entry.recorded_at.to_rfc3339()) {
                                (entry.recorded_at.format("%H:%M:%S%.3f"))
                            }
                            " "
                            (ctx.dumper.truncate(&entry.label))
                            @if let Some(detail) = &entry.detail {
                                (ctx.dumper.dump(detail))
                            }
                        }
                    }
                }
            }
        })
    }

    fn supports_ajax(&self) -> bool {
        self.ajax
    }
}
