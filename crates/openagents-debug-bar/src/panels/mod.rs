mod html_validator;
mod recorder;
mod request;
mod session;

pub use html_validator::{HtmlIssue, HtmlValidatorPanel};
pub use recorder::RecorderPanel;
pub use request::RequestPanel;
pub use session::SessionPanel;

use crate::panel::{Panel, PanelCatalog, PanelSeed};

pub const HTML_VALIDATOR_PANEL: &str = "html-validator";

/// Panels fed by handlers through [`crate::panel::PanelLog`]:
/// `(name, tab title, renders for ajax requests)`.
const RECORDER_PANELS: &[(&str, &str, bool)] = &[
    ("routing", "Routing", true),
    ("database", "Database", true),
    ("view", "Views", true),
    ("event", "Events", true),
    ("auth", "Auth", true),
    ("terminal", "Terminal", false),
];

pub(crate) fn builtin_catalog() -> PanelCatalog {
    let mut catalog = PanelCatalog::empty();
    catalog
        .insert("request", |seed: &PanelSeed| -> Box<dyn Panel> {
            Box::new(RequestPanel::from_seed(seed))
        })
        .insert("session", |_seed: &PanelSeed| -> Box<dyn Panel> {
            Box::new(SessionPanel)
        })
        .insert(HTML_VALIDATOR_PANEL, |_seed: &PanelSeed| -> Box<dyn Panel> {
            Box::new(HtmlValidatorPanel::default())
        });

    for &(name, title, ajax) in RECORDER_PANELS {
        catalog.insert(name, move |seed: &PanelSeed| -> Box<dyn Panel> {
            Box::new(RecorderPanel::new(name, title, ajax, seed.log.clone()))
        });
    }
    catalog
}
