pub mod config;
pub mod debugger;
pub mod fatal;
pub mod inject;
pub mod manager;
pub mod middleware;
pub mod panel;
pub mod panels;
pub mod render;
pub mod session;

pub use config::{AppendTo, ConfigError, DebugBarConfig, PanelToggle};
pub use debugger::{ASSET_MARKER, AssetKind, AssetResponse, Debugger, DebuggerOptions, ErrorReport};
pub use fatal::{FatalError, Severity, install_panic_hook};
pub use inject::{RenderContext, ResponseKind};
pub use manager::{DebugBar, DebugBarBuilder, Dispatch, RequestScope};
pub use middleware::{attach, debug_bar_gate};
pub use panel::{Panel, PanelCatalog, PanelContext, PanelError, PanelLog, PanelRegistry, PanelSeed};
pub use session::{
    DetachedSession, MemorySession, SessionError, SessionGateway, SessionHandle, SessionScope,
};

#[cfg(test)]
mod tests;
