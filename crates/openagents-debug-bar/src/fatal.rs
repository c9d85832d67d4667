use std::any::Any;
use std::panic::{self, Location, PanicHookInfo};
use std::sync::{Mutex, MutexGuard, Once, OnceLock, PoisonError};

use serde::Serialize;

static LAST_ERROR: OnceLock<Mutex<Option<FatalError>>> = OnceLock::new();
static HOOK_INSTALLED: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    CoreError,
    CompileError,
    Parse,
    RecoverableError,
    UserError,
    Warning,
    UserWarning,
    Notice,
    Deprecated,
}

impl Severity {
    /// Errors that end the request. In strict mode every severity does.
    pub fn is_fatal(self, strict_mode: bool) -> bool {
        match self {
            Self::Error
            | Self::CoreError
            | Self::CompileError
            | Self::Parse
            | Self::RecoverableError
            | Self::UserError => true,
            Self::Warning | Self::UserWarning | Self::Notice | Self::Deprecated => strict_mode,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "Fatal Error",
            Self::CoreError => "Core Error",
            Self::CompileError => "Compile Error",
            Self::Parse => "Parse Error",
            Self::RecoverableError => "Recoverable Error",
            Self::UserError => "User Error",
            Self::Warning => "Warning",
            Self::UserWarning => "User Warning",
            Self::Notice => "Notice",
            Self::Deprecated => "Deprecated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct FatalError {
    pub message: String,
    pub severity: Severity,
    pub file: String,
    pub line: u32,
}

impl FatalError {
    pub fn new(
        message: impl Into<String>,
        severity: Severity,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            message: message.into(),
            severity,
            file: file.into(),
            line,
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> Self {
        Self {
            message: panic_message(payload),
            severity: Severity::Error,
            file: location
                .map(|location| location.file().to_string())
                .unwrap_or_default(),
            line: location.map(Location::line).unwrap_or_default(),
        }
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "panic with a non-string payload".to_string()
}

/// Chains a hook in front of the current one that records every panic's
/// message and location, so the error page rendered after unwinding can
/// point at the failing line. Installing more than once is a no-op.
pub fn install_panic_hook() {
    HOOK_INSTALLED.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            record(FatalError::from_panic(info.payload(), info.location()));
            previous(info);
        }));
    });
}

pub fn record(error: FatalError) {
    *slot() = Some(error);
}

pub fn last_error() -> Option<FatalError> {
    slot().clone()
}

pub fn take_last_error() -> Option<FatalError> {
    slot().take()
}

fn slot() -> MutexGuard<'static, Option<FatalError>> {
    LAST_ERROR
        .get_or_init(|| Mutex::new(None))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{FatalError, Severity, panic_message};

    #[test]
    fn fatal_severities_follow_strict_mode() {
        assert!(Severity::Error.is_fatal(false));
        assert!(Severity::Parse.is_fatal(false));
        assert!(Severity::UserError.is_fatal(false));
        assert!(!Severity::Warning.is_fatal(false));
        assert!(!Severity::Notice.is_fatal(false));
        assert!(Severity::Warning.is_fatal(true));
        assert!(Severity::Deprecated.is_fatal(true));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(static_payload.as_ref()), "boom");

        let owned_payload: Box<dyn std::any::Any + Send> = Box::new("owned boom".to_string());
        assert_eq!(panic_message(owned_payload.as_ref()), "owned boom");

        let opaque_payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(
            panic_message(opaque_payload.as_ref()),
            "panic with a non-string payload"
        );
    }

    #[test]
    fn from_panic_keeps_location() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("index out of bounds");
        let location = std::panic::Location::caller();
        let error = FatalError::from_panic(payload.as_ref(), Some(location));

        assert_eq!(error.message, "index out of bounds");
        assert_eq!(error.severity, Severity::Error);
        assert_eq!(error.file, location.file());
        assert_eq!(error.line, location.line());
        assert_eq!(error.to_string(), "index out of bounds");
    }
}
