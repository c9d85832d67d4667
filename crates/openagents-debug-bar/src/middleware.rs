use std::any::Any;

use axum::Router;
use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};

use crate::debugger::ErrorReport;
use crate::fatal::{self, FatalError};
use crate::inject::{self, ResponseKind};
use crate::manager::{DebugBar, Dispatch, RequestScope};
use crate::panel::{PanelLog, PanelSeed};
use crate::session::{SessionGateway, SessionHandle};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Adds the debug bar to a router.
///
/// Host session middleware must run outside this layer so the
/// [`SessionHandle`] extension is present when the gate sees the request.
pub fn attach<S>(router: Router<S>, bar: DebugBar) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if !bar.enabled() {
        return router;
    }
    router
        .layer(middleware::from_fn_with_state(bar.clone(), debug_bar_gate))
        .layer(CatchPanicLayer::custom(PanicPage::new(bar)))
}

pub async fn debug_bar_gate(
    State(bar): State<DebugBar>,
    mut request: Request,
    next: Next,
) -> Response {
    if !bar.enabled() {
        return next.run(request).await;
    }

    let session = request
        .extensions()
        .get::<SessionHandle>()
        .cloned()
        .unwrap_or_else(SessionHandle::detached);

    if let Dispatch::Asset(asset) = bar.intercept(request.uri(), session.gateway()) {
        return asset.into_response();
    }

    let log = PanelLog::new();
    let mut scope = match bar.begin(PanelSeed::from_request(&request, log.clone())) {
        Ok(scope) => scope,
        Err(error) => {
            tracing::warn!(error = %error, "debug bar disabled for request");
            return next.run(request).await;
        }
    };
    request.extensions_mut().insert(log);
    let head = request.method() == Method::HEAD;

    let response = next.run(request).await;
    if head || !may_carry_body(response.status()) {
        return response;
    }
    inject_response(&bar, &mut scope, session.gateway(), response).await
}

/// `1xx`, `204` and `304` responses never carry a body.
fn may_carry_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Explicit extension first, then attachment downloads, then bodies whose
/// size is not known up front.
pub fn classify_response(response: &Response) -> ResponseKind {
    if let Some(kind) = response.extensions().get::<ResponseKind>() {
        return *kind;
    }

    let attachment = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("attachment"));
    if attachment {
        return ResponseKind::BinaryFile;
    }

    if response.body().size_hint().exact().is_none() {
        return ResponseKind::Streamed;
    }
    ResponseKind::Regular
}

async fn inject_response(
    bar: &DebugBar,
    scope: &mut RequestScope,
    session: &dyn SessionGateway,
    response: Response,
) -> Response {
    // Handlers report errors they recovered from as a `FatalError` extension.
    if let Some(error) = response.extensions().get::<FatalError>().cloned() {
        if bar.is_fatal(&error) {
            return error_page(bar.shutdown_handler(scope, session, "", Some(&error)));
        }
        bar.record_warning(scope, &error);
    }

    let kind = classify_response(&response);
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let ctx = bar.render_context(scope, status, content_type.as_deref(), kind);
    if inject::deny(&ctx) {
        return response;
    }
    if response.headers().contains_key(CONTENT_ENCODING) {
        tracing::debug!("encoded response body left untouched by debug bar");
        return response;
    }

    let limit = bar.config().max_body_bytes;
    match response.body().size_hint().exact() {
        Some(size) if size <= limit as u64 => {}
        _ => return response,
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(error = %error, "debug bar could not buffer response body");
            return Response::from_parts(parts, Body::empty());
        }
    };
    let content = match std::str::from_utf8(&bytes) {
        Ok(content) => content,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };

    let Some(injected) = bar.render_response(scope, session, &ctx, content) else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(injected.len()));
    Response::from_parts(parts, Body::from(injected))
}

/// `CatchPanicLayer` handler that answers with the error screen.
#[derive(Clone)]
pub struct PanicPage {
    bar: DebugBar,
}

impl PanicPage {
    pub fn new(bar: DebugBar) -> Self {
        Self { bar }
    }
}

impl ResponseForPanic for PanicPage {
    type ResponseBody = Body;

    fn response_for_panic(
        &mut self,
        err: Box<dyn Any + Send + 'static>,
    ) -> Response<Self::ResponseBody> {
        let message = fatal::panic_message(err.as_ref());
        let error = match fatal::take_last_error() {
            Some(recorded) if recorded.message == message => recorded,
            _ => FatalError::from_panic(err.as_ref(), None),
        };
        tracing::error!(
            error = %error.message,
            file = %error.file,
            line = error.line,
            "request handler panicked"
        );

        error_page(self.bar.exception_handler(&ErrorReport::from(&error)))
    }
}

fn error_page(page: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(CONTENT_TYPE, HTML_CONTENT_TYPE)],
        page,
    )
        .into_response()
}
