use anyhow::Result;
use axum::body::Body;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION,
};
use axum::http::{Method, Request, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use crate::config::{DebugBarConfig, PanelToggle};
use crate::debugger::Debugger;
use crate::fatal::{FatalError, Severity};
use crate::panel::PanelLog;
use crate::session::{MemorySession, SessionGateway, SessionHandle};
use crate::{DebugBar, attach};

const PAGE_HEAD: &str = concat!(
    "<!DOCTYPE html><html><head><title>Orders</title></head>",
    "<body><h1>Orders</h1>"
);
const PAGE: &str = concat!(
    "<!DOCTYPE html><html><head><title>Orders</title></head>",
    "<body><h1>Orders</h1></body></html>"
);

async fn page() -> Html<&'static str> {
    Html(PAGE)
}

async fn orders_json() -> Json<serde_json::Value> {
    Json(json!({"orders": [1, 2, 3]}))
}

async fn moved() -> Redirect {
    Redirect::to("/orders")
}

async fn download() -> Response {
    (
        [
            (CONTENT_TYPE, "text/html"),
            (CONTENT_DISPOSITION, "attachment; filename=\"orders.html\""),
        ],
        PAGE,
    )
        .into_response()
}

async fn recorded(Extension(log): Extension<PanelLog>) -> Html<&'static str> {
    log.record("database", "select * from orders");
    Html(PAGE)
}

async fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn failed_job() -> impl IntoResponse {
    let error = FatalError::new("job queue unreachable", Severity::Error, "src/jobs.rs", 41);
    (Extension(error), Html(PAGE))
}

async fn deprecated_call() -> impl IntoResponse {
    let warning = FatalError::new("legacy helper", Severity::Deprecated, "src/views.rs", 9);
    (Extension(warning), Html(PAGE))
}

async fn exploding() -> Html<&'static str> {
    panic!("order total overflowed")
}

fn router(config: DebugBarConfig) -> Router {
    let app = Router::new()
        .route("/", get(page))
        .route("/orders.json", get(orders_json))
        .route("/moved", get(moved))
        .route("/download", get(download))
        .route("/recorded", get(recorded))
        .route("/explode", get(exploding))
        .route("/empty", get(no_content))
        .route("/failed", get(failed_job))
        .route("/deprecated", get(deprecated_call));
    attach(app, DebugBar::new(config))
}

fn get_request(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

async fn read_text(response: Response) -> Result<String> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8(bytes.to_vec())?)
}

#[tokio::test]
async fn html_pages_get_the_bar_before_body_close() -> Result<()> {
    let response = router(DebugBarConfig::for_tests())
        .oneshot(get_request("/")?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let declared_length = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    let body = read_text(response).await?;

    assert_eq!(declared_length, Some(body.len()));
    assert!(body.starts_with(PAGE_HEAD));
    let bar = body.find("id=\"oa-debug-bar\"").expect("bar injected");
    let body_close = body.rfind("</body>").expect("body close kept");
    assert!(bar < body_close);
    assert!(body.ends_with("</body></html>"));
    Ok(())
}

#[tokio::test]
async fn json_is_left_alone_when_accepts_lists_html_only() -> Result<()> {
    let config = DebugBarConfig {
        accepts: vec!["text/html".to_string()],
        ..DebugBarConfig::for_tests()
    };
    let response = router(config).oneshot(get_request("/orders.json")?).await?;
    let body = read_text(response).await?;
    assert_eq!(body, r#"{"orders":[1,2,3]}"#);
    Ok(())
}

#[tokio::test]
async fn redirects_pass_through_untouched() -> Result<()> {
    let response = router(DebugBarConfig::for_tests())
        .oneshot(get_request("/moved")?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).and_then(|value| value.to_str().ok()),
        Some("/orders")
    );
    assert!(read_text(response).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn attachments_are_not_injected() -> Result<()> {
    let response = router(DebugBarConfig::for_tests())
        .oneshot(get_request("/download")?)
        .await?;
    assert_eq!(read_text(response).await?, PAGE);
    Ok(())
}

#[tokio::test]
async fn stylesheet_is_served_from_the_marker_endpoint() -> Result<()> {
    let response = router(DebugBarConfig::for_tests())
        .oneshot(get_request("/?_debug_bar=css")?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
        Some("text/css; charset=utf-8")
    );
    assert_eq!(
        response.headers().get(CACHE_CONTROL).and_then(|value| value.to_str().ok()),
        Some("max-age=86400")
    );
    let declared_length = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    let body = read_text(response).await?;
    assert_eq!(declared_length, Some(body.len()));
    assert!(body.contains("#oa-debug-bar"));
    Ok(())
}

#[tokio::test]
async fn deferred_content_is_served_once_from_the_session() -> Result<()> {
    let session = MemorySession::new();
    assert!(session.start().is_ok());
    assert!(Debugger::default().stash_content(
        &session,
        "abc123",
        "<div id=\"oa-debug-bar\"></div>"
    ));
    assert!(session.close().is_ok());

    let app = router(DebugBarConfig::for_tests())
        .layer(Extension(SessionHandle::from(session.clone())));

    let response = app
        .clone()
        .oneshot(get_request("/?_debug_bar=content.abc123")?)
        .await?;
    assert!(response.headers().get(CACHE_CONTROL).is_none());
    assert_eq!(
        response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
        Some("text/javascript; charset=utf-8")
    );
    assert!(read_text(response).await?.contains("oa-debug-bar"));
    assert!(!session.is_started());

    let again = app.oneshot(get_request("/?_debug_bar=content.abc123")?).await?;
    assert!(read_text(again).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn open_host_session_gets_the_loader() -> Result<()> {
    let session = MemorySession::started();
    let app = router(DebugBarConfig::for_tests())
        .layer(Extension(SessionHandle::from(session.clone())));

    let body = read_text(app.oneshot(get_request("/")?).await?).await?;
    let loader = body
        .find("<script src=\"?_debug_bar=content.")
        .expect("loader injected");
    assert!(loader < body.find("</head>").expect("head close kept"));
    assert!(!session.is_started());
    Ok(())
}

#[tokio::test]
async fn ajax_responses_are_injected_regardless_of_accepts() -> Result<()> {
    let config = DebugBarConfig {
        accepts: vec!["text/html".to_string()],
        ..DebugBarConfig::for_tests()
    };
    let request = Request::builder()
        .uri("/orders.json")
        .header("x-requested-with", "XMLHttpRequest")
        .body(Body::empty())?;
    let body = read_text(router(config).oneshot(request).await?).await?;

    assert!(body.starts_with(r#"{"orders":[1,2,3]}"#));
    assert!(body.contains("data-ajax=\"true\""));
    Ok(())
}

#[tokio::test]
async fn handlers_feed_recorder_panels() -> Result<()> {
    let body = read_text(
        router(DebugBarConfig::for_tests())
            .oneshot(get_request("/recorded")?)
            .await?,
    )
    .await?;
    assert!(body.contains("Database (1)"));
    assert!(body.contains("select * from orders"));
    Ok(())
}

#[tokio::test]
async fn disabled_bar_passes_everything_through() -> Result<()> {
    let config = DebugBarConfig {
        enabled: false,
        ..DebugBarConfig::for_tests()
    };
    let app = router(config);

    let body = read_text(app.clone().oneshot(get_request("/")?).await?).await?;
    assert_eq!(body, PAGE);

    let asset = read_text(app.oneshot(get_request("/?_debug_bar=css")?).await?).await?;
    assert_eq!(asset, PAGE);
    Ok(())
}

#[tokio::test]
async fn unknown_panel_leaves_the_response_alone() -> Result<()> {
    let config = DebugBarConfig {
        panels: vec![PanelToggle::new("queue", true)],
        ..DebugBarConfig::for_tests()
    };
    let body = read_text(router(config).oneshot(get_request("/")?).await?).await?;
    assert_eq!(body, PAGE);
    Ok(())
}

#[tokio::test]
async fn handler_panic_renders_the_error_screen() -> Result<()> {
    let response = router(DebugBarConfig::for_tests())
        .oneshot(get_request("/explode")?)
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
        Some("text/html; charset=utf-8")
    );
    let body = read_text(response).await?;
    assert!(body.contains("oa-blue-screen"));
    assert!(body.contains("order total overflowed"));
    Ok(())
}

#[tokio::test]
async fn no_content_responses_stay_empty() -> Result<()> {
    let response = router(DebugBarConfig::for_tests())
        .oneshot(get_request("/empty")?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(read_text(response).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn head_requests_are_not_injected() -> Result<()> {
    let request = Request::builder()
        .method(Method::HEAD)
        .uri("/")
        .body(Body::empty())?;
    let response = router(DebugBarConfig::for_tests()).oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!read_text(response).await?.contains("oa-debug-bar"));
    Ok(())
}

#[tokio::test]
async fn reported_fatal_error_renders_the_error_screen() -> Result<()> {
    let response = router(DebugBarConfig::for_tests())
        .oneshot(get_request("/failed")?)
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_text(response).await?;
    assert!(body.contains("oa-blue-screen"));
    assert!(body.contains("job queue unreachable"));
    assert!(!body.contains("<h1>Orders</h1>"));
    Ok(())
}

#[tokio::test]
async fn reported_warning_is_listed_in_the_bar() -> Result<()> {
    let config = DebugBarConfig {
        strict_mode: false,
        ..DebugBarConfig::for_tests()
    };
    let response = router(config).oneshot(get_request("/deprecated")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_text(response).await?;
    assert!(body.starts_with(PAGE_HEAD));
    assert!(body.contains("Deprecated: legacy helper (src/views.rs:9)"));
    Ok(())
}
