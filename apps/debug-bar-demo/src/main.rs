use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use clap::Parser;
use maud::{DOCTYPE, Markup, html};
use openagents_debug_bar::{
    DebugBar, DebugBarConfig, FatalError, MemorySession, PanelLog, SessionGateway, SessionHandle,
    Severity, attach, install_panic_hook,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Debug, Parser)]
#[command(about = "Serves a few pages with the debug bar attached")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    install_panic_hook();

    let args = Args::parse();
    let config = DebugBarConfig::from_env().context("load debug bar config")?;
    let bar = DebugBar::new(config);
    tracing::info!(
        enabled = bar.enabled(),
        append_to = bar.append_to().as_str(),
        "debug bar configured"
    );

    let app = attach(routes(), bar)
        .layer(Extension(SessionHandle::from(MemorySession::new())))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    tracing::info!(addr = %args.bind, "debug bar demo listening");
    axum::serve(listener, app).await.context("serve demo")?;
    Ok(())
}

fn routes() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/orders.json", get(orders_json))
        .route("/visit", get(visit))
        .route("/moved", get(moved))
        .route("/download", get(download))
        .route("/legacy", get(legacy))
        .route("/explode", get(explode))
}

fn layout(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { (title) }
            }
            body {
                h1 { (title) }
                (content)
                nav {
                    ul {
                        li { a href="/" { "Home" } }
                        li { a href="/orders.json" { "Orders (JSON)" } }
                        li { a href="/visit" { "Count a visit" } }
                        li { a href="/moved" { "Redirect" } }
                        li { a href="/download" { "Download" } }
                        li { a href="/legacy" { "Deprecation notice" } }
                        li { a href="/explode" { "Panic" } }
                    }
                }
            }
        }
    }
}

async fn index(log: Option<Extension<PanelLog>>) -> Html<String> {
    if let Some(Extension(log)) = log {
        log.record("routing", "GET / -> index");
        log.record_with(
            "database",
            "select id, total from orders limit 3",
            json!({"rows": 3, "elapsed_ms": 1.4}),
        );
        log.record("view", "layout");
    }
    let content = html! { p { "Open the bar at the bottom of the page." } };
    Html(layout("Debug bar demo", content).into_string())
}

async fn orders_json() -> Json<serde_json::Value> {
    Json(json!({"orders": [{"id": 1, "total": 42}, {"id": 2, "total": 7}]}))
}

async fn visit(
    Extension(session): Extension<SessionHandle>,
    log: Option<Extension<PanelLog>>,
) -> Html<String> {
    let gateway = session.gateway();
    let visits = match gateway.start() {
        Ok(()) => {
            let visits = gateway
                .get("visits")
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            gateway.insert("visits", visits.to_string());
            visits
        }
        Err(error) => {
            tracing::warn!(error = %error, "demo session unavailable");
            0
        }
    };
    if let Some(Extension(log)) = log {
        log.record_with("event", "visit.counted", json!({"visits": visits}));
    }
    // Session stays open, so the bar is delivered through the loader.
    Html(layout("Visits", html! { p { "Visits so far: " (visits) } }).into_string())
}

async fn moved() -> Redirect {
    Redirect::to("/")
}

async fn download() -> Response {
    (
        [
            (CONTENT_TYPE, "text/csv"),
            (CONTENT_DISPOSITION, "attachment; filename=\"orders.csv\""),
        ],
        "id,total\n1,42\n2,7\n",
    )
        .into_response()
}

// Listed in the bar with OA_DEBUG_BAR_STRICT_MODE=false, error screen otherwise.
async fn legacy() -> impl IntoResponse {
    let notice = FatalError::new(
        "legacy totals helper is deprecated",
        Severity::Deprecated,
        file!(),
        line!(),
    );
    let content = html! { p { "Rendered through the legacy totals helper." } };
    (Extension(notice), Html(layout("Legacy", content).into_string()))
}

async fn explode() -> Html<String> {
    let totals: Vec<u64> = Vec::new();
    Html(format!("first total: {}", totals[0]))
}
