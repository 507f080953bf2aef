use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use cleaner_core::{
    db::{ProfileCounts, ProfileDb},
    notify::{LogNotifier, WebhookNotifier},
    platform::{DataCategory, Notifier},
    timers::TokioTimers,
    Action, Cleaner, Collaborators,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug)]
#[command(name = "cleaner_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    #[arg(long, default_value = "127.0.0.1:17700")]
    listen: String,

    /// SQLite profile database path (history, site data, settings).
    #[arg(long, default_value = "./data/cleaner-core.db")]
    db: PathBuf,

    /// POST scheduled-cleaning notifications as JSON to this URL.
    #[arg(long)]
    notify_url: Option<String>,

    /// Do not run the startup cleaning policy for this launch.
    #[arg(long, default_value_t = false)]
    skip_startup_clean: bool,
}

#[derive(Clone)]
struct AppState {
    cleaner: Arc<Mutex<Cleaner>>,
    db: ProfileDb,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

#[derive(Deserialize)]
struct VisitIngest {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Deserialize)]
struct SiteDataIngest {
    category: String,
    origin: String,
    #[serde(default)]
    ts: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cleaner_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = ProfileDb::open(&args.db)?;
    let profile = Arc::new(db.clone());

    let (alarm_tx, mut alarm_rx) = mpsc::unbounded_channel::<String>();
    let notifier: Arc<dyn Notifier> = match args.notify_url.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(LogNotifier),
    };

    let mut cleaner = Cleaner::start(
        Collaborators {
            history: profile.clone(),
            remover: profile.clone(),
            store: profile,
            timers: Arc::new(TokioTimers::new(alarm_tx)),
            notifier,
        },
        OffsetDateTime::now_utc(),
    )
    .await;
    if args.skip_startup_clean {
        info!("startup cleaning skipped by flag");
    } else {
        cleaner.run_startup_cleaning(OffsetDateTime::now_utc()).await;
    }
    let cleaner = Arc::new(Mutex::new(cleaner));

    // Alarm fires share the cleaner lock with HTTP requests, so they run one at a time.
    let alarm_cleaner = cleaner.clone();
    tokio::spawn(async move {
        while let Some(name) = alarm_rx.recv().await {
            let mut guard = alarm_cleaner.lock().await;
            guard.on_alarm(&name, OffsetDateTime::now_utc()).await;
        }
    });

    let state = AppState { cleaner, db };

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health))
        .route("/action", post(post_action).options(options_ok))
        .route("/settings", get(get_settings))
        .route("/stats", get(get_stats))
        .route("/next_clean", get(get_next_clean))
        .route("/visit", post(post_visit).options(options_ok))
        .route("/site_data", post(post_site_data).options(options_ok))
        .with_state(state)
        .layer(cors);

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    if let Some(port_str) = input.strip_prefix("localhost:") {
        let port: u16 = port_str.parse().map_err(|_| {
            anyhow::anyhow!(
                "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                input,
                DEFAULT_PORT
            )
        })?;
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

fn err_response(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrResponse { ok: false, error })).into_response()
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
    profile: ProfileCounts,
}

async fn health(State(state): State<AppState>) -> Response {
    match state.db.counts().await {
        Ok(profile) => Json(OkResponse {
            ok: true,
            data: Some(HealthInfo {
                service: "cleaner_core",
                version: env!("CARGO_PKG_VERSION"),
                profile,
            }),
        })
        .into_response(),
        Err(err) => {
            error!("profile counts failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn run_action(state: &AppState, action: Action) -> Response {
    let mut cleaner = state.cleaner.lock().await;
    let reply = cleaner.dispatch(action, OffsetDateTime::now_utc()).await;
    Json(reply).into_response()
}

async fn post_action(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let action: Action = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(err) => {
            warn!("rejected action request: {err}");
            return err_response(StatusCode::BAD_REQUEST, "invalid_request");
        }
    };
    run_action(&state, action).await
}

async fn get_settings(State(state): State<AppState>) -> Response {
    run_action(&state, Action::GetSettings).await
}

async fn get_stats(State(state): State<AppState>) -> Response {
    run_action(&state, Action::GetStats).await
}

async fn get_next_clean(State(state): State<AppState>) -> Response {
    run_action(&state, Action::GetNextCleanTime).await
}

/// Milliseconds for an optional RFC3339 timestamp; absent means `now`.
fn parse_ingest_ts(ts: Option<&str>, now: OffsetDateTime) -> Option<i64> {
    let t = match ts {
        Some(s) => OffsetDateTime::parse(s, &Rfc3339).ok()?,
        None => now,
    };
    Some((t.unix_timestamp_nanos() / 1_000_000) as i64)
}

async fn post_visit(State(state): State<AppState>, Json(v): Json<VisitIngest>) -> Response {
    let url = v.url.trim();
    if url.is_empty() {
        return err_response(StatusCode::BAD_REQUEST, "missing_url");
    }
    let Some(visit_ms) = parse_ingest_ts(v.ts.as_deref(), OffsetDateTime::now_utc()) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_ts");
    };
    let title = v.title.as_deref().map(str::trim).filter(|t| !t.is_empty());

    if let Err(err) = state.db.record_visit(url, title, visit_ms).await {
        error!("record_visit failed: {err}");
        return err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error");
    }
    Json(OkResponse::<Value> { ok: true, data: None }).into_response()
}

async fn post_site_data(State(state): State<AppState>, Json(d): Json<SiteDataIngest>) -> Response {
    let Some(category) = DataCategory::parse(d.category.trim()) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_category");
    };
    let origin = d.origin.trim();
    if origin.is_empty() {
        return err_response(StatusCode::BAD_REQUEST, "missing_origin");
    }
    let Some(stored_ms) = parse_ingest_ts(d.ts.as_deref(), OffsetDateTime::now_utc()) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_ts");
    };

    if let Err(err) = state.db.store_site_data(category, origin, stored_ms).await {
        error!("store_site_data failed: {err}");
        return err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error");
    }
    Json(OkResponse::<Value> { ok: true, data: None }).into_response()
}
