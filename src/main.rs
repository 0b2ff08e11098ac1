#![deny(clippy::all, clippy::pedantic)]

mod database;
mod error;
mod gateway;
mod identifier;
mod memory;
mod models;
mod settings;

use std::{fmt::Write, sync::Arc};

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::Path,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{HOST, LOCATION},
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use database::{MappingStore, MongoStore};
use error::ShortenError;
use gateway::Gateway;
use memory::MemoryStore;
use models::{ShortenRequest, ShortenResponse};
use settings::{Settings, StoreBackend};
use tokio::{net::TcpListener, signal, sync::watch};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

const INDEX_HTML: &str = include_str!("../static/index.html");

async fn shorten_url_route(
    Extension(gateway): Extension<Gateway>,
    Extension(settings): Extension<Arc<Settings>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ShortenResponse>, ShortenError> {
    let params = serde_json::from_slice::<ShortenRequest>(&body)
        .map_err(|_| ShortenError::Validation("Invalid JSON".to_owned()))?;

    let original_url = identifier::normalize(&params.url)?;
    let id = identifier::generate(&original_url);
    gateway.create_or_get(&id, &original_url).await?;

    let host = headers.get(HOST).and_then(|value| value.to_str().ok());
    let short_url = settings.short_url(host, &id);

    Ok(Json(ShortenResponse {
        original_url,
        short_url,
    }))
}

async fn redirect_route(
    Extension(gateway): Extension<Gateway>,
    Path(id): Path<String>,
) -> Result<Response, ShortenError> {
    if id.is_empty() || id == "favicon.ico" {
        return Err(ShortenError::NotFound(id));
    }

    let record = gateway.resolve(&id).await?;
    let location = location_header(&record.original_url)?;

    Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
}

/// Stored URLs are never validated, so line breaks become spaces and other
/// control characters are percent-encoded before they reach the header.
fn location_header(url: &str) -> Result<HeaderValue, ShortenError> {
    let mut location = String::with_capacity(url.len());
    for c in url.chars() {
        match c {
            '\r' | '\n' => location.push(' '),
            c if c.is_ascii_control() => {
                write!(location, "%{:02X}", u32::from(c))
                    .map_err(|_| ShortenError::Validation("unusable redirect target".to_owned()))?;
            }
            c => location.push(c),
        }
    }

    HeaderValue::try_from(location)
        .map_err(|_| ShortenError::Validation("unusable redirect target".to_owned()))
}

async fn index_route() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_route() -> &'static str {
    "OK"
}

fn router(gateway: Gateway, settings: Arc<Settings>) -> Router {
    let request_timeout = settings.request_timeout();

    Router::new()
        .route("/", get(index_route))
        .route("/health", get(health_route))
        .route("/shorten", post(shorten_url_route))
        .route("/{id}", get(redirect_route))
        .layer(Extension(gateway))
        .layer(Extension(settings))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Opens the configured store and wraps it in a [`Gateway`].
async fn open_gateway(settings: &Settings) -> anyhow::Result<Gateway> {
    let store: Arc<dyn MappingStore> = match settings.store_backend {
        StoreBackend::Mongodb => Arc::new(
            MongoStore::connect(&settings.mongodb_uri, &settings.mongodb_database)
                .await
                .context("could not connect to mongodb")?,
        ),
        StoreBackend::Memory => Arc::new(MemoryStore::default()),
    };
    let gateway = Gateway::new(store, settings.visit_timeout());

    let stored = gateway.count().await?;
    tracing::info!(backend = gateway.backend_name(), stored, "store ready");

    Ok(gateway)
}

#[tracing::instrument(skip_all)]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(err = ?err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(err = ?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    // A closed channel means the signal task is gone; treat it as a stop.
    stop.wait_for(|flag| *flag).await.ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let settings = Arc::new(Settings::load().context("invalid configuration")?);
    let gateway = open_gateway(&settings).await?;
    let app = router(gateway.clone(), Arc::clone(&settings));

    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("could not bind port {}", settings.port))?;
    tracing::info!(port = settings.port, "server listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        stop_tx.send_replace(true);
    });

    let shutdown = stopped(stop_rx.clone());
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    // Draining is bounded once a stop signal arrives.
    let grace = settings.shutdown_timeout();
    tokio::select! {
        result = &mut server => result.context("server task panicked")??,
        () = async {
            stopped(stop_rx).await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(?grace, "in-flight requests did not finish in time");
        }
    }

    gateway.close().await;
    tracing::info!("Server gracefully stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn test_app() -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let gateway = Gateway::new(store.clone(), Duration::from_secs(5));
        let settings = Settings {
            mongodb_uri: String::new(),
            mongodb_database: String::new(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            visit_timeout_secs: 5,
            request_timeout_secs: 10,
            shutdown_timeout_secs: 5,
            base_url: None,
        };

        (router(gateway, Arc::new(settings)), store)
    }

    fn shorten_request(body: String) -> Request<Body> {
        Request::post("/shorten")
            .header("Host", "sho.rt")
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice::<Value>(&body_bytes).unwrap()
    }

    #[tokio::test]
    async fn shorten_url_valid() {
        let (app, _) = test_app();

        let body = json!({ "url": "example.com/page" });
        let response = app.oneshot(shorten_request(body.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["original_url"], "http://example.com/page");
        assert_eq!(json["short_url"], "http://sho.rt/srkwwb7N");
    }

    #[tokio::test]
    async fn shorten_url_twice_stores_once() {
        let (app, store) = test_app();

        for _ in 0..2 {
            let body = json!({ "url": "https://example.com" });
            let response = app
                .clone()
                .oneshot(shorten_request(body.to_string()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["short_url"], "http://sho.rt/EAaArVRs");
        }

        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn shorten_url_empty() {
        let (app, store) = test_app();

        let response = app
            .clone()
            .oneshot(shorten_request(json!({ "url": "" }).to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(shorten_request(json!({}).to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shorten_url_invalid_json() {
        let (app, _) = test_app();

        let response = app
            .oneshot(shorten_request("{not json".to_owned()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn shorten_url_wrong_method() {
        let (app, _) = test_app();

        let response = app
            .oneshot(Request::get("/shorten").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn redirect_existing_path() {
        let (app, store) = test_app();

        let body = json!({ "url": "https://example.com/test-redirect" });
        let response = app
            .clone()
            .oneshot(shorten_request(body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let short_url = json["short_url"].as_str().unwrap();
        let id = short_url.rsplit('/').next().unwrap().to_owned();

        let redirect_response = app
            .oneshot(Request::get(format!("/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(redirect_response.status(), StatusCode::FOUND);
        assert_eq!(
            redirect_response.headers().get("location").unwrap(),
            "https://example.com/test-redirect"
        );

        let mut visits = 0;
        for _ in 0..200 {
            visits = store.find(&id).await.unwrap().unwrap().visits;
            if visits == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(visits, 1);
    }

    #[tokio::test]
    async fn redirect_invalid_path() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::get("/invalidpath").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn favicon_is_not_found() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::get("/favicon.ico").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn index_is_html() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/html"));
    }

    #[tokio::test]
    async fn redirect_control_char_url() {
        let (app, store) = test_app();

        let body = json!({ "url": "example.com/a\nb\r\u{1}c\u{7f}" });
        let response = app
            .clone()
            .oneshot(shorten_request(body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let id = json["short_url"]
            .as_str()
            .unwrap()
            .rsplit('/')
            .next()
            .unwrap()
            .to_owned();

        let redirect_response = app
            .oneshot(Request::get(format!("/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(redirect_response.status(), StatusCode::FOUND);
        assert_eq!(
            redirect_response.headers().get("location").unwrap(),
            "http://example.com/a b %01c%7F"
        );
        assert_eq!(
            store.find(&id).await.unwrap().unwrap().original_url,
            "http://example.com/a\nb\r\u{1}c\u{7f}"
        );
    }

    #[test]
    fn location_header_keeps_printable_urls() {
        assert_eq!(
            location_header("https://example.com/ü?q=1\t").unwrap(),
            HeaderValue::from_str("https://example.com/ü?q=1%09").unwrap()
        );
    }
}
