use crate::config::{ExporterConfig, TlsPaths};
use crate::metrics::{self, MetricsAdapter};
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Metrics router. `/` and `/metrics` both trigger one collection per request.
pub fn router(adapter: MetricsAdapter) -> Router {
    Router::new()
        .route("/", get(scrape))
        .route("/metrics", get(scrape))
        .with_state(Arc::new(adapter))
}

async fn scrape(State(adapter): State<Arc<MetricsAdapter>>) -> Response {
    debug!("Scrape requested");
    match adapter.collect().await {
        Ok(body) => ([(CONTENT_TYPE, metrics::content_type())], body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(CONTENT_TYPE, "text/plain; charset=utf-8".to_string())],
            format!("scrape failed: {}\n", e),
        )
            .into_response(),
    }
}

/// Serve plaintext HTTP on an already bound listener until Ctrl-C.
pub async fn serve(listener: TcpListener, adapter: MetricsAdapter) -> anyhow::Result<()> {
    axum::serve(listener, router(adapter))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Load the PEM certificate and key pair for HTTPS.
pub async fn load_tls(paths: &TlsPaths) -> anyhow::Result<RustlsConfig> {
    // reqwest and the listener share the ring provider; a second install is a no-op.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let tls = RustlsConfig::from_pem_file(&paths.cert, &paths.key).await?;
    Ok(tls)
}

/// Serve HTTPS on `addr` until Ctrl-C.
pub async fn serve_tls(
    addr: SocketAddr,
    tls: RustlsConfig,
    adapter: MetricsAdapter,
) -> anyhow::Result<()> {
    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(None);
    });
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(router(adapter).into_make_service())
        .await?;
    Ok(())
}

/// Bind according to `cfg` and serve until shutdown.
pub async fn run(cfg: &ExporterConfig, adapter: MetricsAdapter) -> anyhow::Result<()> {
    let addr = SocketAddr::from((cfg.listen, cfg.port));
    match &cfg.tls {
        Some(paths) => {
            let tls = load_tls(paths).await?;
            info!("Exporter started at {}://{}:{}", cfg.scheme(), cfg.listen, cfg.port);
            serve_tls(addr, tls, adapter).await
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            info!("Exporter started at {}://{}:{}", cfg.scheme(), cfg.listen, cfg.port);
            serve(listener, adapter).await
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => {
            warn!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
