use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api::mailer::{LogMailer, ResendMailer, SharedMailer};
use api::rate_limit::SubscribeRateLimiter;
use api::AppState;
use axum::http::{self, HeaderName, HeaderValue, Method};
use axum::Router;
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::AppConfig;

const LIMITER_PRUNE_MIN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub fn build_state(config: &AppConfig, db: DatabaseConnection) -> AppState {
    let mailer: SharedMailer = match &config.mail.resend_api_key {
        Some(key) => Arc::new(ResendMailer::new(key.clone(), config.mail.from.clone())),
        None => {
            warn!("RESEND_API_KEY not set; outgoing email is only logged");
            Arc::new(LogMailer)
        }
    };
    let subscribe_limiter =
        SubscribeRateLimiter::new(config.subscribe_rate_limit, config.subscribe_rate_window);
    subscribe_limiter.spawn_pruning(config.subscribe_rate_window.max(LIMITER_PRUNE_MIN));
    if config.api.trust_proxy_headers {
        info!("rate limiting keys on X-Forwarded-For / X-Real-IP");
    }
    AppState {
        db: Arc::new(db),
        auth: Arc::new(config.auth.clone()),
        mailer,
        settings: Arc::new(config.api.clone()),
        subscribe_limiter,
    }
}

pub async fn serve(serve: ServeConfig, config: &AppConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state, &config.cors_allowed_origins);
    let listener = tokio::net::TcpListener::bind(serve.addr)
        .await
        .with_context(|| format!("failed to bind {}", serve.addr))?;

    info!(addr = %serve.addr, "crm server listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let header_name = HeaderName::from_static("x-request-id");
    api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(header_name.clone(), MakeRequestUuid))
            .layer(PropagateRequestIdLayer::new(header_name))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(cors_origins)),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_origins_are_skipped() {
        let _layer = cors_layer(&["http://localhost:4321".into(), "bad\norigin".into()]);
    }
}
