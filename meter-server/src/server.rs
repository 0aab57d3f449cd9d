use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware;
use meter_config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::grpc;
use crate::middlewares::{self, CatchPanicLayer};
use crate::service::{ServiceError, ServiceState};

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface {0} failed")]
    BindFailed(SocketAddr, #[source] io::Error),

    /// The HTTP server stopped with an error.
    #[error("HTTP server failed")]
    Http(#[source] io::Error),

    /// The gRPC server stopped with an error.
    #[error("gRPC server failed")]
    Grpc(#[from] tonic::transport::Error),

    /// The shared services could not be started.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Build the axum application with all routes and middleware.
pub fn make_app(state: ServiceState) -> Router {
    // Requests pass the layers from top to bottom, responses from bottom to top. The signature is
    // computed before the response is compressed.
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(middlewares::trace_http_layer())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::trusted_subnet,
        ))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            middlewares::sign_response,
        ));

    crate::endpoints::routes()
        .layer(middleware)
        .with_state(state)
}

async fn serve_http(
    listener: TcpListener,
    state: ServiceState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let app = make_app(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ServerError::Http)
}

async fn serve_grpc(
    addr: SocketAddr,
    state: ServiceState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let (metrics, health) = grpc::grpc_services(state);

    meter_log::info!("  listening on grpc://{addr}/");
    tonic::transport::Server::builder()
        .add_service(metrics)
        .add_service(health)
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await?;

    Ok(())
}

/// Runs the collector until `shutdown` is cancelled.
///
/// Opens the storage, serves HTTP and, if configured, gRPC concurrently and closes the storage
/// once both servers have stopped. Servers that do not drain within the configured shutdown
/// timeout are abandoned.
pub async fn serve(config: Arc<Config>, shutdown: CancellationToken) -> Result<(), ServerError> {
    let state = ServiceState::start(config.clone()).await?;

    let http_addr = config.http_addr();
    let listener = TcpListener::bind(http_addr)
        .await
        .map_err(|e| ServerError::BindFailed(http_addr, e))?;

    meter_log::info!("spawning collector");
    meter_log::info!("  listening on http://{http_addr}/");

    let http = serve_http(listener, state.clone(), shutdown.clone());
    let grpc = async {
        match config.grpc_addr() {
            Some(addr) => serve_grpc(addr, state.clone(), shutdown.clone()).await,
            None => Ok(()),
        }
    };

    let servers = async {
        let result = tokio::try_join!(http, grpc).map(drop);
        if result.is_err() {
            shutdown.cancel();
        }
        result
    };

    let deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(config.shutdown_timeout()).await;
    };

    let result = tokio::select! {
        result = servers => result,
        _ = deadline => {
            meter_log::warn!("graceful shutdown timed out, dropping open connections");
            Ok(())
        }
    };

    meter_log::info!("shutting down collector");
    state.close().await;
    result
}
