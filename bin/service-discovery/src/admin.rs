//! Administrative HTTP surface for the discovery backend

use anyhow::Context;
use discovery_core::{DirectoryBackend, DiscoveryError};
use http_body_util::Full;
use hyper::{
    body::Bytes,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

#[derive(Debug, PartialEq)]
enum AdminRoute {
    Health,
    Metrics,
    Routes,
    Deregister(String),
    DeregisterAll,
    NotFound,
}

fn route(method: &Method, path: &str) -> AdminRoute {
    match (method, path) {
        (&Method::GET, "/healthz") => AdminRoute::Health,
        (&Method::GET, "/metrics") => AdminRoute::Metrics,
        (&Method::GET, "/routes") => AdminRoute::Routes,
        (&Method::POST, "/deregister-all") => AdminRoute::DeregisterAll,
        (&Method::POST, _) => match path.strip_prefix("/deregister/") {
            Some(service) => match service.split_once('/') {
                Some((namespace, name))
                    if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
                {
                    AdminRoute::Deregister(service.to_string())
                }
                _ => AdminRoute::NotFound,
            },
            None => AdminRoute::NotFound,
        },
        _ => AdminRoute::NotFound,
    }
}

fn error_status(error: &DiscoveryError) -> StatusCode {
    match error {
        DiscoveryError::UnknownService(_) => StatusCode::NOT_FOUND,
        DiscoveryError::ShuttingDown | DiscoveryError::NotRunning => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DiscoveryError::DeregistrationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Bind the admin listener. Failing here is fatal to the daemon.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind admin server to {}", addr))?;
    info!("Admin server listening on {}", addr);
    Ok(listener)
}

/// Accept admin connections until the task is aborted
pub async fn serve(listener: TcpListener, backend: Arc<DirectoryBackend>) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Error accepting admin connection: {}", e);
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let backend = backend.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, backend.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving admin connection from {}: {}", peer_addr, e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    backend: Arc<DirectoryBackend>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    debug!("{} {}", req.method(), req.uri().path());

    let response = match route(req.method(), req.uri().path()) {
        AdminRoute::Health => respond(StatusCode::OK, "OK\n"),
        AdminRoute::Metrics => match backend.metrics().gather() {
            Ok(text) => {
                let mut response = respond(StatusCode::OK, text);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}\n", e),
            ),
        },
        AdminRoute::Routes => match serde_json::to_vec(&backend.registered().await) {
            Ok(body) => {
                let mut response = respond(StatusCode::OK, body);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)),
        },
        AdminRoute::Deregister(service) => match backend.deregister(&service).await {
            Ok(()) => respond(StatusCode::OK, format!("Deregistered {}\n", service)),
            Err(e) => respond(error_status(&e), format!("{}\n", e)),
        },
        AdminRoute::DeregisterAll => match backend.deregister_all().await {
            Ok(()) => respond(StatusCode::OK, "Deregistered all routes\n"),
            Err(e) => respond(error_status(&e), format!("{}\n", e)),
        },
        AdminRoute::NotFound => respond(StatusCode::NOT_FOUND, "Not Found\n"),
    };

    Ok(response)
}
