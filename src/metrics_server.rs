//! Text metrics endpoint.
//!
//! Serves the register's rendered surface on `GET /metrics` plus a trivial
//! health probe. Read-only; external collaborators scrape it.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{error, info};

use crate::metrics::metrics;

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4")
            .body(Body::from(metrics().render()))
            .unwrap_or_default(),
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("ok"))
            .unwrap_or_default(),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap_or_default(),
    };
    Ok(response)
}

/// Run the metrics endpoint until the shutdown signal flips.
pub async fn run_metrics_server(listen_addr: String, mut shutdown: watch::Receiver<bool>) {
    let addr: SocketAddr = match listen_addr.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(addr = listen_addr.as_str(), error = %e, "invalid metrics listen address");
            return;
        }
    };

    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });

    let server = Server::bind(&addr).serve(make_svc);
    info!(%addr, "metrics endpoint listening");

    let graceful = server.with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });

    if let Err(e) = graceful.await {
        error!(error = %e, "metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_route_serves_register_text() {
        metrics().record_cluster_autotrade("executed", "none");
        let req = Request::builder()
            .method(Method::GET)
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("trade_total"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
