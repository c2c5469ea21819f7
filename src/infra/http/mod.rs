//! HTTP dispatch: the route map lookup, SPA fallback, and per-request
//! logging.

pub(crate) mod content;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request, StatusCode, header::USER_AGENT},
    response::Response,
};
use tracing::{error, info};

use crate::routes::RouteMap;

const FALLBACK_TARGET: &str = "/index.html";

#[derive(Clone)]
pub struct AppState {
    routes: Arc<RouteMap>,
}

/// Build the server router: one fallback handler owns every path and
/// method.
pub fn build_router(routes: Arc<RouteMap>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(AppState { routes })
}

/// Resolve the request path against the route map, falling back to the
/// application entry document, and reject non-idempotent methods.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, _body) = request.into_parts();

    let method = parts.method.clone();
    let url = parts.uri.clone();
    let remote = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let user_agent = parts
        .headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let path = parts.uri.path();
    let mut route = state.routes.get(path);
    if route.is_none() {
        info!(target: "angolo::http", path, "falling back to '/index.html'");
        route = state.routes.get(FALLBACK_TARGET);
    }

    let response = match route {
        Some(route) if method == Method::GET => {
            let route = route.clone();
            match tokio::task::spawn_blocking(move || route.serve(&parts)).await {
                Ok(response) => response,
                Err(err) => {
                    error!(target: "angolo::http", error = %err, "route worker failed");
                    content::plain_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error\n",
                    )
                }
            }
        }
        _ => content::plain_error(StatusCode::NOT_FOUND, "not found\n"),
    };

    info!(
        target: "angolo::http",
        method = %method,
        url = %url,
        remote = %remote,
        user_agent = %user_agent,
        status = response.status().as_u16(),
        "request"
    );
    response
}
