//! HTTP boundary: a catch-all GET route served from the cacher.
//!
//! Every GET path is handed to [`Cacher::get`]; a 200 streams the cached
//! file as the response body, any other status is answered with an empty
//! body. Non-GET methods receive 405.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio_util::io::ReaderStream;
use tracing::error;

use crate::cacher::Cacher;

/// Build the axum [`Router`] with the single catch-all route.
pub fn create_router(cacher: Cacher) -> Router {
    Router::new().fallback(handle_request).with_state(cacher)
}

async fn handle_request(State(cacher): State<Cacher>, method: Method, uri: Uri) -> Response {
    // Only GET (and HEAD, for which hyper strips the body) reaches the core.
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path = uri.path().trim_start_matches('/');
    if path.is_empty() || path.split('/').any(|seg| seg == "..") {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match cacher.get(path).await {
        Ok((200, Some(file))) => {
            let stream = ReaderStream::new(tokio::fs::File::from_std(file));
            Body::from_stream(stream).into_response()
        }
        Ok((status, _)) => StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Err(e) => {
            error!(%path, error = %e, "failed to serve request");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
