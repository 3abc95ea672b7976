use axum::{extract::Extension, http::StatusCode, routing::post, Router};
use bytes::Bytes;
use std::sync::Arc;

use super::handle::{BucketExpiringWriter, BucketReader, BucketWriter};
use super::protocol::{
    BucketRequest, BucketResponse, ErrorCode, ENDPOINT_DELETE, ENDPOINT_GET, ENDPOINT_PUT,
    ENDPOINT_PUT_EXPIRE,
};
use super::selector::LocalSelector;

/// Bucket RPC routes, served from the local selector only.
pub fn router(selector: Arc<LocalSelector>) -> Router {
    Router::new()
        .route(ENDPOINT_GET, post(handle_get))
        .route(ENDPOINT_PUT, post(handle_put))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_PUT_EXPIRE, post(handle_put_expire))
        .layer(Extension(selector))
}

fn decode(body: &[u8]) -> Result<BucketRequest, (StatusCode, Vec<u8>)> {
    bincode::deserialize(body).map_err(|e| {
        tracing::error!("Failed to decode bucket request: {}", e);
        respond(
            StatusCode::BAD_REQUEST,
            BucketResponse {
                error: ErrorCode::Other(format!("malformed request: {}", e)),
                value: Vec::new(),
            },
        )
    })
}

fn respond(status: StatusCode, response: BucketResponse) -> (StatusCode, Vec<u8>) {
    match bincode::serialize(&response) {
        Ok(body) => (status, body),
        Err(e) => {
            tracing::error!("Failed to encode bucket response: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}

pub async fn handle_get(
    Extension(selector): Extension<Arc<LocalSelector>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req = match decode(&body) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    let result = selector.bucket_get(&req.bucket, &req.key).await;
    respond(StatusCode::OK, BucketResponse::from_value(result))
}

pub async fn handle_put(
    Extension(selector): Extension<Arc<LocalSelector>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req = match decode(&body) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    let result = selector.bucket_put(&req.bucket, &req.key, &req.value).await;
    if let Err(e) = &result {
        tracing::debug!("Remote put failed: {}", e);
    }
    respond(StatusCode::OK, BucketResponse::from_unit(result))
}

pub async fn handle_delete(
    Extension(selector): Extension<Arc<LocalSelector>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req = match decode(&body) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    let result = selector.bucket_delete(&req.bucket, &req.key).await;
    respond(StatusCode::OK, BucketResponse::from_unit(result))
}

pub async fn handle_put_expire(
    Extension(selector): Extension<Arc<LocalSelector>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req = match decode(&body) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    let result = selector
        .bucket_put_expire(&req.bucket, &req.key, &req.value, req.expires_at)
        .await;
    respond(StatusCode::OK, BucketResponse::from_unit(result))
}
