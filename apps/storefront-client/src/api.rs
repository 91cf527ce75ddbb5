//! Typed helpers over [`AuthGateway::request`] for JSON endpoints.

use foodhub_common::ApiErrorBody;
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;

use crate::auth::{AuthGateway, RequestOptions};
use crate::error::GatewayError;

/// Turn a non-2xx response into [`GatewayError::ServerRejected`].
pub async fn ensure_success(resp: Response) -> Result<Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match ApiErrorBody::parse(&body) {
        Some(envelope) => envelope.error.message,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        None => body,
    };
    Err(GatewayError::ServerRejected { status, message })
}

/// Decode a successful response body as JSON.
pub async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, GatewayError> {
    let bytes = ensure_success(resp).await?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub async fn get_json<T: DeserializeOwned>(
    gateway: &AuthGateway,
    path: &str,
) -> Result<T, GatewayError> {
    let resp = gateway
        .request(Method::GET, path, RequestOptions::new())
        .await?;
    decode(resp).await
}

pub async fn send_json<T: DeserializeOwned>(
    gateway: &AuthGateway,
    method: Method,
    path: &str,
    body: serde_json::Value,
) -> Result<T, GatewayError> {
    let resp = gateway
        .request(method, path, RequestOptions::new().json(body))
        .await?;
    decode(resp).await
}
