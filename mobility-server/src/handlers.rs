//! HTTP request handlers

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use mobility_common::{
    protocol::{
        AllocateIpRequest, ApiResponse, GwInfo, IpAddressMsg, IpBlockMsg, ListAddedIpBlocksResponse,
        ListAllocatedIpsResponse, ReleaseIpRequest, RemoveIpBlockRequest, RemoveIpBlockResponse,
        SubscriberIpTable,
    },
    ErrorKind, MobilityError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppState;

/// Allocator error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(MobilityError);

impl From<MobilityError> for ApiError {
    fn from(err: MobilityError) -> Self {
        Self(err)
    }
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::OverlappingBlock | ErrorKind::BlockInUse | ErrorKind::DuplicateAllocation => {
            StatusCode::CONFLICT
        }
        ErrorKind::BlockNotFound | ErrorKind::NotAllocated => StatusCode::NOT_FOUND,
        ErrorKind::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InvalidAddressFormat | ErrorKind::UnsupportedAddressFamily => StatusCode::BAD_REQUEST,
        ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            warn!(kind = self.0.kind().as_str(), "Request failed: {}", self.0);
        }
        (status, Json(ApiResponse::<()>::error(&self.0))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(MobilityError::InvalidAddressFormat(rejection.body_text()))
    }
}

/// JSON body extractor that reports malformed bodies as `ApiResponse` errors
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// AddIPBlock
pub async fn add_ip_block(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<IpBlockMsg>,
) -> ApiResult<()> {
    state.service.add_ip_block(&request).await?;
    Ok(Json(ApiResponse::success(())))
}

/// RemoveIPBlock
pub async fn remove_ip_block(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RemoveIpBlockRequest>,
) -> ApiResult<RemoveIpBlockResponse> {
    let response = state.service.remove_ip_blocks(&request).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// ListAddedIPv4Blocks
pub async fn list_added_ipv4_blocks(State(state): State<AppState>) -> Json<ApiResponse<ListAddedIpBlocksResponse>> {
    Json(ApiResponse::success(state.service.list_added_ipv4_blocks().await))
}

/// AllocateIPAddress
pub async fn allocate_ip_address(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<AllocateIpRequest>,
) -> ApiResult<IpAddressMsg> {
    let ip = state.service.allocate_ip_address(&request).await?;
    Ok(Json(ApiResponse::success(ip)))
}

/// ReleaseIPAddress
pub async fn release_ip_address(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ReleaseIpRequest>,
) -> ApiResult<()> {
    state.service.release_ip_address(&request).await?;
    Ok(Json(ApiResponse::success(())))
}

/// ListAllocatedIPs
pub async fn list_allocated_ips(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<IpBlockMsg>,
) -> ApiResult<ListAllocatedIpsResponse> {
    let response = state.service.list_allocated_ips(&request).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// GetSubscriberIPTable
pub async fn subscriber_ip_table(State(state): State<AppState>) -> Json<ApiResponse<SubscriberIpTable>> {
    Json(ApiResponse::success(state.service.subscriber_ip_table().await))
}

/// GetGatewayInfo
pub async fn get_gateway_info(State(state): State<AppState>) -> Json<ApiResponse<Option<GwInfo>>> {
    Json(ApiResponse::success(state.service.gateway_info().await))
}

/// SetGatewayInfo
pub async fn set_gateway_info(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<GwInfo>,
) -> ApiResult<()> {
    state.service.set_gateway_info(&request).await?;
    Ok(Json(ApiResponse::success(())))
}

/// Daemon health summary
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub ip_blocks: usize,
    pub allocated: usize,
    pub cooling_down: usize,
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let usage = state.service.block_usage().await;

    Json(ApiResponse::success(HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        ip_blocks: usage.len(),
        allocated: usage.iter().map(|u| u.allocated).sum(),
        cooling_down: usage.iter().map(|u| u.cooling_down).sum(),
    }))
}

/// Metrics handler (Prometheus format)
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled\n").into_response(),
    }
}
