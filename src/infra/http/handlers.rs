use axum::{
    Json,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::context::RequestContext;
use crate::domain::entities::{Shop, ShopType, ShopUpdate};

use super::{HttpState, db_health_response, error::ApiError, middleware::RequestId};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Serialize)]
pub struct SeckillResponse {
    pub order_id: i64,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized(Some(format!("send the `{USER_ID_HEADER}` header"))))?;
        let user_id = raw
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                ApiError::bad_request(
                    "Invalid caller identity",
                    Some(format!("`{USER_ID_HEADER}` must be a positive integer")),
                )
            })?;
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();

        Ok(RequestContext::new(request_id, user_id))
    }
}

pub async fn get_shop(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
) -> Result<Json<Shop>, ApiError> {
    let shop = state.shops.lookup(id).await?;
    Ok(Json(shop))
}

pub async fn update_shop(
    State(state): State<HttpState>,
    Json(update): Json<ShopUpdate>,
) -> Result<StatusCode, ApiError> {
    state.shops.update(update).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_shop_types(
    State(state): State<HttpState>,
) -> Result<Json<Vec<ShopType>>, ApiError> {
    let types = state.shop_types.list().await?;
    Ok(Json(types))
}

pub async fn seckill_voucher(
    State(state): State<HttpState>,
    ctx: RequestContext,
    Path(voucher_id): Path<i64>,
) -> Result<Json<SeckillResponse>, ApiError> {
    let order_id = state.seckill.seckill(&ctx, voucher_id).await?;
    Ok(Json(SeckillResponse { order_id }))
}

pub async fn health(State(state): State<HttpState>) -> Response {
    match state.db.as_ref() {
        Some(db) => db_health_response(db.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
