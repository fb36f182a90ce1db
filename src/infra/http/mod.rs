//! HTTP surface over the shop, shop-type and seckill services.

mod error;
mod handlers;
mod middleware;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use handlers::{SeckillResponse, USER_ID_HEADER};
pub use middleware::{REQUEST_ID_HEADER, RequestId};

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use sqlx::Error as SqlxError;

use crate::application::{
    error::ErrorReport, seckill::SeckillService, shop_types::ShopTypeService, shops::ShopService,
};
use crate::infra::db::PostgresRepositories;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub shops: Arc<ShopService>,
    pub shop_types: Arc<ShopTypeService>,
    pub seckill: Arc<SeckillService>,
    /// Absent when the repositories are not Postgres-backed.
    pub db: Option<PostgresRepositories>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/shop/{id}", get(handlers::get_shop))
        .route("/shop", put(handlers::update_shop))
        .route("/shop-type/list", get(handlers::list_shop_types))
        .route(
            "/voucher-order/seckill/{id}",
            post(handlers::seckill_voucher),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
