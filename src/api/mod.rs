//! Local HTTP API used by the POS views.
//!
//! Views call the collection endpoint on mount and on focus regain; the record
//! endpoints are the cache's local write path.

mod collections;

pub use collections::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::EntityType;

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Resolve the entity segment of a path.
fn entity_from_path(entity: &str) -> Result<EntityType, AppError> {
    EntityType::parse(entity)
        .ok_or_else(|| AppError::NotFound(format!("Unknown collection {}", entity)))
}
