use axum::{extract::FromRequestParts, http::request::Parts};
use compliscan_core::types::TenantId;

use crate::infra::errors::AppError;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant the request acts for, taken from the `x-tenant-id` header that the
/// fronting auth layer sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenant(pub TenantId);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .ok_or_else(|| AppError::unauthorized("Missing tenant"))?;

        raw.to_str()
            .ok()
            .and_then(|value| value.trim().parse::<TenantId>().ok())
            .map(Tenant)
            .ok_or_else(|| AppError::unauthorized("Invalid tenant"))
    }
}
