//! Organization context extractor.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use qarun_core::error::CoreError;
use qarun_core::types::DbId;

use crate::error::AppError;

/// Header carrying the caller's organization id.
pub const ORG_HEADER: &str = "x-org-id";

/// Organization the request acts for, taken from the `x-org-id` header.
///
/// Every run lookup is scoped to this organization; runs of other
/// organizations are reported as not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgContext {
    pub org_id: DbId,
}

impl<S: Send + Sync> FromRequestParts<S> for OrgContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORG_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Forbidden(format!("Missing {ORG_HEADER} header")))
            })?;

        let org_id = raw
            .trim()
            .parse::<DbId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                AppError::Core(CoreError::Forbidden(format!(
                    "Invalid {ORG_HEADER} header: '{raw}'"
                )))
            })?;

        Ok(OrgContext { org_id })
    }
}
