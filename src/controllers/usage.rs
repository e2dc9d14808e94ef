use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    domain::quota::{QuotaCheck, QuotaLedger, ServiceType},
    error::{AppError, AppResult},
    infrastructure::auth::AuthUser,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    pub service_type: Option<String>,
}

pub struct UsageController {
    quota: Arc<dyn QuotaLedger>,
}

impl UsageController {
    pub fn new(quota: Arc<dyn QuotaLedger>) -> Self {
        Self { quota }
    }

    /// GET /api/usage/check?serviceType= - Current quota state without consuming it
    pub async fn check(
        State(controller): State<Arc<UsageController>>,
        Extension(auth_user): Extension<AuthUser>,
        Query(query): Query<UsageQuery>,
    ) -> AppResult<Json<QuotaCheck>> {
        let service = match query.service_type.as_deref() {
            Some(raw) => raw.parse::<ServiceType>().map_err(AppError::BadRequest)?,
            None => ServiceType::ImageGenerate,
        };

        let check = controller.quota.check(auth_user.user_id, service).await?;

        Ok(Json(check))
    }
}
