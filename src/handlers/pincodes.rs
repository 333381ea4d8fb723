use axum::{
    extract::{Path, State},
    response::Response,
};
use serde::Serialize;
use utoipa::ToSchema;

use super::common::success_response;
use crate::{errors::ServiceError, services::serviceability, ApiResponse, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct PincodeAvailability {
    pub pincode: String,
    pub serviceable: bool,
    pub city: Option<String>,
    pub state: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/pincodes/{pincode}",
    summary = "Check delivery availability",
    params(("pincode" = String, Path, description = "Six digit postal code")),
    responses(
        (status = 200, description = "Availability for the pincode", body = ApiResponse<PincodeAvailability>),
    ),
    tag = "Pincodes"
)]
pub async fn check_pincode(
    State(state): State<AppState>,
    Path(pincode): Path<String>,
) -> Result<Response, ServiceError> {
    let entry = serviceability::find_serviceable(&*state.db, &pincode).await?;
    Ok(success_response(PincodeAvailability {
        serviceable: entry.is_some(),
        city: entry.as_ref().and_then(|e| e.city.clone()),
        state: entry.and_then(|e| e.state),
        pincode,
    }))
}
