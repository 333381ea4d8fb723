use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{ConnectionTrait, EntityTrait};

use crate::{entities::ServiceablePincode, entities::ServiceablePincodeModel, errors::ServiceError};

static PINCODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9][0-9]{5}$").expect("pincode pattern compiles"));

pub fn is_valid_pincode(pincode: &str) -> bool {
    PINCODE_RE.is_match(pincode)
}

/// Looks up an active allow-list entry for the pincode.
pub async fn find_serviceable<C: ConnectionTrait>(
    conn: &C,
    pincode: &str,
) -> Result<Option<ServiceablePincodeModel>, ServiceError> {
    if !is_valid_pincode(pincode) {
        return Ok(None);
    }
    Ok(ServiceablePincode::find_by_id(pincode.to_string())
        .one(conn)
        .await?
        .filter(|entry| entry.is_active))
}

pub async fn is_serviceable<C: ConnectionTrait>(
    conn: &C,
    pincode: &str,
) -> Result<bool, ServiceError> {
    Ok(find_serviceable(conn, pincode).await?.is_some())
}

/// Fails with `AREA_NOT_SERVICEABLE` unless the business delivers to `pincode`.
pub async fn ensure_serviceable<C: ConnectionTrait>(
    conn: &C,
    pincode: &str,
) -> Result<(), ServiceError> {
    if is_serviceable(conn, pincode).await? {
        Ok(())
    } else {
        Err(ServiceError::AreaNotServiceable(pincode.to_string()))
    }
}
