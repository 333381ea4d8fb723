use chrono::Utc;
use sea_orm::{
    sea_query::{Condition, Expr},
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use tracing::{debug, warn};

use crate::{
    entities::{coupon, Coupon, CouponModel},
    errors::ServiceError,
};

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Consumes one use of an active coupon. The usage limit is enforced in the
/// update itself so concurrent redemptions cannot overshoot it.
pub async fn redeem_coupon<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<CouponModel, ServiceError> {
    let code = normalize_code(code);
    let coupon = Coupon::find()
        .filter(coupon::Column::Code.eq(code.as_str()))
        .one(conn)
        .await?
        .filter(|c| c.is_active && c.has_capacity())
        .ok_or_else(|| ServiceError::CouponInvalid(code.clone()))?;

    let result = Coupon::update_many()
        .col_expr(
            coupon::Column::UsedCount,
            Expr::col(coupon::Column::UsedCount).add(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(coupon::Column::Id.eq(coupon.id))
        .filter(
            Condition::any()
                .add(coupon::Column::UsageLimit.is_null())
                .add(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::UsageLimit))),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::CouponInvalid(code));
    }

    debug!(code = %coupon.code, "coupon redeemed");
    Ok(coupon)
}

/// Gives back one use of a coupon. The counter never drops below zero.
pub async fn release_coupon<C: ConnectionTrait>(conn: &C, code: &str) -> Result<(), ServiceError> {
    let code = normalize_code(code);
    let result = Coupon::update_many()
        .col_expr(
            coupon::Column::UsedCount,
            Expr::col(coupon::Column::UsedCount).sub(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(coupon::Column::Code.eq(code.as_str()))
        .filter(coupon::Column::UsedCount.gt(0))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(code = %code, "coupon usage not decremented: unknown code or already zero");
    }
    Ok(())
}
