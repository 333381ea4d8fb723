use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    db,
    entities::{
        order, order_item, payment, CatalogItemKind, Order, OrderItem, OrderItemModel,
        OrderModel, OrderStatus, Payment, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    notifications::{self, Notifier, OrderEvent},
};

use super::{
    cart::{self, CartSnapshotItem},
    coupons, inventory,
    serviceability,
    totals::{calculate_totals, OrderTotals, ShippingPolicy},
};

/// Attempts before giving up on generating an unused order number.
pub const MAX_ORDER_NUMBER_ATTEMPTS: usize = 3;

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[6-9][0-9]{9}$").expect("phone pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingDetails {
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    #[validate(regex(path = "PHONE_RE", message = "must be a 10 digit mobile number"))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 3, max = 200))]
    pub address_line1: String,
    #[validate(length(max = 200))]
    pub address_line2: Option<String>,
    #[validate(length(min = 2, max = 100))]
    pub city: String,
    #[validate(length(min = 2, max = 100))]
    pub state: String,
    #[validate(custom = "validate_pincode")]
    pub pincode: String,
}

fn validate_pincode(pincode: &str) -> Result<(), ValidationError> {
    if serviceability::is_valid_pincode(pincode) {
        return Ok(());
    }
    let mut err = ValidationError::new("pincode");
    err.message = Some("must be a 6 digit pincode".into());
    Err(err)
}

impl From<&OrderModel> for ShippingDetails {
    fn from(order: &OrderModel) -> Self {
        Self {
            name: order.shipping_name.clone(),
            phone: order.shipping_phone.clone(),
            email: order.shipping_email.clone(),
            address_line1: order.shipping_address_line1.clone(),
            address_line2: order.shipping_address_line2.clone(),
            city: order.shipping_city.clone(),
            state: order.shipping_state.clone(),
            pincode: order.shipping_pincode.clone(),
        }
    }
}

/// Human-shareable order number, e.g. `ORD-20261019-7KQ2M9XA`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Source of order numbers for a service. Defaults to [`generate_order_number`].
pub type OrderNumberFn = Arc<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

pub fn default_order_numbers() -> OrderNumberFn {
    Arc::new(generate_order_number)
}

/// Everything the assembler needs to persist one order.
pub struct NewOrder<'a> {
    pub order_number: String,
    pub user_id: Uuid,
    pub shipping: &'a ShippingDetails,
    pub items: &'a [CartSnapshotItem],
    pub totals: OrderTotals,
    pub payment_method: PaymentMethod,
    pub order_status: OrderStatus,
    pub coupon_code: Option<String>,
}

/// Inserts the order row and one frozen item row per snapshot line.
pub async fn assemble_order<C: ConnectionTrait>(
    conn: &C,
    new_order: NewOrder<'_>,
) -> Result<OrderModel, ServiceError> {
    let now = Utc::now();
    let shipping = new_order.shipping;
    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_number: Set(new_order.order_number),
        user_id: Set(new_order.user_id),
        shipping_name: Set(shipping.name.clone()),
        shipping_phone: Set(shipping.phone.clone()),
        shipping_email: Set(shipping.email.clone()),
        shipping_address_line1: Set(shipping.address_line1.clone()),
        shipping_address_line2: Set(shipping.address_line2.clone()),
        shipping_city: Set(shipping.city.clone()),
        shipping_state: Set(shipping.state.clone()),
        shipping_pincode: Set(shipping.pincode.clone()),
        subtotal: Set(new_order.totals.subtotal),
        shipping_cost: Set(new_order.totals.shipping_cost),
        total_amount: Set(new_order.totals.total),
        payment_method: Set(new_order.payment_method),
        order_status: Set(new_order.order_status),
        coupon_code: Set(new_order.coupon_code),
        tracking_number: Set(None),
        courier_name: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    for item in new_order.items {
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            catalog_item_id: Set(item.catalog_item_id),
            item_kind: Set(item.item_kind),
            name: Set(item.name.clone()),
            price: Set(item.price),
            quantity: Set(item.quantity),
            image: Set(item.image.clone()),
            size: Set(item.size.clone()),
            selected_color: Set(item.selected_color.clone()),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
    }

    Ok(order)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub catalog_item_id: Uuid,
    pub item_kind: CatalogItemKind,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
    pub image: Option<String>,
    pub size: Option<String>,
    pub selected_color: Option<String>,
}

impl From<OrderItemModel> for OrderItemResponse {
    fn from(item: OrderItemModel) -> Self {
        Self {
            catalog_item_id: item.catalog_item_id,
            item_kind: item.item_kind,
            name: item.name,
            price: item.price,
            quantity: item.quantity,
            image: item.image,
            size: item.size,
            selected_color: item.selected_color,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_number: String,
    pub order_status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub total_amount: i64,
    pub coupon_code: Option<String>,
    pub tracking_number: Option<String>,
    pub courier_name: Option<String>,
    pub shipping: ShippingDetails,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn new(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            shipping: ShippingDetails::from(&order),
            order_number: order.order_number,
            order_status: order.order_status,
            payment_method: order.payment_method,
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            total_amount: order.total_amount,
            coupon_code: order.coupon_code,
            tracking_number: order.tracking_number,
            courier_name: order.courier_name,
            items: items.into_iter().map(OrderItemResponse::from).collect(),
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectOrderRequest {
    #[validate]
    pub shipping: ShippingDetails,
    #[validate(length(min = 1, max = 32))]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    #[validate(length(min = 1, max = 64))]
    pub tracking_number: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub courier_name: Option<String>,
}

/// Order placement, queries and the cancellation path.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn Notifier>,
    shipping: ShippingPolicy,
    order_numbers: OrderNumberFn,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        notifier: Arc<dyn Notifier>,
        shipping: ShippingPolicy,
    ) -> Self {
        Self {
            db,
            notifier,
            shipping,
            order_numbers: default_order_numbers(),
        }
    }

    pub fn with_order_numbers(mut self, order_numbers: OrderNumberFn) -> Self {
        self.order_numbers = order_numbers;
        self
    }

    /// Places a cash-on-delivery order straight from the live cart.
    #[instrument(skip(self, request))]
    pub async fn place_direct_order(
        &self,
        user_id: Uuid,
        request: DirectOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let shipping = &request.shipping;
        serviceability::ensure_serviceable(&*self.db, &shipping.pincode).await?;

        let snapshot = cart::snapshot_cart(&*self.db, user_id).await?;
        if snapshot.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let totals = calculate_totals(&snapshot, &self.shipping);
        let lines = cart::stock_lines(&snapshot);
        inventory::validate_stock(&*self.db, &lines).await?;

        let coupon_code = request.coupon_code.as_deref().map(coupons::normalize_code);

        let mut attempt = 0;
        let (order, items) = loop {
            attempt += 1;
            let order_number = (self.order_numbers)(Utc::now());
            let txn = db::begin_write(&self.db).await?;
            let result = async {
                inventory::validate_stock(&txn, &lines).await?;
                if let Some(code) = &coupon_code {
                    coupons::redeem_coupon(&txn, code).await?;
                }
                let order = assemble_order(
                    &txn,
                    NewOrder {
                        order_number,
                        user_id,
                        shipping,
                        items: &snapshot,
                        totals,
                        payment_method: PaymentMethod::Cod,
                        order_status: OrderStatus::Pending,
                        coupon_code: coupon_code.clone(),
                    },
                )
                .await?;
                inventory::decrement_stock(&txn, &lines).await?;
                cart::clear_cart(&txn, user_id).await?;
                let items = load_items(&txn, order.id).await?;
                Ok::<_, ServiceError>((order, items))
            }
            .await;

            match result {
                Ok(created) => {
                    txn.commit().await?;
                    break created;
                }
                Err(err) => {
                    txn.rollback().await?;
                    if err.is_unique_violation() && attempt < MAX_ORDER_NUMBER_ATTEMPTS {
                        warn!(attempt, "order number collision, retrying");
                        continue;
                    }
                    return Err(err);
                }
            }
        };

        counter!("nursery_orders.placed", 1, "method" => "cod");
        info!(order_number = %order.order_number, total = order.total_amount, "direct order placed");
        notifications::dispatch(
            self.notifier.clone(),
            OrderEvent::OrderPlaced {
                order_number: order.order_number.clone(),
                user_id,
                total_amount: order.total_amount,
                email: order.shipping_email.clone(),
            },
        );

        Ok(OrderResponse::new(order, items))
    }

    /// Fetches an order the caller owns. Other users' orders are reported as missing.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_number: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.owned_order(user_id, order_number).await?;
        let items = load_items(&*self.db, order.id).await?;
        Ok(OrderResponse::new(order, items))
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<OrderResponse>, ServiceError> {
        let rows = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .find_with_related(OrderItem)
            .all(&*self.db)
            .await?;

        // The join may regroup rows, so order again after consolidation.
        let mut orders: Vec<OrderResponse> = rows
            .into_iter()
            .map(|(order, items)| OrderResponse::new(order, items))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    /// Customers may cancel their own order until it starts being packed.
    #[instrument(skip(self))]
    pub async fn cancel_own_order(
        &self,
        user_id: Uuid,
        order_number: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.owned_order(user_id, order_number).await?;
        match order.order_status {
            OrderStatus::Pending | OrderStatus::Paid => {}
            status if status.is_terminal() => {
                return Err(ServiceError::AlreadyTerminal {
                    order_number: order.order_number,
                    status,
                });
            }
            status => {
                return Err(ServiceError::ValidationError(format!(
                    "order {} is already {} and can no longer be cancelled",
                    order.order_number, status
                )));
            }
        }

        self.update_order_status(
            order_number,
            UpdateOrderStatusRequest {
                status: OrderStatus::Cancelled,
                tracking_number: None,
                courier_name: None,
            },
        )
        .await
    }

    /// Admin status change. Moving into CANCELLED or REFUNDED restores stock
    /// and coupon usage exactly once; nothing moves out of those states.
    #[instrument(skip(self, request), fields(status = %request.status))]
    pub async fn update_order_status(
        &self,
        order_number: &str,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let order = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;

        if order.order_status.is_terminal() {
            return Err(ServiceError::AlreadyTerminal {
                order_number: order.order_number,
                status: order.order_status,
            });
        }

        let txn = db::begin_write(&self.db).await?;
        let result = apply_status_change(&txn, &order, &request).await;
        let items = match result {
            Ok(items) => {
                txn.commit().await?;
                items
            }
            Err(err) => {
                txn.rollback().await?;
                return Err(err);
            }
        };

        let updated = Order::find_by_id(order.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;

        if request.status.is_terminal() {
            counter!("nursery_orders.cancelled", 1, "status" => request.status.to_string());
            info!(order_number, status = %request.status, "order closed and stock restored");
            notifications::dispatch(
                self.notifier.clone(),
                OrderEvent::OrderCancelled {
                    order_number: updated.order_number.clone(),
                    user_id: updated.user_id,
                    status: updated.order_status,
                    email: updated.shipping_email.clone(),
                },
            );
        } else {
            info!(order_number, status = %request.status, "order status updated");
        }

        Ok(OrderResponse::new(updated, items))
    }

    async fn owned_order(
        &self,
        user_id: Uuid,
        order_number: &str,
    ) -> Result<OrderModel, ServiceError> {
        Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }
}

async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    Ok(OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

/// Writes the new status inside the caller's transaction. The update only
/// matches while the order is still non-terminal, so two concurrent
/// cancellations cannot both restore stock.
async fn apply_status_change<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    request: &UpdateOrderStatusRequest,
) -> Result<Vec<OrderItemModel>, ServiceError> {
    let mut update = Order::update_many()
        .col_expr(order::Column::OrderStatus, Expr::value(request.status))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
    if let Some(tracking) = &request.tracking_number {
        update = update.col_expr(order::Column::TrackingNumber, Expr::value(tracking.clone()));
    }
    if let Some(courier) = &request.courier_name {
        update = update.col_expr(order::Column::CourierName, Expr::value(courier.clone()));
    }

    let result = update
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::OrderStatus.is_not_in(OrderStatus::terminal_statuses()))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        let current = Order::find_by_id(order.id)
            .one(conn)
            .await?
            .map_or(order.order_status, |o| o.order_status);
        return Err(ServiceError::AlreadyTerminal {
            order_number: order.order_number.clone(),
            status: current,
        });
    }

    let items = load_items(conn, order.id).await?;
    if request.status.is_terminal() {
        let lines: Vec<_> = items.iter().map(inventory::StockLine::from).collect();
        inventory::restore_stock(conn, &lines).await?;

        if let Some(code) = &order.coupon_code {
            coupons::release_coupon(conn, code).await?;
        }

        if request.status == OrderStatus::Refunded {
            Payment::update_many()
                .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Refunded))
                .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(payment::Column::OrderId.eq(order.id))
                .exec(conn)
                .await?;
        }
    }

    Ok(items)
}
