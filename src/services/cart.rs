use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{cart_line, CartLine, CartLineModel, CatalogItemKind},
    errors::ServiceError,
};

use super::{
    inventory::{self, StockLine},
    totals::{calculate_totals, OrderTotals, ShippingPolicy},
};

pub const MIN_LINE_QUANTITY: i32 = 1;
pub const MAX_LINE_QUANTITY: i32 = 10;

/// A cart line frozen at a point in time with its resolved price.
///
/// This is what a pending payment stores, what totals are computed from and
/// what order items are copied from, so the price a customer agreed to
/// cannot drift before the order is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshotItem {
    pub catalog_item_id: Uuid,
    pub item_kind: CatalogItemKind,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
    pub image: Option<String>,
    pub size: Option<String>,
    pub selected_color: Option<String>,
}

pub fn stock_lines(items: &[CartSnapshotItem]) -> Vec<StockLine> {
    items.iter().map(StockLine::from).collect()
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemRequest {
    pub catalog_item_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub size: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub selected_color: Option<String>,
    #[validate(range(min = 1, max = 10))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, max = 10))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartViewLine {
    pub line_id: Uuid,
    #[serde(flatten)]
    pub item: CartSnapshotItem,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub items: Vec<CartViewLine>,
    /// Totals over the available lines only.
    pub totals: OrderTotals,
}

/// Re-prices every line of the user's cart against the live catalog.
///
/// Fails with `ITEM_GONE` if any line no longer resolves.
pub async fn snapshot_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Vec<CartSnapshotItem>, ServiceError> {
    let lines = load_lines(conn, user_id).await?;
    let mut snapshot = Vec::with_capacity(lines.len());
    for line in lines {
        snapshot.push(snapshot_line(conn, &line).await?);
    }
    Ok(snapshot)
}

async fn snapshot_line<C: ConnectionTrait>(
    conn: &C,
    line: &CartLineModel,
) -> Result<CartSnapshotItem, ServiceError> {
    let resolved = inventory::resolve_item(conn, line.catalog_item_id, line.size.as_deref()).await?;
    Ok(CartSnapshotItem {
        catalog_item_id: line.catalog_item_id,
        item_kind: resolved.item.kind,
        name: resolved.item.name.clone(),
        price: resolved.unit_price(),
        quantity: line.quantity,
        image: resolved.item.image_url.clone(),
        size: resolved.variant.as_ref().map(|v| v.size.clone()),
        selected_color: line.selected_color.clone(),
    })
}

async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Vec<CartLineModel>, ServiceError> {
    Ok(CartLine::find()
        .filter(cart_line::Column::UserId.eq(user_id))
        .order_by_asc(cart_line::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub async fn clear_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<u64, ServiceError> {
    let result = CartLine::delete_many()
        .filter(cart_line::Column::UserId.eq(user_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Live cart operations for a signed-in customer.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    shipping: ShippingPolicy,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, shipping: ShippingPolicy) -> Self {
        Self { db, shipping }
    }

    #[instrument(skip(self))]
    pub async fn view(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let lines = load_lines(&*self.db, user_id).await?;
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            match snapshot_line(&*self.db, line).await {
                Ok(item) => items.push(CartViewLine {
                    line_id: line.id,
                    item,
                    available: true,
                }),
                Err(ServiceError::ItemGone { .. }) => items.push(CartViewLine {
                    line_id: line.id,
                    item: CartSnapshotItem {
                        catalog_item_id: line.catalog_item_id,
                        item_kind: line.item_kind,
                        name: String::new(),
                        price: 0,
                        quantity: line.quantity,
                        image: None,
                        size: line.size.clone(),
                        selected_color: line.selected_color.clone(),
                    },
                    available: false,
                }),
                Err(err) => return Err(err),
            }
        }

        let priced: Vec<CartSnapshotItem> = items
            .iter()
            .filter(|line| line.available)
            .map(|line| line.item.clone())
            .collect();
        let totals = calculate_totals(&priced, &self.shipping);
        Ok(CartView { items, totals })
    }

    /// Adds a line or overwrites the quantity of the matching
    /// (item, size, color) line. Concurrent adds are last-write-wins.
    #[instrument(skip(self, request), fields(item_id = %request.catalog_item_id))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        request: AddCartItemRequest,
    ) -> Result<CartLineModel, ServiceError> {
        request.validate()?;
        let resolved = inventory::resolve_item(
            &*self.db,
            request.catalog_item_id,
            request.size.as_deref(),
        )
        .await?;
        if resolved.has_variants && resolved.variant.is_none() {
            return Err(ServiceError::ValidationError(format!(
                "{} requires a size",
                resolved.item.name
            )));
        }
        // Sizes are meaningless for items without variants.
        let size = resolved.variant.as_ref().map(|v| v.size.clone());

        let mut query = CartLine::find()
            .filter(cart_line::Column::UserId.eq(user_id))
            .filter(cart_line::Column::CatalogItemId.eq(request.catalog_item_id));
        query = match &size {
            Some(size) => query.filter(cart_line::Column::Size.eq(size.as_str())),
            None => query.filter(cart_line::Column::Size.is_null()),
        };
        query = match &request.selected_color {
            Some(color) => query.filter(cart_line::Column::SelectedColor.eq(color.as_str())),
            None => query.filter(cart_line::Column::SelectedColor.is_null()),
        };

        let now = Utc::now();
        let line = match query.one(&*self.db).await? {
            Some(existing) => {
                let mut active: cart_line::ActiveModel = existing.into();
                active.quantity = Set(request.quantity);
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                cart_line::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    catalog_item_id: Set(request.catalog_item_id),
                    item_kind: Set(resolved.item.kind),
                    size: Set(size),
                    selected_color: Set(request.selected_color),
                    quantity: Set(request.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?
            }
        };

        info!(line_id = %line.id, quantity = line.quantity, "cart line saved");
        Ok(line)
    }

    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<CartLineModel, ServiceError> {
        if !(MIN_LINE_QUANTITY..=MAX_LINE_QUANTITY).contains(&quantity) {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be between {MIN_LINE_QUANTITY} and {MAX_LINE_QUANTITY}"
            )));
        }
        let line = self.owned_line(user_id, line_id).await?;
        let mut active: cart_line::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, line_id: Uuid) -> Result<(), ServiceError> {
        let line = self.owned_line(user_id, line_id).await?;
        CartLine::delete_by_id(line.id).exec(&*self.db).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        clear_cart(&*self.db, user_id).await
    }

    async fn owned_line(&self, user_id: Uuid, line_id: Uuid) -> Result<CartLineModel, ServiceError> {
        CartLine::find_by_id(line_id)
            .one(&*self.db)
            .await?
            .filter(|line| line.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart line {} not found", line_id)))
    }
}
