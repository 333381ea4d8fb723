//! Stock resolution, validation and mutation.
//!
//! Every function here takes a `ConnectionTrait` so callers decide the
//! transaction boundary. Decrements are conditional updates (`stock >= qty`),
//! which makes the store itself refuse a negative result when two
//! transactions race for the last unit.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    entities::{
        catalog_item, size_variant, CatalogItem, CatalogItemModel, CatalogItemStatus,
        OrderItemModel, SizeVariant, SizeVariantModel,
    },
    errors::ServiceError,
};

use super::cart::CartSnapshotItem;

/// Quantity delta against one catalog item, optionally a specific size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLine {
    pub catalog_item_id: Uuid,
    pub name: String,
    pub size: Option<String>,
    pub quantity: i32,
}

impl From<&CartSnapshotItem> for StockLine {
    fn from(item: &CartSnapshotItem) -> Self {
        Self {
            catalog_item_id: item.catalog_item_id,
            name: item.name.clone(),
            size: item.size.clone(),
            quantity: item.quantity,
        }
    }
}

impl From<&OrderItemModel> for StockLine {
    fn from(item: &OrderItemModel) -> Self {
        Self {
            catalog_item_id: item.catalog_item_id,
            name: item.name.clone(),
            size: item.size.clone(),
            quantity: item.quantity,
        }
    }
}

/// A catalog item together with the size variant a line refers to, if any.
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item: CatalogItemModel,
    pub variant: Option<SizeVariantModel>,
    pub has_variants: bool,
}

impl ResolvedItem {
    pub fn available(&self) -> i32 {
        self.variant
            .as_ref()
            .map_or(self.item.stock, |variant| variant.stock)
    }

    pub fn unit_price(&self) -> i64 {
        self.variant
            .as_ref()
            .map_or(self.item.price, |variant| variant.price)
    }

    pub fn display_name(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{} ({})", self.item.name, variant.size),
            None => self.item.name.clone(),
        }
    }
}

/// Cached parent values derived from a set of size variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantAggregate {
    pub price: i64,
    pub stock: i32,
}

/// `price = min(variant.price)`, `stock = Σ variant.stock`; `None` without variants.
pub fn aggregate_variants(variants: &[SizeVariantModel]) -> Option<VariantAggregate> {
    let price = variants.iter().map(|v| v.price).min()?;
    let stock = variants.iter().map(|v| v.stock).sum();
    Some(VariantAggregate { price, stock })
}

/// Availability flips between ACTIVE and OUT_OF_STOCK only. Drafts and
/// archived items keep their status whatever the stock.
pub fn status_for_stock(current: CatalogItemStatus, stock: i32) -> CatalogItemStatus {
    match current {
        CatalogItemStatus::Active if stock <= 0 => CatalogItemStatus::OutOfStock,
        CatalogItemStatus::OutOfStock if stock > 0 => CatalogItemStatus::Active,
        other => other,
    }
}

/// Resolves a line reference against the live catalog.
///
/// Missing, draft and archived items, and sizes that no longer exist, all
/// resolve as `ITEM_GONE`.
pub async fn resolve_item<C: ConnectionTrait>(
    conn: &C,
    catalog_item_id: Uuid,
    size: Option<&str>,
) -> Result<ResolvedItem, ServiceError> {
    let item = CatalogItem::find_by_id(catalog_item_id)
        .one(conn)
        .await?
        .filter(CatalogItemModel::is_purchasable)
        .ok_or(ServiceError::ItemGone {
            item_id: catalog_item_id,
        })?;

    let variants = load_variants(conn, catalog_item_id).await?;
    let has_variants = !variants.is_empty();

    let variant = match size {
        Some(size) if has_variants => Some(
            variants
                .into_iter()
                .find(|variant| variant.size == size)
                .ok_or(ServiceError::ItemGone {
                    item_id: catalog_item_id,
                })?,
        ),
        _ => None,
    };

    Ok(ResolvedItem {
        item,
        variant,
        has_variants,
    })
}

async fn load_variants<C: ConnectionTrait>(
    conn: &C,
    catalog_item_id: Uuid,
) -> Result<Vec<SizeVariantModel>, ServiceError> {
    Ok(SizeVariant::find()
        .filter(size_variant::Column::CatalogItemId.eq(catalog_item_id))
        .order_by_asc(size_variant::Column::Size)
        .all(conn)
        .await?)
}

/// Fails with `ITEM_GONE` or `INSUFFICIENT_STOCK` unless every line can be
/// served from current stock. Lines for the same item and size are summed.
pub async fn validate_stock<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
) -> Result<(), ServiceError> {
    let mut requested: BTreeMap<(Uuid, Option<&str>), i32> = BTreeMap::new();
    for line in lines {
        *requested
            .entry((line.catalog_item_id, line.size.as_deref()))
            .or_default() += line.quantity;
    }

    for ((item_id, size), quantity) in requested {
        let resolved = resolve_item(conn, item_id, size).await?;
        ensure_sized(&resolved)?;
        let available = resolved.available();
        if quantity > available {
            return Err(ServiceError::InsufficientStock {
                item_id,
                name: resolved.display_name(),
                available,
                requested: quantity,
            });
        }
    }

    Ok(())
}

/// Removes purchased quantities from stock. Must run inside the transaction
/// that persists the order.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
) -> Result<(), ServiceError> {
    for line in lines {
        let resolved = resolve_item(conn, line.catalog_item_id, line.size.as_deref()).await?;

        match &resolved.variant {
            Some(variant) => {
                let result = SizeVariant::update_many()
                    .col_expr(
                        size_variant::Column::Stock,
                        Expr::col(size_variant::Column::Stock).sub(line.quantity),
                    )
                    .filter(size_variant::Column::Id.eq(variant.id))
                    .filter(size_variant::Column::Stock.gte(line.quantity))
                    .exec(conn)
                    .await?;
                if result.rows_affected == 0 {
                    return Err(insufficient(&resolved, line));
                }
                recompute_aggregates(conn, line.catalog_item_id).await?;
            }
            None => {
                ensure_sized(&resolved)?;
                let result = CatalogItem::update_many()
                    .col_expr(
                        catalog_item::Column::Stock,
                        Expr::col(catalog_item::Column::Stock).sub(line.quantity),
                    )
                    .col_expr(catalog_item::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(catalog_item::Column::Id.eq(line.catalog_item_id))
                    .filter(catalog_item::Column::Stock.gte(line.quantity))
                    .exec(conn)
                    .await?;
                if result.rows_affected == 0 {
                    return Err(insufficient(&resolved, line));
                }
                sync_status(conn, line.catalog_item_id).await?;
            }
        }

        counter!("nursery_inventory.decremented_units", line.quantity as u64);
        debug!(
            item_id = %line.catalog_item_id,
            size = ?line.size,
            quantity = line.quantity,
            "stock decremented"
        );
    }

    Ok(())
}

/// A line without a size cannot draw from an item that has size variants.
fn ensure_sized(resolved: &ResolvedItem) -> Result<(), ServiceError> {
    if resolved.has_variants && resolved.variant.is_none() {
        return Err(ServiceError::ValidationError(format!(
            "{} requires a size",
            resolved.item.name
        )));
    }
    Ok(())
}

fn insufficient(resolved: &ResolvedItem, line: &StockLine) -> ServiceError {
    ServiceError::InsufficientStock {
        item_id: line.catalog_item_id,
        name: resolved.display_name(),
        available: resolved.available().max(0),
        requested: line.quantity,
    }
}

/// Inverse of [`decrement_stock`], used by cancellation.
///
/// Restoring ignores listing status (an archived item still gets its units
/// back). Items or sizes deleted since the order was placed are skipped.
pub async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
) -> Result<(), ServiceError> {
    for line in lines {
        if CatalogItem::find_by_id(line.catalog_item_id)
            .one(conn)
            .await?
            .is_none()
        {
            warn!(item_id = %line.catalog_item_id, name = %line.name, "cannot restore stock: item deleted");
            continue;
        }

        let variants = load_variants(conn, line.catalog_item_id).await?;
        if variants.is_empty() {
            CatalogItem::update_many()
                .col_expr(
                    catalog_item::Column::Stock,
                    Expr::col(catalog_item::Column::Stock).add(line.quantity),
                )
                .col_expr(catalog_item::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(catalog_item::Column::Id.eq(line.catalog_item_id))
                .exec(conn)
                .await?;
            sync_status(conn, line.catalog_item_id).await?;
        } else {
            let Some(variant) = line
                .size
                .as_deref()
                .and_then(|size| variants.iter().find(|v| v.size == size))
            else {
                warn!(
                    item_id = %line.catalog_item_id,
                    size = ?line.size,
                    "cannot restore stock: size variant no longer exists"
                );
                continue;
            };

            SizeVariant::update_many()
                .col_expr(
                    size_variant::Column::Stock,
                    Expr::col(size_variant::Column::Stock).add(line.quantity),
                )
                .filter(size_variant::Column::Id.eq(variant.id))
                .exec(conn)
                .await?;
            recompute_aggregates(conn, line.catalog_item_id).await?;
        }

        counter!("nursery_inventory.restored_units", line.quantity as u64);
    }

    Ok(())
}

/// Rewrites the parent's cached price and stock from its variants. Every
/// variant mutation path ends here.
pub async fn recompute_aggregates<C: ConnectionTrait>(
    conn: &C,
    catalog_item_id: Uuid,
) -> Result<(), ServiceError> {
    let variants = load_variants(conn, catalog_item_id).await?;
    let Some(aggregate) = aggregate_variants(&variants) else {
        return Ok(());
    };
    let Some(item) = CatalogItem::find_by_id(catalog_item_id).one(conn).await? else {
        return Ok(());
    };

    CatalogItem::update_many()
        .col_expr(catalog_item::Column::Price, Expr::value(aggregate.price))
        .col_expr(catalog_item::Column::Stock, Expr::value(aggregate.stock))
        .col_expr(
            catalog_item::Column::Status,
            Expr::value(status_for_stock(item.status, aggregate.stock)),
        )
        .col_expr(catalog_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(catalog_item::Column::Id.eq(catalog_item_id))
        .exec(conn)
        .await?;

    Ok(())
}

async fn sync_status<C: ConnectionTrait>(
    conn: &C,
    catalog_item_id: Uuid,
) -> Result<(), ServiceError> {
    let Some(item) = CatalogItem::find_by_id(catalog_item_id).one(conn).await? else {
        return Ok(());
    };
    let next = status_for_stock(item.status, item.stock);
    if next != item.status {
        CatalogItem::update_many()
            .col_expr(catalog_item::Column::Status, Expr::value(next))
            .filter(catalog_item::Column::Id.eq(catalog_item_id))
            .exec(conn)
            .await?;
        debug!(item_id = %catalog_item_id, status = %next, "catalog status changed");
    }
    Ok(())
}
