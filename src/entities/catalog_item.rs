use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Any purchasable entity: a plant or pot, a combo bundle, or a gift hamper.
///
/// When the item owns size variants, `price` and `stock` are cached aggregates
/// (minimum variant price, sum of variant stock) and are rewritten on every
/// variant mutation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "catalog_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: CatalogItemKind,
    pub name: String,
    pub price: i64,
    pub stock: i32,
    pub status: CatalogItemStatus,
    #[sea_orm(nullable)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::size_variant::Entity")]
    SizeVariants,
}

impl Related<super::size_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SizeVariants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Drafts and archived items cannot be bought even if they still carry stock.
    pub fn is_purchasable(&self) -> bool {
        matches!(
            self.status,
            CatalogItemStatus::Active | CatalogItemStatus::OutOfStock
        )
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalogItemKind {
    #[sea_orm(string_value = "PRODUCT")]
    Product,
    #[sea_orm(string_value = "COMBO")]
    Combo,
    #[sea_orm(string_value = "HAMPER")]
    Hamper,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalogItemStatus {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "OUT_OF_STOCK")]
    OutOfStock,
    #[sea_orm(string_value = "ARCHIVED")]
    Archived,
}
