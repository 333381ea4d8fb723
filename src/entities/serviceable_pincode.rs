use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Allow-list of postal codes the business delivers to.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "serviceable_pincodes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub pincode: String,
    #[sea_orm(nullable)]
    pub city: Option<String>,
    #[sea_orm(nullable)]
    pub state: Option<String>,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
