pub mod cart_line;
pub mod catalog_item;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod pending_payment;
pub mod serviceable_pincode;
pub mod size_variant;

pub use cart_line::{Entity as CartLine, Model as CartLineModel};
pub use catalog_item::{
    CatalogItemKind, CatalogItemStatus, Entity as CatalogItem, Model as CatalogItemModel,
};
pub use coupon::{Entity as Coupon, Model as CouponModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use pending_payment::{
    Entity as PendingPayment, Model as PendingPaymentModel, PendingPaymentStatus,
};
pub use serviceable_pincode::{Entity as ServiceablePincode, Model as ServiceablePincodeModel};
pub use size_variant::{Entity as SizeVariant, Model as SizeVariantModel};
