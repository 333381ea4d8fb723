// Pure calculations
pub mod totals;

// Catalog and stock
pub mod inventory;
pub mod serviceability;

// Checkout
pub mod cart;
pub mod coupons;
pub mod orders;

// Payment gateway
pub mod payments;
pub mod razorpay;
