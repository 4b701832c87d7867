pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod inventory;
pub mod orders;
pub mod returns;
