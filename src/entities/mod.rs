pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod coupon_redemption;
pub mod customer;
pub mod order;
pub mod order_history;
pub mod order_item;
pub mod product;
pub mod product_variant;
pub mod return_item;
pub mod return_request;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use coupon::Entity as Coupon;
pub use coupon_redemption::Entity as CouponRedemption;
pub use customer::Entity as Customer;
pub use order::Entity as Order;
pub use order_history::Entity as OrderHistory;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
pub use product_variant::Entity as ProductVariant;
pub use return_item::Entity as ReturnItem;
pub use return_request::Entity as ReturnRequest;
