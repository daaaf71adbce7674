//! Storefront entities
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod checkout_session;
pub mod offer;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;

pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use checkout_session::{CheckoutStatus, Entity as CheckoutSession, Model as CheckoutSessionModel};
pub use offer::{DiscountType, Entity as Offer, Model as OfferModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use product::{Entity as Product, Model as ProductModel, ProductStatus};
