//! Data models for storefront entities.
//!
//! This module contains the wire types exchanged with the storefront API:
//!
//! - `UserIdentity`, `Role`: the authenticated account
//! - `Category`, `Product`, `ProductQuery`: catalog browsing
//! - `Cart`, `CartItem`, `WishlistItem`: shopper state kept server-side
//! - `Order`, `OrderStatus`, `PlaceOrder`, `PaymentSession`: checkout
//! - `Address`, `NewAddress`: shipping addresses

pub mod address;
pub mod cart;
pub mod catalog;
pub mod order;
pub mod user;

pub use address::{Address, NewAddress};
pub use cart::{Cart, CartItem, WishlistItem};
pub use catalog::{Category, Product, ProductQuery};
pub use order::{Order, OrderItem, OrderStatus, PaymentSession, PlaceOrder};
pub use user::{Role, UserIdentity};
