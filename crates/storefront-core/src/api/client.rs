//! API client for the storefront REST API.
//!
//! `StorefrontClient` wraps the [`Gateway`] with typed calls for auth,
//! catalog, cart, wishlist, orders, addresses, payments, and vendor tools.
//! Every call unwraps the `{ data, apiError }` envelope with its own default
//! failure message.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::auth_service::IssuedCredential;
use super::error::ApiError;
use super::gateway::Gateway;
use super::request::{ApiRequest, FormPart};
use super::transport::Transport;
use crate::auth::{CredentialStore, SessionData};
use crate::models::{
    Address, Cart, Category, NewAddress, Order, OrderStatus, PaymentSession, PlaceOrder,
    Product, ProductQuery, UserIdentity, WishlistItem,
};

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ask for a vendor account instead of a customer one
    pub vendor: bool,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CartItemRequest<'a> {
    product_id: &'a str,
    quantity: u32,
}

#[derive(Serialize)]
struct QuantityUpdate {
    quantity: u32,
}

#[derive(Serialize)]
struct WishlistRequest<'a> {
    product_id: &'a str,
}

#[derive(Serialize)]
struct PaymentSessionRequest<'a> {
    order_id: &'a str,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: OrderStatus,
}

/// Response of endpoints that only acknowledge
#[derive(Debug, Deserialize)]
struct Ack {}

/// Clone is cheap - the gateway is shared.
#[derive(Clone)]
pub struct StorefrontClient {
    gateway: Gateway,
}

impl StorefrontClient {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Client with the default gateway over `transport`
    pub fn with_transport(transport: Arc<dyn Transport>, store: CredentialStore) -> Self {
        Self::new(Gateway::new(transport, store))
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn store(&self) -> &CredentialStore {
        self.gateway.store()
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest, default_message: &str) -> Result<T, ApiError> {
        let path = request.path.clone();
        let response = self.gateway.send(request).await?;
        debug!(path = %path, status = %response.status, "Response received");
        response.envelope::<T>()?.into_data(default_message)
    }

    // ===== Auth =====

    /// Sign in and establish the session
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionData, ApiError> {
        let path = self.gateway.auth().endpoints().login.clone();
        let request = ApiRequest::post(path).json(&Credentials { email, password })?;
        let issued: IssuedCredential = self.fetch(request, "Login failed").await?;

        // The refresh cookie set by the login response goes with the session
        let cookies = self
            .gateway
            .transport()
            .cookies_for(&self.gateway.auth().endpoints().refresh);
        let data = SessionData::new(issued.access_token, issued.user).with_cookies(cookies);
        self.store()
            .login(data.clone())
            .map_err(|e| ApiError::SessionStorage(format!("{:#}", e)))?;
        Ok(data)
    }

    pub async fn register(&self, registration: &Registration) -> Result<UserIdentity, ApiError> {
        let path = self.gateway.auth().endpoints().register.clone();
        let request = ApiRequest::post(path).json(registration)?;
        self.fetch(request, "Registration failed").await
    }

    /// End the session. The server call is best-effort; the local session is
    /// always cleared.
    pub async fn logout(&self) {
        let token = self.store().access_token();
        if let Err(e) = self.gateway.auth().logout(token.as_deref()).await {
            warn!(error = %e, "Server logout failed");
        }
        self.store().clear();
    }

    pub async fn current_user(&self) -> Result<UserIdentity, ApiError> {
        self.fetch(ApiRequest::get("/auth/me"), "Failed to fetch profile").await
    }

    // ===== Catalog =====

    pub async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        self.fetch(ApiRequest::get("/categories"), "Failed to fetch categories").await
    }

    pub async fn products(&self, query: &ProductQuery) -> Result<Vec<Product>, ApiError> {
        let request = ApiRequest::get("/products").query(query.to_pairs());
        self.fetch(request, "Failed to fetch products").await
    }

    pub async fn product(&self, product_id: &str) -> Result<Product, ApiError> {
        let request = ApiRequest::get(format!("/products/{}", product_id));
        self.fetch(request, "Failed to fetch product").await
    }

    // ===== Cart =====

    pub async fn cart(&self) -> Result<Cart, ApiError> {
        self.fetch(ApiRequest::get("/cart"), "Failed to fetch cart").await
    }

    pub async fn add_to_cart(&self, product_id: &str, quantity: u32) -> Result<Cart, ApiError> {
        let request = ApiRequest::post("/cart/items").json(&CartItemRequest { product_id, quantity })?;
        self.fetch(request, "Failed to add item to cart").await
    }

    pub async fn update_cart_item(&self, item_id: &str, quantity: u32) -> Result<Cart, ApiError> {
        let request =
            ApiRequest::patch(format!("/cart/items/{}", item_id)).json(&QuantityUpdate { quantity })?;
        self.fetch(request, "Failed to update cart item").await
    }

    pub async fn remove_cart_item(&self, item_id: &str) -> Result<Cart, ApiError> {
        let request = ApiRequest::delete(format!("/cart/items/{}", item_id));
        self.fetch(request, "Failed to remove cart item").await
    }

    // ===== Wishlist =====

    pub async fn wishlist(&self) -> Result<Vec<WishlistItem>, ApiError> {
        self.fetch(ApiRequest::get("/wishlist"), "Failed to fetch wishlist").await
    }

    pub async fn add_to_wishlist(&self, product_id: &str) -> Result<Vec<WishlistItem>, ApiError> {
        let request = ApiRequest::post("/wishlist").json(&WishlistRequest { product_id })?;
        self.fetch(request, "Failed to add to wishlist").await
    }

    pub async fn remove_from_wishlist(&self, product_id: &str) -> Result<Vec<WishlistItem>, ApiError> {
        let request = ApiRequest::delete(format!("/wishlist/{}", product_id));
        self.fetch(request, "Failed to remove from wishlist").await
    }

    // ===== Orders =====

    pub async fn orders(&self) -> Result<Vec<Order>, ApiError> {
        self.fetch(ApiRequest::get("/orders"), "Failed to fetch orders").await
    }

    pub async fn order(&self, order_id: &str) -> Result<Order, ApiError> {
        let request = ApiRequest::get(format!("/orders/{}", order_id));
        self.fetch(request, "Failed to fetch order").await
    }

    /// Place an order from the current cart.
    ///
    /// Each call gets a fresh idempotency key; a retry after refresh reuses it.
    pub async fn place_order(&self, order: &PlaceOrder) -> Result<Order, ApiError> {
        let key = uuid::Uuid::new_v4().to_string();
        let request = ApiRequest::post("/orders").json(order)?.idempotency_key(&key)?;
        self.fetch(request, "Failed to place order").await
    }

    // ===== Addresses =====

    pub async fn addresses(&self) -> Result<Vec<Address>, ApiError> {
        self.fetch(ApiRequest::get("/addresses"), "Failed to fetch addresses").await
    }

    pub async fn add_address(&self, address: &NewAddress) -> Result<Address, ApiError> {
        let request = ApiRequest::post("/addresses").json(address)?;
        self.fetch(request, "Failed to save address").await
    }

    pub async fn delete_address(&self, address_id: &str) -> Result<(), ApiError> {
        let request = ApiRequest::delete(format!("/addresses/{}", address_id));
        let _: Ack = self.fetch(request, "Failed to delete address").await?;
        Ok(())
    }

    // ===== Payments =====

    /// Create a hosted checkout session with the payment processor
    pub async fn create_payment_session(&self, order_id: &str) -> Result<PaymentSession, ApiError> {
        let request =
            ApiRequest::post("/payments/checkout-session").json(&PaymentSessionRequest { order_id })?;
        self.fetch(request, "Failed to start checkout").await
    }

    // ===== Vendor =====

    pub async fn vendor_orders(&self) -> Result<Vec<Order>, ApiError> {
        self.fetch(ApiRequest::get("/vendor/orders"), "Failed to fetch vendor orders").await
    }

    pub async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<Order, ApiError> {
        let request = ApiRequest::patch(format!("/vendor/orders/{}/status", order_id))
            .json(&StatusUpdate { status })?;
        self.fetch(request, "Failed to update order status").await
    }

    pub async fn upload_product_image(
        &self,
        product_id: &str,
        filename: &str,
        content_type: Option<String>,
        data: Vec<u8>,
    ) -> Result<Product, ApiError> {
        let request = ApiRequest::post(format!("/vendor/products/{}/images", product_id))
            .multipart(vec![FormPart::file("image", filename, content_type, data)]);
        self.fetch(request, "Failed to upload image").await
    }
}
