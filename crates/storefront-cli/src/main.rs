//! Storefront CLI - a command-line client for the storefront API.
//!
//! Sign in once, then browse the catalog, manage the cart and wishlist,
//! place orders, and run vendor tasks. The session persists between runs
//! and access tokens are refreshed transparently.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storefront_core::api::Registration;
use storefront_core::models::{
    Address, Cart, OrderStatus, PlaceOrder, Product, ProductQuery, UserIdentity,
};
use storefront_core::{ApiError, Config, StorefrontClient};

#[derive(Parser)]
#[command(name = "storefront", version, about = "Shop and manage a storefront from the terminal")]
struct Cli {
    /// API base URL (overrides config and STOREFRONT_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        /// Register as a vendor
        #[arg(long)]
        vendor: bool,
    },
    /// End the session
    Logout,
    /// Show who is signed in
    Status,
    Categories,
    Products {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        page: Option<u32>,
    },
    Product {
        id: String,
    },
    Cart,
    /// Add a product to the cart
    CartAdd {
        product: String,
        #[arg(long, default_value_t = 1)]
        qty: u32,
    },
    Wishlist,
    Orders,
    /// Place an order from the current cart
    PlaceOrder {
        #[arg(long)]
        address: String,
        #[arg(long)]
        notes: Option<String>,
    },
    Addresses,
    /// Start a hosted checkout for an order and print its URL
    Checkout {
        order: String,
    },
    /// Orders for the signed-in vendor
    VendorOrders,
    /// Mark a vendor order as shipped
    Ship {
        order: String,
    },
    /// Upload a product image
    UploadImage {
        product: String,
        file: PathBuf,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

fn product_line(product: &Product) -> String {
    let mut line = format!("{}  {}  {}", product.id, product.name, product.display_price());
    if !product.in_stock() {
        line.push_str("  (out of stock)");
    }
    line
}

fn cart_lines(cart: &Cart) -> Vec<String> {
    let mut lines: Vec<String> = cart
        .items
        .iter()
        .map(|item| format!("{} x{}  {:.2}", item.name, item.quantity, item.line_total()))
        .collect();
    lines.push(format!("{} item(s), subtotal {:.2}", cart.item_count(), cart.subtotal));
    lines
}

fn address_line(address: &Address) -> String {
    let marker = if address.is_default { "  (default)" } else { "" };
    format!("{}  {}{}", address.id, address.one_line(), marker)
}

fn status_line(user: Option<&UserIdentity>) -> String {
    match user {
        Some(user) => format!("Signed in as {} ({:?})", user.display_name(), user.role),
        None => "Not signed in".to_string(),
    }
}

/// Vendor commands need a signed-in vendor
fn require_vendor(client: &StorefrontClient) -> Result<()> {
    match client.store().identity() {
        Some(user) if user.is_vendor() => Ok(()),
        Some(user) => bail!("{} is not a vendor account", user.display_name()),
        None => bail!("Not signed in. Run `storefront login` first"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    info!(api = %config.api_base_url, "Storefront CLI starting");

    let client = storefront_core::connect(&config)?;
    if let Err(err) = run(cli.command, &client, &mut config).await {
        if err.downcast_ref::<ApiError>().is_some_and(ApiError::is_auth_failure) {
            eprintln!("Session expired. Run `storefront login` to sign in again.");
        }
        return Err(err);
    }
    Ok(())
}

async fn run(command: Command, client: &StorefrontClient, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => {
                    eprint!("Email: ");
                    let mut line = String::new();
                    io::stdin().read_line(&mut line)?;
                    line.trim().to_string()
                }
            };
            let password = rpassword::prompt_password("Password: ")
                .context("Failed to read password")?;
            let session = client.login(&email, &password).await?;

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Failed to save config");
            }
            eprintln!("Signed in as {}", session.user.display_name());
        }
        Command::Register { email, name, vendor } => {
            let password = rpassword::prompt_password("Choose a password: ")
                .context("Failed to read password")?;
            let user = client
                .register(&Registration {
                    email,
                    password,
                    name,
                    vendor,
                })
                .await?;
            print_json(&user)?;
        }
        Command::Logout => {
            client.logout().await;
            eprintln!("Signed out");
        }
        Command::Status => println!("{}", status_line(client.store().identity().as_ref())),
        Command::Categories => print_json(&client.categories().await?)?,
        Command::Products {
            search,
            category,
            page,
        } => {
            let query = ProductQuery {
                search,
                category,
                page,
                per_page: None,
            };
            for product in client.products(&query).await? {
                println!("{}", product_line(&product));
            }
        }
        Command::Product { id } => print_json(&client.product(&id).await?)?,
        Command::Cart => {
            for line in cart_lines(&client.cart().await?) {
                println!("{}", line);
            }
        }
        Command::CartAdd { product, qty } => {
            let cart = client.add_to_cart(&product, qty).await?;
            eprintln!("Added {} x{}, cart now holds {} item(s)", product, qty, cart.item_count());
        }
        Command::Wishlist => print_json(&client.wishlist().await?)?,
        Command::Orders => print_json(&client.orders().await?)?,
        Command::PlaceOrder { address, notes } => {
            let order = client
                .place_order(&PlaceOrder {
                    address_id: address,
                    notes,
                })
                .await?;
            print_json(&order)?;
        }
        Command::Addresses => {
            for address in client.addresses().await? {
                println!("{}", address_line(&address));
            }
        }
        Command::Checkout { order } => {
            let session = client.create_payment_session(&order).await?;
            println!("{}", session.url);
        }
        Command::VendorOrders => {
            require_vendor(client)?;
            print_json(&client.vendor_orders().await?)?
        }
        Command::Ship { order } => {
            require_vendor(client)?;
            let current = client.order(&order).await?;
            if current.status.is_final() {
                bail!("Order {} is already {}", order, current.status.as_str());
            }
            let updated = client.update_order_status(&order, OrderStatus::Shipped).await?;
            println!("Order {} is now {}", updated.id, updated.status.as_str());
        }
        Command::UploadImage { product, file } => {
            require_vendor(client)?;
            let data = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string();
            let product = client
                .upload_product_image(&product, &filename, Some(content_type_for(&file)), data)
                .await?;
            print_json(&product)?;
        }
    }
    Ok(())
}
