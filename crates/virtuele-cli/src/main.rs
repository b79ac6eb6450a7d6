//! Virtuele - a command-line storefront for the Virtuele catalog API.
//!
//! Browse products without an account; log in to manage the cart, check out
//! and write reviews. Tokens are kept between runs according to the
//! `token_storage` setting in the config file.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use virtuele_core::cache::CacheManager;
use virtuele_core::models::{Cart, NewUser, Product, Size};
use virtuele_core::{Config, SessionError, ShopClient, ShopError, Storefront};

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix inside the cache directory
const LOG_FILE: &str = "virtuele.log";

const ENV_USERNAME: &str = "VIRTUELE_USERNAME";
const ENV_PASSWORD: &str = "VIRTUELE_PASSWORD";

/// Exit status when the stored session can no longer be refreshed
const SESSION_EXPIRED_EXIT: u8 = 2;

const USAGE: &str = "\
Usage: virtuele <command> [args]

Commands:
  register EMAIL USERNAME FIRST_NAME [LAST_NAME]
                                 Create an account
  login [USERNAME]               Log in and store tokens
  whoami                         Show the logged-in account
  logout                         Forget stored tokens
  status                         Show session and cache status
  products [--featured] [--category ID]
                                 List products
  product SLUG                   Show one product
  categories                     List categories
  reviews SLUG                   List reviews of a product
  cart                           Show the active cart
  add SLUG SIZE                  Add a product (size S, M or L) to the cart
  remove SLUG SIZE               Remove a product from the cart
  checkout                       Check out the active cart
  review SLUG RATING [TEXT]      Review a product (rating 1-5)
  refresh-cache                  Refetch cached catalog data
  help                           Show this message

Environment:
  RUST_LOG, VIRTUELE_BASE_URL, VIRTUELE_TIMEOUT_SECS, VIRTUELE_AUTH_SCHEME,
  VIRTUELE_USERNAME, VIRTUELE_PASSWORD";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Register {
        email: String,
        username: String,
        first_name: String,
        last_name: Option<String>,
    },
    Login(Option<String>),
    Whoami,
    Logout,
    Status,
    Products {
        featured: bool,
        category: Option<i64>,
    },
    Product(String),
    Categories,
    Reviews(String),
    Cart,
    Add(String, Size),
    Remove(String, Size),
    Checkout,
    Review {
        slug: String,
        rating: u8,
        text: Option<String>,
    },
    RefreshCache,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    let arg = |i: usize, name: &str| -> Result<String> {
        rest.get(i)
            .cloned()
            .with_context(|| format!("Missing argument {} for '{}'", name, command))
    };
    let size = |i: usize| -> Result<Size> {
        arg(i, "SIZE")?.parse::<Size>().map_err(anyhow::Error::msg)
    };

    let parsed = match command.as_str() {
        "register" => Command::Register {
            email: arg(0, "EMAIL")?,
            username: arg(1, "USERNAME")?,
            first_name: arg(2, "FIRST_NAME")?,
            last_name: rest.get(3).cloned(),
        },
        "login" => Command::Login(rest.first().cloned()),
        "whoami" => Command::Whoami,
        "logout" => Command::Logout,
        "status" => Command::Status,
        "products" => {
            let mut featured = false;
            let mut category = None;
            let mut iter = rest.iter();
            while let Some(flag) = iter.next() {
                match flag.as_str() {
                    "--featured" => featured = true,
                    "--category" => {
                        let id = iter.next().context("--category needs an ID")?;
                        category = Some(id.parse().with_context(|| format!("Invalid category ID: {}", id))?);
                    }
                    other => bail!("Unknown option for products: {}", other),
                }
            }
            Command::Products { featured, category }
        }
        "product" => Command::Product(arg(0, "SLUG")?),
        "categories" => Command::Categories,
        "reviews" => Command::Reviews(arg(0, "SLUG")?),
        "cart" => Command::Cart,
        "add" => Command::Add(arg(0, "SLUG")?, size(1)?),
        "remove" => Command::Remove(arg(0, "SLUG")?, size(1)?),
        "checkout" => Command::Checkout,
        "review" => {
            let raw = arg(1, "RATING")?;
            Command::Review {
                slug: arg(0, "SLUG")?,
                rating: raw.parse().with_context(|| format!("Invalid rating: {}", raw))?,
                text: (rest.len() > 2).then(|| rest[2..].join(" ")),
            }
        }
        "refresh-cache" => Command::RefreshCache,
        "help" | "--help" | "-h" => Command::Help,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    };
    Ok(parsed)
}

/// Initialize the tracing subscriber for logging
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) if config.log_to_file => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let (mut config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    config.apply_env();

    let _log_guard = init_tracing(&config);
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    info!(?command, base_url = %config.base_url, "Virtuele starting");

    // Returning normally lets the log guard flush the file writer
    exit_status(run(command, &mut config).await).map(ExitCode::from)
}

/// Map the command outcome to a process exit status.
fn exit_status(outcome: Result<()>) -> Result<u8> {
    match outcome {
        Ok(()) => Ok(0),
        Err(e) if is_session_expired(&e) => {
            warn!(error = %e, "Session expired");
            eprintln!("Session expired. Please log in again.");
            Ok(SESSION_EXPIRED_EXIT)
        }
        Err(e) => Err(e),
    }
}

fn is_session_expired(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ShopError>()
        .is_some_and(ShopError::is_session_expired)
        || err
            .downcast_ref::<SessionError>()
            .is_some_and(SessionError::is_session_expired)
}

async fn run(command: Command, config: &mut Config) -> Result<()> {
    match command {
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        Command::Register {
            email,
            username,
            first_name,
            last_name,
        } => {
            let form = NewUser {
                email,
                username,
                first_name,
                last_name,
                password: read_password()?,
            };
            let user = config.catalog_client()?.register(&form).await?;
            println!("Registered {} <{}>.", user.username, user.email);
            println!("Activate the account if required, then run `virtuele login`.");
            Ok(())
        }
        Command::Login(username) => login(config, username).await,
        Command::Whoami => {
            let user = shop(config).await?.me().await?;
            println!("{} ({}) <{}>", user.display_name(), user.username, user.email);
            Ok(())
        }
        Command::Logout => {
            let store = config.token_store()?;
            config.session_client(store)?.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        Command::Status => status(config).await,
        Command::Products { featured, category } => {
            let storefront = storefront(config)?;
            let products = match (featured, category) {
                (_, Some(id)) => storefront.catalog().products_in_category(id).await?,
                (true, None) => storefront.featured_products(false).await?,
                (false, None) => storefront.all_products(false).await?,
            };
            print_products(&products);
            Ok(())
        }
        Command::Product(slug) => {
            let product = storefront(config)?.product_detail(&slug, false).await?;
            print_product(&product);
            Ok(())
        }
        Command::Categories => {
            for category in storefront(config)?.category_list(false).await? {
                println!("{:>4}  {}", category.id, category.name);
            }
            Ok(())
        }
        Command::Reviews(slug) => {
            let reviews = config.catalog_client()?.reviews(&slug).await?;
            if reviews.is_empty() {
                println!("No reviews yet.");
            }
            for review in reviews {
                println!(
                    "{}/5  {}  {}",
                    review.rating,
                    review.user.username,
                    review.review.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Cart => {
            let carts = shop(config).await?.carts(Some(false)).await?;
            match carts.first() {
                Some(cart) => print_cart(cart),
                None => println!("Your cart is empty."),
            }
            Ok(())
        }
        Command::Add(slug, size) => {
            let cart = shop(config).await?.add_to_cart(&slug, size).await?;
            print_cart(&cart);
            Ok(())
        }
        Command::Remove(slug, size) => {
            let cart = shop(config).await?.remove_from_cart(&slug, size).await?;
            print_cart(&cart);
            Ok(())
        }
        Command::Checkout => {
            let cart = shop(config).await?.checkout().await?;
            println!("Checked out cart #{}.", cart.id.unwrap_or_default());
            print_cart(&cart);
            Ok(())
        }
        Command::Review { slug, rating, text } => {
            let review = shop(config)
                .await?
                .post_review(&slug, rating, text.as_deref())
                .await?;
            println!("Reviewed {} with {}/5.", review.product.name, review.rating);
            Ok(())
        }
        Command::RefreshCache => {
            let summary = storefront(config)?.refresh_all().await?;
            println!(
                "Cached {} products, {} featured, {} categories.",
                summary.products, summary.featured, summary.categories
            );
            Ok(())
        }
    }
}

fn storefront(config: &Config) -> Result<Storefront> {
    let cache = CacheManager::new(config.cache_dir()?)?;
    Ok(Storefront::new(config.catalog_client()?, cache))
}

async fn shop(config: &Config) -> Result<ShopClient> {
    let session = config.session_client(config.token_store()?)?;
    if !session.restore().await {
        bail!("Not logged in. Run `virtuele login` first.");
    }
    Ok(ShopClient::new(Arc::new(session)))
}

async fn login(config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username
        .or_else(|| std::env::var(ENV_USERNAME).ok())
        .filter(|u| !u.is_empty())
    {
        Some(username) => username,
        None => prompt_username(config.last_username.as_deref())?,
    };
    if username.is_empty() {
        bail!("Username required");
    }

    let password = read_password()?;

    let session = config.session_client(config.token_store()?)?;
    session
        .login(&username, &password)
        .await
        .context("Login failed")?;

    config.last_username = Some(username.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}.", username);
    Ok(())
}

/// Password from `VIRTUELE_PASSWORD`, else prompted without echo.
fn read_password() -> Result<String> {
    match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => Ok(password),
        _ => Ok(rpassword::prompt_password("Password: ")?),
    }
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

async fn status(config: &Config) -> Result<()> {
    let store = config.token_store()?;
    let session = config.session_client(store.clone())?;
    let logged_in = session.restore().await;

    println!("API:       {}", config.base_url);
    println!("Scheme:    {}", config.auth_scheme.label());
    println!("Storage:   {}", store.name());
    match (&config.last_username, logged_in) {
        (Some(user), true) => println!("Session:   logged in as {}", user),
        (None, true) => println!("Session:   logged in"),
        (_, false) => println!("Session:   not logged in"),
    }

    match config.cache_dir().and_then(CacheManager::new) {
        Ok(cache) => {
            println!("Catalog:   updated {}", cache.get_cache_ages().last_updated());
            println!("Cache:     {}", cache.cache_dir().display());
        }
        Err(e) => println!("Catalog:   cache unavailable ({})", e),
    }
    Ok(())
}

fn print_products(products: &[Product]) {
    if products.is_empty() {
        println!("No products found.");
        return;
    }
    for product in products {
        println!(
            "{:<30} {:<30} {:>12}  {}",
            product.slug.as_deref().unwrap_or("-"),
            product.name,
            product.display_price(),
            product.category_names()
        );
    }
}

fn print_product(product: &Product) {
    println!("{}", product.name);
    println!("  slug:      {}", product.slug.as_deref().unwrap_or("-"));
    println!("  price:     {}", product.display_price());
    println!("  rating:    {:.1}", product.rating.unwrap_or_default());
    println!("  material:  {}", product.material.as_deref().unwrap_or("-"));
    println!("  category:  {}", product.category_names());
    if let Some(ref description) = product.description {
        println!("\n{}", description);
    }
}

fn print_cart(cart: &Cart) {
    for item in &cart.products {
        println!(
            "{:>3} x {:<30} {}  {:>12.2}",
            item.qty,
            item.product.name,
            item.size,
            item.subtotal.unwrap_or_default()
        );
    }
    println!(
        "{} item(s), total {:.2}",
        cart.item_count(),
        cart.total.unwrap_or_default()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtuele_core::ApiError;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_products_flags() {
        assert_eq!(
            parse_args(&args(&["products", "--featured"])).unwrap(),
            Command::Products { featured: true, category: None }
        );
        assert_eq!(
            parse_args(&args(&["products", "--category", "3"])).unwrap(),
            Command::Products { featured: false, category: Some(3) }
        );
        assert!(parse_args(&args(&["products", "--category", "x"])).is_err());
    }

    #[test]
    fn test_parse_cart_commands() {
        assert_eq!(
            parse_args(&args(&["add", "tee", "m"])).unwrap(),
            Command::Add("tee".to_string(), Size::M)
        );
        assert!(parse_args(&args(&["remove", "tee", "xl"])).is_err());
        assert!(parse_args(&args(&["add", "tee"])).is_err());
    }

    #[test]
    fn test_parse_review() {
        assert_eq!(
            parse_args(&args(&["review", "tee", "4", "nice", "fabric"])).unwrap(),
            Command::Review {
                slug: "tee".to_string(),
                rating: 4,
                text: Some("nice fabric".to_string()),
            }
        );
        assert_eq!(
            parse_args(&args(&["review", "tee", "5"])).unwrap(),
            Command::Review { slug: "tee".to_string(), rating: 5, text: None }
        );
    }

    #[test]
    fn test_parse_account_commands() {
        assert_eq!(
            parse_args(&args(&["register", "ana@virtuele.id", "ana", "Ana"])).unwrap(),
            Command::Register {
                email: "ana@virtuele.id".to_string(),
                username: "ana".to_string(),
                first_name: "Ana".to_string(),
                last_name: None,
            }
        );
        assert!(parse_args(&args(&["register", "ana@virtuele.id", "ana"])).is_err());
        assert_eq!(parse_args(&args(&["whoami"])).unwrap(), Command::Whoami);
    }

    #[test]
    fn test_expired_session_exits_with_status() {
        let expired = ShopError::Session(SessionError::RefreshFailure(ApiError::Unauthorized));
        assert_eq!(exit_status(Err(expired.into())).unwrap(), SESSION_EXPIRED_EXIT);

        let wrapped = anyhow::Error::new(SessionError::RefreshFailure(ApiError::Unauthorized))
            .context("Login failed");
        assert_eq!(exit_status(Err(wrapped)).unwrap(), SESSION_EXPIRED_EXIT);

        assert_eq!(exit_status(Ok(())).unwrap(), 0);
        let transport: anyhow::Error = SessionError::Transport(ApiError::RateLimited).into();
        assert!(exit_status(Err(transport)).is_err());
    }

    #[test]
    fn test_parse_defaults_and_unknown() {
        assert_eq!(parse_args(&[]).unwrap(), Command::Help);
        assert_eq!(parse_args(&args(&["login"])).unwrap(), Command::Login(None));
        assert!(parse_args(&args(&["dance"])).is_err());
    }
}
