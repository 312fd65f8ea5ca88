//! Etsy shop toolkit CLI
//!
//! Single binary covering the OAuth connect flow and day-to-day shop
//! operations: status checks, listing inspection, and bulk upload /
//! update / delete driven by JSON files.

mod config;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etsy_auth::{CredentialStore, OauthHandshake, TokenManager};
use etsy_client::bulk;
use etsy_client::{ApiClient, BulkReport, EtsyApi, Listing, ListingUpdate, ProductInput};

use crate::config::Config;

const USAGE: &str = "\
shopkit - Etsy shop management toolkit

USAGE:
    shopkit [--data-dir <dir>] <command> [args]

COMMANDS:
    set-key <api-key>     Store the Etsy app API key
    connect               Run the OAuth flow and store tokens
    status                Show connection and token status
    ping                  Check the API key against the public ping endpoint
    shop-id [id]          Show or set the shop id override
    listings              List active listings in the shop
    upload <file.json>    Bulk-create draft listings from a product file
    update <file.json>    Bulk-update existing listings
    delete <id>...        Delete the given listings
    logout                Forget stored tokens (keeps the API key)
";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let data_dir_flag = args
        .iter()
        .position(|a| a == "--data-dir")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    // Everything that isn't the --data-dir flag pair is positional
    let mut positionals = Vec::new();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--data-dir" {
            skip_next = true;
            continue;
        }
        positionals.push(arg.as_str());
    }

    let data_dir = Config::resolve_data_dir(data_dir_flag);
    tracing::debug!(path = %data_dir.display(), "using data directory");
    let config = Config::load(&data_dir)
        .with_context(|| format!("failed to load config from {}", data_dir.display()))?;

    let Some(&command) = positionals.first() else {
        print!("{USAGE}");
        return Ok(());
    };

    match command {
        "set-key" => {
            let key = positionals
                .get(1)
                .context("usage: shopkit set-key <api-key>")?;
            let store = open_store(&config).await?;
            store.set_api_key(key).await?;
            println!("API key stored in {}", config.data_dir.display());
        }
        "connect" => connect(&config).await?,
        "status" => status(&config).await?,
        "ping" => {
            let api = build_api(&config).await?;
            api.client().ping().await?;
            println!("API key is valid");
        }
        "shop-id" => {
            let store = open_store(&config).await?;
            match positionals.get(1) {
                Some(id) => {
                    id.parse::<u64>().context("shop id must be numeric")?;
                    store.set_shop_id(id).await?;
                    println!("shop id set to {id}");
                }
                None => match store.shop_id().await {
                    Some(id) => println!("shop id: {id}"),
                    None => println!("no shop id override set (resolved from the API)"),
                },
            }
        }
        "listings" => {
            let api = build_api(&config).await?;
            let shop_id = api.find_shop_id().await?;
            let listings = api.all_shop_listings(shop_id, "active").await?;
            println!("{} active listings in shop {shop_id}", listings.len());
            for value in listings {
                if let Ok(listing) = serde_json::from_value::<Listing>(value) {
                    println!(
                        "  {}  {}",
                        listing.listing_id,
                        listing.title.as_deref().unwrap_or("(untitled)")
                    );
                }
            }
        }
        "upload" => {
            let path = positionals
                .get(1)
                .context("usage: shopkit upload <file.json>")?;
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {path}"))?;
            let products: Vec<ProductInput> =
                serde_json::from_str(&contents).context("invalid product file")?;
            let api = build_api(&config).await?;
            let report = bulk::upload_products(&api, products).await?;
            print_report(&report);
        }
        "update" => {
            let path = positionals
                .get(1)
                .context("usage: shopkit update <file.json>")?;
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {path}"))?;
            let updates: Vec<ListingUpdate> =
                serde_json::from_str(&contents).context("invalid update file")?;
            let api = build_api(&config).await?;
            let report = bulk::update_listings(&api, updates).await?;
            print_report(&report);
        }
        "delete" => {
            let ids: Vec<u64> = positionals[1..]
                .iter()
                .map(|s| s.parse::<u64>().with_context(|| format!("bad listing id: {s}")))
                .collect::<Result<_>>()?;
            if ids.is_empty() {
                bail!("usage: shopkit delete <id>...");
            }
            let api = build_api(&config).await?;
            let report = bulk::delete_listings(&api, ids).await?;
            print_report(&report);
        }
        "logout" => {
            let store = open_store(&config).await?;
            let tokens = TokenManager::new(store, reqwest::Client::new());
            tokens.clear_tokens().await?;
            println!("tokens cleared; API key retained");
        }
        other => {
            eprint!("unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<CredentialStore>> {
    Ok(Arc::new(CredentialStore::load(&config.data_dir).await?))
}

/// Build the full API stack: store, token manager with a bound handshake
/// for refreshes, and the throttled client.
async fn build_api(config: &Config) -> Result<EtsyApi> {
    let store = open_store(config).await?;
    let api_key = store
        .api_key()
        .await
        .context("no API key configured; run `shopkit set-key <key>` or set ETSY_API_KEY")?;

    let http = reqwest::Client::new();
    let mut tokens = TokenManager::new(store.clone(), http.clone());
    tokens.bind_handshake(
        OauthHandshake::new(api_key.clone()).with_redirect_uri(config.redirect_uri.clone()),
    );
    let client = ApiClient::new(http, api_key, Arc::new(tokens));
    Ok(EtsyApi::new(client, store))
}

/// Interactive OAuth flow: print the authorization URL, wait for the user
/// to paste the redirect URL back, then exchange and store the tokens.
async fn connect(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let api_key = store
        .api_key()
        .await
        .context("no API key configured; run `shopkit set-key <key>` first")?;

    let http = reqwest::Client::new();
    let mut handshake =
        OauthHandshake::new(api_key.clone()).with_redirect_uri(config.redirect_uri.clone());

    println!("Open this URL in your browser and approve access:\n");
    println!("  {}\n", handshake.auth_url());
    print!("Paste the full redirect URL here: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let code = handshake.extract_code(line.trim())?;
    let token = handshake.exchange_code(&http, &code).await?;

    let tokens = TokenManager::new(store.clone(), http.clone());
    tokens.save_tokens(&token).await?;

    let client = ApiClient::new(http, api_key, Arc::new(tokens));
    let api = EtsyApi::new(client, store);
    match api.current_user().await {
        Ok(user) => println!(
            "Connected as {}",
            user.login_name.as_deref().unwrap_or("(unnamed user)")
        ),
        Err(_) => println!("Connected; tokens stored"),
    }
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let api = build_api(config).await?;
    let status = api.client().test_connection().await;
    println!("{}", status.message);
    println!("  api key valid:  {}", status.api_key_valid);
    println!("  authenticated:  {}", status.authenticated);
    if let Some(secs) = api.client().tokens().seconds_until_expiry().await {
        if secs > 0 {
            println!("  token expires in {secs}s");
        } else {
            println!("  token expired {}s ago (will refresh on next call)", -secs);
        }
    }
    let limits = api.client().rate_limit_status().await;
    if let Some(remaining) = limits.daily_remaining {
        println!("  daily requests remaining: {remaining}");
    }
    Ok(())
}

fn print_report(report: &BulkReport) {
    for outcome in &report.outcomes {
        if outcome.success {
            let id = outcome
                .listing_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            let status = outcome.status.as_deref().unwrap_or("done");
            println!("  ok   {:<40} listing {id} ({status})", outcome.title);
        } else {
            let error = outcome.error.as_deref().unwrap_or("unknown error");
            println!("  FAIL {:<40} {error}", outcome.title);
        }
    }
    println!("{} succeeded, {} failed", report.succeeded(), report.failed());
}
