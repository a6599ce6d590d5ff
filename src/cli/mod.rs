//! Command-line interface.
//!
//! Without a subcommand the binary starts the server. Subcommands:
//! - `status` - query a running server's `/health`
//! - `config check` - validate the configuration file
//! - `vapid generate` - create a Web Push key pair
//! - `admin create` - create or reset a staff account

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::db::Role;
use crate::notifications::VapidKeys;

#[derive(Parser, Debug)]
#[command(name = "oxistore")]
#[command(author, version, about = "Storefront and back-office for a rental and printing shop", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "oxistore.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Skip startup self-checks (for development only)
    #[arg(long)]
    pub skip_checks: bool,

    /// Server URL used by `status`
    #[arg(long, env = "OXISTORE_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show health of a running server
    Status,

    #[command(subcommand)]
    Config(ConfigCommands),

    /// Web Push key management
    #[command(subcommand)]
    Vapid(VapidCommands),

    /// Staff account management
    #[command(subcommand)]
    Admin(AdminCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

#[derive(Subcommand, Debug)]
pub enum VapidCommands {
    /// Generate a P-256 key pair for push.private_key_path
    Generate {
        /// Where to write the PEM private key
        #[arg(short, long, default_value = "vapid_private.pem")]
        out: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum AdminCommands {
    /// Create a staff account, or reset an existing one's password and role
    Create {
        username: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, env = "OXISTORE_ADMIN_PASSWORD")]
        password: String,
        /// Create a regular staff account instead of an admin
        #[arg(long)]
        staff: bool,
    },
}

#[derive(Debug, Deserialize)]
struct HealthStatus {
    healthy: bool,
    database_healthy: bool,
    push_enabled: bool,
    version: String,
}

pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Status) => cmd_status(cli).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(&cli.config),
        Some(Commands::Vapid(VapidCommands::Generate { out, force })) => {
            cmd_vapid_generate(out, *force)
        }
        Some(Commands::Admin(AdminCommands::Create {
            username,
            name,
            password,
            staff,
        })) => {
            let role = if *staff { Role::Staff } else { Role::Admin };
            cmd_admin_create(&cli.config, username, name.as_deref(), password, role).await
        }
        // server start is handled in main.rs
        None => Ok(()),
    }
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create HTTP client")?;
    let url = format!("{}/health", cli.api_url.trim_end_matches('/'));

    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let status: HealthStatus = response.json().await.context("Unexpected /health response")?;

    println!("oxistore v{}", status.version);
    print_component("Server", status.healthy);
    print_component("Database", status.database_healthy);
    print_component("Push", status.push_enabled);

    if !status.healthy {
        anyhow::bail!("Server reports unhealthy");
    }
    Ok(())
}

fn print_component(name: &str, ok: bool) {
    let marker = if ok { "[OK]" } else { "[!!]" };
    println!("  {} {}", marker, name);
}

fn cmd_config_check(config_path: &Path) -> Result<()> {
    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!("[!!] Configuration file not found: {}", config_path.display());
        println!();
        println!("Defaults will be used when starting the server.");
        return Ok(());
    }

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            anyhow::bail!("Invalid configuration file");
        }
    };

    println!("[OK] Configuration file is valid!");
    println!();
    println!("Server:");
    println!("  Address:      {}:{}", config.server.host, config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    if let Some(dir) = &config.server.static_dir {
        println!("  Static Dir:   {}", dir.display());
    }
    println!();
    println!("Checkout:");
    println!("  Print keyword: {}", config.checkout.print_keyword);
    println!("  Rental days:   {}", config.checkout.default_rental_days);
    println!();
    println!("Features:");
    println!("  Rate Limiting: {}", enabled(config.rate_limit.enabled));
    println!("  Push:          {}", enabled(config.push.enabled));
    println!("  Rental Monitor: {}", enabled(config.monitor.enabled));
    println!();

    let mut warnings = config.warnings();
    if config.auth.admin_password.is_none() {
        warnings.push(
            "auth.admin_password is unset; a random password is generated on first start".to_string(),
        );
    }
    if !config.auth.secure_cookie {
        warnings.push("auth.secure_cookie is off; enable it when serving over HTTPS".to_string());
    }
    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("  [!] {}", warning);
        }
        println!();
    }

    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "Enabled"
    } else {
        "Disabled"
    }
}

fn cmd_vapid_generate(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", out.display());
    }

    let (pem_text, public_key) = VapidKeys::generate()?;
    std::fs::write(out, pem_text).with_context(|| format!("Failed to write {}", out.display()))?;

    println!("Private key written to {}", out.display());
    println!();
    println!("Add to oxistore.toml:");
    println!();
    println!("[push]");
    println!("enabled = true");
    println!("private_key_path = \"{}\"", out.display());
    println!("public_key = \"{}\"", public_key);
    Ok(())
}

async fn cmd_admin_create(
    config_path: &Path,
    username: &str,
    name: Option<&str>,
    password: &str,
    role: Role,
) -> Result<()> {
    crate::api::validation::validate_password(password).map_err(anyhow::Error::msg)?;

    let config = Config::load(config_path)?;
    crate::utils::ensure_dir(&config.server.data_dir)?;
    let db = crate::db::init(&config.server.data_dir).await?;

    let id = crate::db::upsert_staff_user(&db, username, name.unwrap_or(username), password, role)
        .await?;
    println!("Saved {} account '{}' ({})", role, username, id);
    Ok(())
}
