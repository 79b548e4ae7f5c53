//! Command-line interface.
//!
//! Without a subcommand the binary runs the server. The subcommands work on
//! the database directly, so they also work while the server is stopped:
//! - `user add-admin <name>` - create the admin account
//! - `user add <name>` - create a read-only account
//! - `user remove <name>` - remove a read-only account
//! - `user list` - list read-only accounts
//! - `config check` - validate the configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::{AuthError, CredentialStore};
use crate::config::{CameraSourceType, Config};

#[derive(Parser, Debug)]
#[command(name = "garaged")]
#[command(author, version, about = "Garage door and camera controller", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "garaged.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Account management
    #[command(subcommand)]
    User(UserCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Create the admin account
    AddAdmin {
        username: String,
        #[arg(long, env = "GARAGED_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create a read-only account
    Add {
        username: String,
        #[arg(long, env = "GARAGED_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Remove a read-only account
    Remove { username: String },
    /// List read-only accounts
    List,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Run a CLI subcommand
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::User(command)) => cmd_user(cli, command).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        None => {
            // No subcommand means start the server - this is handled in main.rs
            Ok(())
        }
    }
}

async fn open_store(cli: &Cli) -> Result<CredentialStore> {
    let config = Config::load(&cli.config)?;
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;
    let db = crate::db::init(&config.server.data_dir).await?;
    CredentialStore::new(db, &config.auth).context("Invalid password hashing parameters")
}

async fn cmd_user(cli: &Cli, command: &UserCommands) -> Result<()> {
    let store = open_store(cli).await?;

    match command {
        UserCommands::AddAdmin { username, password } => {
            if store.ensure_admin(username, password).await? {
                println!("[OK] Admin '{}' created", username);
            } else {
                println!("[--] User '{}' already exists, nothing changed", username);
            }
        }
        UserCommands::Add { username, password } => match store.add_user(username, password).await {
            Ok(_) => println!("[OK] User '{}' created", username),
            Err(AuthError::AlreadyExists) => anyhow::bail!("User '{}' already exists", username),
            Err(e) => return Err(e.into()),
        },
        UserCommands::Remove { username } => {
            store
                .remove_user(username)
                .await
                .with_context(|| format!("Could not remove '{}'", username))?;
            println!("[OK] User '{}' removed", username);
        }
        UserCommands::List => {
            let users = store.list_users().await?;
            if users.is_empty() {
                println!("No read-only users.");
            }
            for user in users {
                println!("{}", user);
            }
        }
    }

    Ok(())
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!("[!!] Configuration file not found: {}", config_path.display());
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    let config = Config::load(config_path)?;
    println!("[OK] Configuration file is valid!");
    println!();
    println!("=== Configuration Summary ===");
    println!();
    println!("Server:");
    println!("  Listen:       {}:{}", config.server.host, config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    println!();
    println!("Relay:");
    println!("  Driver:       {:?}", config.relay.driver);
    println!("  Pin:          {}", config.relay.pin);
    println!("  Pulse:        {} ms", config.relay.pulse_ms);
    println!();
    println!("Camera:");
    println!("  Source:       {:?}", config.camera.source);
    match config.camera.source {
        CameraSourceType::Local => println!("  Command:      {}", config.camera.capture_command),
        CameraSourceType::Remote => println!(
            "  URL:          {}",
            config.camera.remote_url.as_deref().unwrap_or("(missing)")
        ),
        CameraSourceType::None => {}
    }
    println!();
    println!("Security:");
    println!(
        "  Rate Limiting: {}",
        if config.rate_limit.enabled { "Enabled" } else { "Disabled" }
    );
    println!("  Session TTL:   {} h", config.auth.session_ttl_hours);
    println!(
        "  Secure Cookie: {}",
        if config.auth.cookie_secure { "Yes" } else { "No" }
    );

    if config.camera.source == CameraSourceType::Remote && config.camera.remote_url.is_none() {
        println!();
        println!("[!!] camera.source is \"remote\" but camera.remote_url is not set");
    }

    Ok(())
}
