//! Credential commands.
//!
//! `sqlgate token mint` - Mint a signed MCP credential, optionally saving its record.
//! `sqlgate token hash` - Print the store lookup hash of a credential.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand};
use sqlgate_auth::{McpClaims, Role, TokenBuilder, hash_token};
use sqlgate_core::{Scope, TokenRecord};
use sqlgate_store::MetadataStore;

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Mint a new MCP credential.
    Mint(MintArgs),

    /// Print the hash the store indexes a credential by.
    Hash {
        /// The credential to hash.
        credential: String,
    },
}

/// Arguments for `sqlgate token mint`.
#[derive(Debug, Args)]
pub struct MintArgs {
    /// Shared secret the gateway verifies credentials with.
    #[arg(long, env = "SQLGATE_TOKEN_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Subject username.
    #[arg(long)]
    pub user: String,

    /// Workspace id.
    #[arg(long)]
    pub workspace: String,

    /// Role of the subject (user or admin).
    #[arg(long, default_value = "user")]
    pub role: Role,

    /// Lifetime in hours. Omit for a credential that never expires.
    #[arg(long)]
    pub ttl_hours: Option<i64>,

    /// Also write the token record to the metadata store.
    #[arg(long, default_value_t = false)]
    pub save: bool,

    /// Metadata store file (with --save).
    #[arg(long, env = "SQLGATE_STORE_PATH", default_value = "data/sqlgate.sqlite")]
    pub store: PathBuf,

    /// Display name of the saved token.
    #[arg(long, default_value = "cli")]
    pub name: String,

    /// Server ids the token may touch (repeatable). Omit for all.
    #[arg(long = "server")]
    pub servers: Vec<String>,

    /// Tool full names the token may call (repeatable). Omit for all.
    #[arg(long = "tool")]
    pub tools: Vec<String>,

    /// Resource full names the token may read (repeatable). Omit for all.
    #[arg(long = "resource")]
    pub resources: Vec<String>,
}

/// A minted credential and the record that backs it.
struct Minted {
    credential: String,
    record: TokenRecord,
}

fn mint_at(args: &MintArgs, now: DateTime<Utc>) -> anyhow::Result<Minted> {
    let secret = args
        .secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .context("Token secret not provided. Either pass --secret or set SQLGATE_TOKEN_SECRET")?;

    let expires_at = match args.ttl_hours {
        Some(hours) if hours <= 0 => anyhow::bail!("--ttl-hours must be positive"),
        Some(hours) => Some(now + Duration::hours(hours)),
        None => None,
    };

    let mut claims = McpClaims::new(&args.user, &args.workspace, args.role, now.timestamp());
    if let Some(exp) = expires_at {
        claims = claims.with_expiry(exp.timestamp());
    }
    let credential = TokenBuilder::new(secret)
        .mint(&claims)
        .context("Failed to mint credential")?;

    let record = TokenRecord {
        id: claims.jti,
        token_name: args.name.clone(),
        workspace_id: args.workspace.clone(),
        subject_username: args.user.clone(),
        servers: Scope::from_flag(args.servers.is_empty(), args.servers.iter().cloned()),
        tools: Scope::from_flag(args.tools.is_empty(), args.tools.iter().cloned()),
        resources: Scope::from_flag(args.resources.is_empty(), args.resources.iter().cloned()),
        never_expires: expires_at.is_none(),
        expires_at,
        revoked_at: None,
    };
    Ok(Minted { credential, record })
}

/// Mint a credential and print it with its id and hash.
pub async fn mint(args: MintArgs) -> anyhow::Result<()> {
    let Minted { credential, record } = mint_at(&args, Utc::now())?;
    let token_hash = hash_token(&credential);

    if args.save {
        let store = super::open_store(&args.store).await?;
        store
            .insert_token(&token_hash, &record)
            .await
            .context("Failed to save token record")?;
        store.close().await;
        tracing::info!(token_id = %record.id, store = %args.store.display(), "Token record saved");
    }

    println!("credential: {credential}");
    println!("token_id:   {}", record.id);
    println!("token_hash: {token_hash}");
    match record.expires_at {
        Some(at) => println!("expires_at: {}", at.to_rfc3339()),
        None => println!("expires_at: never"),
    }
    if !args.save {
        println!();
        println!("Store the record under token_hash before use (or re-run with --save).");
    }
    Ok(())
}

pub fn hash(credential: &str) {
    println!("{}", hash_token(credential.trim()));
}
