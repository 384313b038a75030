//! Coffer CLI - command line interface for encrypted vaults.
//!
//! Every command opens the vault, runs one operation, and closes it again.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use coffer_common::{VaultHandle, VaultPath};
use coffer_crypto::KdfParams;
use coffer_vault::{EngineConfig, NodeType, VaultManager, VaultOperations, VaultSession};

#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Coffer - encrypted file vaults")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Create {
        /// Directory to hold the vault.
        #[arg(short, long)]
        path: PathBuf,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "moderate")]
        strength: String,
    },

    /// Show vault information.
    Info {
        /// Path to the vault.
        #[arg(short, long)]
        path: PathBuf,
    },

    /// List a directory in the vault.
    Ls {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Directory within the vault.
        #[arg(default_value = "/")]
        dir: String,

        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Add a local file to the vault.
    Add {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Local file to add.
        source: PathBuf,

        /// Destination path in the vault.
        dest: String,
    },

    /// Replace the content of a file already in the vault.
    Update {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Local file with the new content.
        source: PathBuf,

        /// File in the vault to replace.
        dest: String,
    },

    /// Show metadata of one entry.
    Stat {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Entry in the vault.
        target: String,
    },

    /// Extract a file from the vault.
    Extract {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// File in the vault.
        source: String,

        /// Local destination file.
        dest: PathBuf,
    },

    /// Create a directory (and missing parents) in the vault.
    Mkdir {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Directory to create.
        dir: String,
    },

    /// Remove a file or directory from the vault.
    Rm {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Entry to remove.
        target: String,

        /// Remove a directory and everything below it.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Change the vault password.
    Passwd {
        /// Path to the vault.
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Check every file in the vault for integrity.
    Verify {
        /// Path to the vault.
        #[arg(short, long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("COFFER_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;

    match cli.command {
        Commands::Create { path, strength } => cmd_create(&path, &strength).await,
        Commands::Info { path } => cmd_info(&path).await,
        Commands::Ls {
            vault_path,
            dir,
            json,
        } => cmd_ls(&vault_path, &dir, json).await,
        Commands::Add {
            vault_path,
            source,
            dest,
        } => cmd_add(&vault_path, &source, &dest).await,
        Commands::Update {
            vault_path,
            source,
            dest,
        } => cmd_update(&vault_path, &source, &dest).await,
        Commands::Stat { vault_path, target } => cmd_stat(&vault_path, &target).await,
        Commands::Extract {
            vault_path,
            source,
            dest,
        } => cmd_extract(&vault_path, &source, &dest).await,
        Commands::Mkdir { vault_path, dir } => cmd_mkdir(&vault_path, &dir).await,
        Commands::Rm {
            vault_path,
            target,
            recursive,
        } => cmd_rm(&vault_path, &target, recursive).await,
        Commands::Passwd { path } => cmd_passwd(&path).await,
        Commands::Verify { path } => cmd_verify(&path).await,
    }
}

/// Prompt for a password without echo.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

/// Prompt twice and require both entries to match.
fn prompt_new_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(password)
}

fn vault_path(path: &str) -> Result<VaultPath> {
    VaultPath::parse(path).with_context(|| format!("Invalid vault path: {}", path))
}

/// An open vault that is closed again when the command finishes.
struct OpenVault {
    manager: VaultManager,
    handle: VaultHandle,
    session: Arc<VaultSession>,
}

impl OpenVault {
    async fn open(path: &Path) -> Result<Self> {
        let password = prompt_password("Enter password: ")?;
        let manager = VaultManager::new();
        let handle = manager
            .open(path, password.as_bytes())
            .await
            .with_context(|| format!("Failed to open vault at {}", path.display()))?;
        let session = manager.get(handle)?;
        Ok(Self {
            manager,
            handle,
            session,
        })
    }

    fn ops(&self) -> VaultOperations<'_> {
        VaultOperations::new(&self.session)
    }

    async fn close(self) -> Result<()> {
        drop(self.session);
        self.manager
            .close(self.handle)
            .await
            .context("Failed to close vault")
    }
}

async fn cmd_create(path: &Path, strength: &str) -> Result<()> {
    let kdf_params = KdfParams::from_preset(strength)
        .context("Invalid strength. Use: interactive, moderate, or sensitive")?;
    let password = prompt_new_password("Enter password: ")?;

    info!("Creating vault at {}", path.display());
    let manager = VaultManager::with_config(EngineConfig {
        kdf_params,
        ..EngineConfig::default()
    });
    let handle = manager
        .create(path, password.as_bytes())
        .await
        .context("Failed to create vault")?;
    let info = manager.get(handle)?.info().await?;
    manager.close(handle).await?;

    println!("Vault created successfully!");
    println!("  ID: {}", info.vault_id);
    println!("  Location: {}", info.root_path);
    Ok(())
}

async fn cmd_info(path: &Path) -> Result<()> {
    let vault = OpenVault::open(path).await?;
    let info = vault.session.info().await?;
    let created = vault.session.created_at();
    vault.close().await?;

    println!("Vault Information:");
    println!("  ID: {}", info.vault_id);
    println!("  Location: {}", info.root_path);
    println!("  Created: {}", created.to_rfc3339());
    println!("  Files: {}", info.file_count);
    println!("  Total size: {} bytes", info.total_size);
    println!("  Version: {}", info.version);
    Ok(())
}

async fn cmd_ls(path: &Path, dir: &str, json: bool) -> Result<()> {
    let dir_path = vault_path(dir)?;
    let vault = OpenVault::open(path).await?;
    let entries = vault
        .ops()
        .list(&dir_path)
        .await
        .context("Failed to list directory")?;
    vault.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("Directory is empty.");
    } else {
        for entry in entries {
            match entry.kind {
                NodeType::Directory => println!("  [DIR]  {}/", entry.name),
                NodeType::File => println!("  [FILE] {} ({} bytes)", entry.name, entry.size),
            }
        }
    }
    Ok(())
}

async fn cmd_add(path: &Path, source: &Path, dest: &str) -> Result<()> {
    let dest_path = vault_path(dest)?;
    let vault = OpenVault::open(path).await?;
    info!("Adding {} as {}", source.display(), dest_path);
    vault
        .ops()
        .add_file(source, &dest_path)
        .await
        .with_context(|| format!("Failed to add {}", source.display()))?;
    vault.close().await?;

    println!("File added: {}", dest_path);
    Ok(())
}

async fn cmd_update(path: &Path, source: &Path, dest: &str) -> Result<()> {
    let dest_path = vault_path(dest)?;
    let vault = OpenVault::open(path).await?;
    vault
        .ops()
        .update_from(source, &dest_path)
        .await
        .with_context(|| format!("Failed to update {}", dest_path))?;
    vault.close().await?;

    println!("File updated: {}", dest_path);
    Ok(())
}

async fn cmd_stat(path: &Path, target: &str) -> Result<()> {
    let target_path = vault_path(target)?;
    let vault = OpenVault::open(path).await?;
    let meta = vault
        .ops()
        .metadata(&target_path)
        .await
        .with_context(|| format!("Failed to stat {}", target_path))?;
    vault.close().await?;

    let kind = match meta.kind {
        NodeType::File => "file",
        NodeType::Directory => "directory",
    };
    println!("{}:", target_path);
    println!("  Kind: {}", kind);
    println!("  Size: {} bytes", meta.size);
    println!("  Created: {}", meta.created_at.to_rfc3339());
    println!("  Modified: {}", meta.modified_at.to_rfc3339());
    Ok(())
}

async fn cmd_extract(path: &Path, source: &str, dest: &Path) -> Result<()> {
    let source_path = vault_path(source)?;
    let vault = OpenVault::open(path).await?;
    vault
        .ops()
        .extract_file(&source_path, dest)
        .await
        .with_context(|| format!("Failed to extract {}", source_path))?;
    vault.close().await?;

    println!("File extracted: {}", dest.display());
    Ok(())
}

async fn cmd_mkdir(path: &Path, dir: &str) -> Result<()> {
    let dir_path = vault_path(dir)?;
    let vault = OpenVault::open(path).await?;
    vault
        .ops()
        .mkdir(&dir_path)
        .await
        .context("Failed to create directory")?;
    vault.close().await?;

    println!("Directory created: {}", dir_path);
    Ok(())
}

async fn cmd_rm(path: &Path, target: &str, recursive: bool) -> Result<()> {
    let target_path = vault_path(target)?;
    let vault = OpenVault::open(path).await?;
    let result = if recursive {
        vault.ops().remove_recursive(&target_path).await
    } else {
        vault.ops().remove(&target_path).await
    };
    result.with_context(|| format!("Failed to remove {}", target_path))?;
    vault.close().await?;

    println!("Removed: {}", target_path);
    Ok(())
}

async fn cmd_passwd(path: &Path) -> Result<()> {
    let old_password = prompt_password("Enter current password: ")?;
    let new_password = prompt_new_password("Enter new password: ")?;

    let manager = VaultManager::new();
    let handle = manager
        .open(path, old_password.as_bytes())
        .await
        .context("Failed to open vault")?;
    manager
        .get(handle)?
        .change_password(old_password.as_bytes(), new_password.as_bytes())
        .await
        .context("Failed to change password")?;
    manager.close(handle).await?;

    println!("Password changed successfully!");
    Ok(())
}

async fn cmd_verify(path: &Path) -> Result<()> {
    let vault = OpenVault::open(path).await?;
    let report = vault.session.verify().await.context("Verification failed")?;
    vault.close().await?;

    println!(
        "Vault OK: {} files, {} bytes checked",
        report.files_checked, report.bytes_checked
    );
    Ok(())
}
