//! UniStore CLI - Command line interface for storage providers.
//!
//! This tool lists, reads, writes and deletes entries of any registered
//! provider, and generates external URLs where the backend supports them.

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use unistore_common::{ErrorCode, MatchCasing, PatternFormat};
use unistore_storage::{
    create_default_registry, CreateFileArgs, EntryModel, Expiry, ExternalAccessSettings,
    FindCriteria, ProviderSpec, StorageProvider, StorageProviderExt,
};

#[derive(Parser)]
#[command(name = "unistore")]
#[command(about = "UniStore - Local and cloud storage from one command line")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Local directory to use as the provider root.
    #[arg(short, long, global = true, conflicts_with = "config")]
    root: Option<PathBuf>,

    /// JSON file naming a provider and its configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Glob,
    Regex,
    Exact,
}

impl From<Format> for PatternFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Glob => PatternFormat::Glob,
            Format::Regex => PatternFormat::Regex,
            Format::Exact => PatternFormat::Exact,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List or search a folder.
    #[command(alias = "find")]
    Ls {
        /// Folder to search (default: root).
        #[arg(default_value = "/")]
        dir: String,

        /// Pattern entry names must match.
        #[arg(short, long, default_value = "*")]
        pattern: String,

        /// How the pattern is interpreted.
        #[arg(long, value_enum, default_value = "glob")]
        format: Format,

        /// Search all nested folders.
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Match names ignoring case.
        #[arg(short, long)]
        ignore_case: bool,

        /// Entries per page.
        #[arg(long, default_value_t = FindCriteria::DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Print one JSON object per entry.
        #[arg(long)]
        json: bool,
    },

    /// Copy a file out of the provider.
    Get {
        /// Source path in the provider.
        source: String,

        /// Destination file, or "-" for stdout.
        #[arg(default_value = "-")]
        dest: PathBuf,
    },

    /// Copy a local file into the provider.
    Put {
        /// Source file on disk.
        source: PathBuf,

        /// Destination path in the provider.
        dest: String,

        /// Replace the content of an existing file.
        #[arg(short, long)]
        force: bool,

        /// Content type to store with the file.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Create a folder and any missing parents.
    Mkdir {
        /// Folder path to create.
        dir: String,
    },

    /// Remove a file or a folder with its content.
    Rm {
        /// Path to remove.
        path: String,
    },

    /// Print a time-limited external URL for a file.
    Url {
        /// File path in the provider.
        path: String,

        /// Minutes until the URL expires.
        #[arg(short, long, default_value_t = 60)]
        minutes: i64,

        /// Content type reported to the URL's consumer.
        #[arg(long)]
        content_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let provider = open_provider(cli.root.as_deref(), cli.config.as_deref()).await?;
    debug!(provider = provider.name(), "Provider ready");

    match cli.command {
        Commands::Ls {
            dir,
            pattern,
            format,
            recursive,
            ignore_case,
            page_size,
            json,
        } => {
            let mut criteria = FindCriteria::new(pattern)
                .with_format(format.into())
                .with_page_size(page_size);
            if recursive {
                criteria = criteria.recursive();
            }
            if ignore_case {
                criteria = criteria.with_casing(MatchCasing::Insensitive);
            }
            cmd_ls(provider.as_ref(), &dir, &criteria, json).await
        }

        Commands::Get { source, dest } => cmd_get(provider.as_ref(), &source, &dest).await,

        Commands::Put {
            source,
            dest,
            force,
            content_type,
        } => cmd_put(provider.as_ref(), &source, &dest, force, content_type).await,

        Commands::Mkdir { dir } => cmd_mkdir(provider.as_ref(), &dir).await,

        Commands::Rm { path } => cmd_rm(provider.as_ref(), &path).await,

        Commands::Url {
            path,
            minutes,
            content_type,
        } => cmd_url(provider.as_ref(), &path, minutes, content_type).await,
    }
}

/// Build the provider from `--config` or `--root`.
async fn open_provider(
    root: Option<&Path>,
    config: Option<&Path>,
) -> Result<Arc<dyn StorageProvider>> {
    let registry = create_default_registry();

    let spec = match (root, config) {
        (_, Some(path)) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str::<ProviderSpec>(&text).context("Invalid provider config")?
        }
        (Some(root), None) => ProviderSpec {
            provider: "local".to_string(),
            config: serde_json::json!({ "root": root }),
        },
        (None, None) => anyhow::bail!("Either --root or --config is required"),
    };

    registry
        .resolve_spec(&spec)
        .with_context(|| format!("Failed to open '{}' provider", spec.provider))
}

/// List or search a folder, page by page.
async fn cmd_ls(
    provider: &dyn StorageProvider,
    dir: &str,
    criteria: &FindCriteria,
    json: bool,
) -> Result<()> {
    let folder = provider
        .open_folder(dir)
        .await
        .context("Failed to open folder")?
        .with_context(|| format!("No folder at {}", dir))?;

    let mut page = folder.find(criteria).await.context("Failed to search folder")?;
    let mut count = 0usize;
    while !page.is_empty() {
        for model in EntryModel::from_entries(page.entries()).await? {
            if json {
                println!("{}", serde_json::to_string(&model)?);
            } else if model.is_folder {
                println!("  [DIR]  {}/", model.path);
            } else {
                let size = model.length.unwrap_or(-1);
                println!("  [FILE] {} ({} bytes)", model.path, size);
            }
            count += 1;
        }
        page = page.next().await.context("Failed to fetch next page")?;
    }

    if count == 0 && !json {
        println!("No entries found.");
    }
    Ok(())
}

/// Copy a file out of the provider.
async fn cmd_get(provider: &dyn StorageProvider, source: &str, dest: &Path) -> Result<()> {
    let mut stream = provider
        .open_file_read_stream(source)
        .await
        .with_context(|| format!("Failed to read {}", source))?;

    let copied = if dest == Path::new("-") {
        let mut stdout = tokio::io::stdout();
        let copied = tokio::io::copy(&mut stream, &mut stdout).await?;
        stdout.flush().await?;
        copied
    } else {
        let mut file = tokio::fs::File::create(dest)
            .await
            .context("Failed to create output file")?;
        let copied = tokio::io::copy(&mut stream, &mut file).await?;
        file.flush().await?;
        info!("Extracted {} to {} ({} bytes)", source, dest.display(), copied);
        copied
    };

    debug!(bytes = copied, "Copy finished");
    Ok(())
}

/// Copy a local file into the provider.
async fn cmd_put(
    provider: &dyn StorageProvider,
    source: &Path,
    dest: &str,
    force: bool,
    content_type: Option<String>,
) -> Result<()> {
    let mut content = tokio::fs::File::open(source)
        .await
        .with_context(|| format!("Failed to open {}", source.display()))?;

    if force {
        if let Some(file) = provider.open_file(dest).await? {
            let mut stream = file.open_write().await.context("Failed to open file for writing")?;
            let written = tokio::io::copy(&mut content, &mut stream).await?;
            stream.set_len(written).await?;
            stream.close().await.context("Failed to commit file")?;
            println!("File replaced: {} ({} bytes)", dest, written);
            return Ok(());
        }
    }

    let mut args = CreateFileArgs::new().with_content(content);
    if let Some(content_type) = content_type {
        args = args.with_content_type(content_type);
    }

    let root = provider.open_root_folder().await?;
    match root.create_file(dest, args).await {
        Ok(file) => {
            println!("File added: {} ({} bytes)", dest, file.length().await?);
            Ok(())
        }
        Err(e) if e.is(ErrorCode::CannotCreateFileWhenItAlreadyExists) => {
            anyhow::bail!("{} already exists (use --force to replace it)", dest)
        }
        Err(e) => Err(e).context("Failed to add file"),
    }
}

/// Create a folder in the provider.
async fn cmd_mkdir(provider: &dyn StorageProvider, dir: &str) -> Result<()> {
    let folder = provider
        .open_or_create_folder(dir)
        .await
        .context("Failed to create folder")?;
    println!("Folder ready: {}", folder.path());
    Ok(())
}

/// Remove an entry from the provider.
async fn cmd_rm(provider: &dyn StorageProvider, path: &str) -> Result<()> {
    provider.delete(path).await.context("Failed to remove entry")?;
    println!("Removed: {}", path);
    Ok(())
}

/// Print an external URL for a file.
async fn cmd_url(
    provider: &dyn StorageProvider,
    path: &str,
    minutes: i64,
    content_type: Option<String>,
) -> Result<()> {
    let file = provider
        .open_file(path)
        .await?
        .with_context(|| format!("No file at {}", path))?;
    let web = file
        .web_access()
        .with_context(|| format!("The '{}' provider cannot generate URLs", provider.name()))?;

    let lifetime = Duration::try_minutes(minutes)
        .with_context(|| format!("{} minutes is out of range", minutes))?;
    let mut settings = ExternalAccessSettings::default().with_expiry(Expiry::after(lifetime));
    if let Some(content_type) = content_type {
        settings = settings.with_content_type(content_type);
    }

    let url = web
        .external_url(&settings)
        .await
        .context("Failed to generate URL")?;
    println!("{}", url);
    Ok(())
}
