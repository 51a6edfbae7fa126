//! page-sync: Publish a directory of markdown documents as a Confluence page tree.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use page_sync::config::{CONFIG_FILE, Config, expand_tilde};
use page_sync::report;
use page_sync::{ConfluenceClient, MermaidCli, NativeFs};

use page_sync_core::{MarkdownConverter, Orchestrator, SyncOptions, SyncPlan, SyncSettings};

#[derive(Parser, Debug)]
#[command(name = "page-sync")]
#[command(about = "Publish a markdown tree as Confluence pages")]
struct Args {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to page-sync.json in the sync root)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sync root directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Preview and publish local changes
    Sync {
        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Do not ask for confirmation
        #[arg(long)]
        force: bool,

        /// Ignore the sync cache and classify everything from scratch
        #[arg(long)]
        no_cache: bool,

        /// Target space, overriding the configuration
        #[arg(long)]
        space: Option<String>,
    },

    /// Report renames and orphaned pages without syncing
    Check,

    /// Manage the local sync cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Delete the persisted sync metadata
    Clear,
}

type CliOrchestrator = Orchestrator<NativeFs, ConfluenceClient>;

fn load_config(args: &Args, root: &Path, space: Option<String>) -> Result<Config> {
    let path = match &args.config {
        Some(path) => expand_tilde(path),
        None => root.join(CONFIG_FILE),
    };
    let mut config = Config::load(&path)?;
    if let Some(space) = space {
        config.space_key = space;
    }
    Ok(config)
}

fn build_orchestrator(root: &Path, config: &Config) -> Result<CliOrchestrator> {
    let client = ConfluenceClient::new(config)?;
    let settings = SyncSettings {
        space_key: config.space_key.clone(),
        root_parent_id: config.parent_page_id.clone(),
        diagrams_enabled: config.diagrams.enabled,
    };

    let mut orchestrator = Orchestrator::new(
        NativeFs::new(root.to_path_buf()),
        client,
        Box::new(MarkdownConverter::new()),
        settings,
    );
    if config.diagrams.enabled {
        let renderer = MermaidCli::new(config.diagrams.command.clone())
            .context("Failed to create diagram scratch directory")?;
        orchestrator = orchestrator.with_renderer(Box::new(renderer));
    }
    Ok(orchestrator)
}

/// Print the preview and ask on stdin.
fn confirm(plan: &SyncPlan) -> bool {
    if !plan.needs_sync() {
        println!("Everything is up to date");
        return true;
    }
    print!("Proceed with sync? [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().read_line(&mut answer) {
        Ok(_) => report::is_affirmative(&answer),
        Err(_) => false,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,page_sync=debug,page_sync_core=debug"
    } else {
        "info,page_sync=info,page_sync_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let root = expand_tilde(&args.root);
    if !root.is_dir() {
        bail!("Sync root {} is not a directory", root.display());
    }
    info!("Sync root: {}", root.display());

    match &args.command {
        Command::Sync {
            dry_run,
            force,
            no_cache,
            space,
        } => {
            let config = load_config(&args, &root, space.clone())?;
            let orchestrator = build_orchestrator(&root, &config)?;
            let options = SyncOptions {
                dry_run: *dry_run,
                force: *force,
                no_cache: *no_cache,
            };

            if options.dry_run {
                let plan = orchestrator.plan(&options).await?;
                print!("{}", report::render_plan(&plan));
                print!("{}", report::render_divergences(&plan.divergences));
                println!("Dry run: no changes made");
                return Ok(());
            }

            let summary = orchestrator
                .run(&options, |plan| {
                    print!("{}", report::render_plan(plan));
                    if !plan.divergences.is_empty() {
                        print!("{}", report::render_divergences(&plan.divergences));
                    }
                    confirm(plan)
                })
                .await?;

            // Forced runs never showed the preview
            if options.force && !summary.divergences.is_empty() {
                print!("{}", report::render_divergences(&summary.divergences));
            }
            print!("{}", report::render_summary(&summary));

            if !summary.is_success() {
                bail!("{} entries failed to sync", summary.errors);
            }
        }

        Command::Check => {
            let config = load_config(&args, &root, None)?;
            let orchestrator = build_orchestrator(&root, &config)?;
            let plan = orchestrator.plan(&SyncOptions::default()).await?;
            print!("{}", report::render_divergences(&plan.divergences));
        }

        Command::Cache {
            action: CacheAction::Clear,
        } => {
            let fs = NativeFs::new(root.clone());
            let store = page_sync_core::MetadataStore::new(&fs);
            if store.clear().await? {
                println!("Sync cache cleared");
            } else {
                println!("No sync cache to clear");
            }
        }
    }

    Ok(())
}
