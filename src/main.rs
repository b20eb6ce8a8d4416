// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use libvault::db::SqliteStorage;
use libvault::import::PackageImporter;
use libvault::library::DependencyKinds;
use libvault::lock::FileLockProvider;
use libvault::storage::{FileSystemStorage, LibraryStorage};
use libvault::{
    DependencyResolver, InstallAction, InstallCoordinator, LibraryIdentity, LibraryRepository,
    RepositoryConfig, ResolveOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Storage backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// One directory per library under the store
    Fs,
    /// Single SQLite database in the store
    Sqlite,
}

#[derive(Parser)]
#[command(name = "libvault")]
#[command(author, version, about = "Versioned content library repository with safe concurrent installs", long_about = None)]
struct Cli {
    /// Repository directory
    #[arg(short, long, global = true, env = "LIBVAULT_STORE", default_value = "/var/lib/libvault")]
    store: PathBuf,

    /// Storage backend
    #[arg(short, long, global = true, env = "LIBVAULT_BACKEND", value_enum, default_value_t = Backend::Fs)]
    backend: Backend,

    /// Seconds to wait for a library's install lock
    #[arg(long, global = true, env = "LIBVAULT_LOCK_TIMEOUT")]
    lock_timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an empty repository
    Init,
    /// Install the libraries of an extracted package directory
    Install {
        /// Directory holding one sub-directory per library
        package_dir: PathBuf,
        /// Additional allowed file extensions
        #[arg(long = "allow-extension", value_name = "EXT")]
        allow_extensions: Vec<String>,
        /// Do not require directories to be named after their library
        #[arg(long)]
        no_directory_check: bool,
    },
    /// List installed libraries
    List {
        /// Only versions of this machine name
        machine_name: Option<String>,
    },
    /// List the files of an installed library
    Files {
        /// Library, e.g. H5P.Question-1.5
        library: String,
    },
    /// Show a library and everything it depends on
    Depends {
        /// Library, e.g. H5P.Question-1.5
        library: String,
        /// Follow editor dependencies
        #[arg(long)]
        editor: bool,
        /// Follow dynamic dependencies
        #[arg(long)]
        dynamic: bool,
    },
    /// Remove an installed library
    Remove {
        /// Library, e.g. H5P.Question-1.5
        library: String,
    },
    /// Check stored file hashes (sqlite backend only)
    Verify {
        /// Library, e.g. H5P.Question-1.5
        library: String,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn database_path(store: &Path) -> PathBuf {
    store.join("libvault.db")
}

async fn open_storage(store: &Path, backend: Backend) -> Result<Arc<dyn LibraryStorage>> {
    let storage: Arc<dyn LibraryStorage> = match backend {
        Backend::Fs => Arc::new(FileSystemStorage::open(store).await?),
        Backend::Sqlite => Arc::new(open_sqlite(store)?),
    };
    Ok(storage)
}

fn open_sqlite(store: &Path) -> Result<SqliteStorage> {
    let db_path = database_path(store);
    let db_path = db_path
        .to_str()
        .with_context(|| format!("Non UTF-8 database path: {}", db_path.display()))?;
    Ok(SqliteStorage::open(db_path)?)
}

async fn open_coordinator(
    store: &Path,
    backend: Backend,
    config: &RepositoryConfig,
) -> Result<InstallCoordinator> {
    let storage = open_storage(store, backend).await?;
    let locks = FileLockProvider::new(
        store.join(".locks"),
        config.lock_acquisition_timeout,
        config.lock_poll_interval,
    )
    .await?;
    Ok(InstallCoordinator::new(
        storage,
        Arc::new(locks),
        config.lock_max_occupation,
    ))
}

fn parse_library(text: &str, config: &RepositoryConfig) -> Result<LibraryIdentity> {
    Ok(LibraryIdentity::parse(text, config.separator_policy)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = RepositoryConfig::default();
    if let Some(secs) = cli.lock_timeout {
        config.lock_acquisition_timeout = Duration::from_secs(secs);
    }

    match cli.command {
        Some(Commands::Init) => {
            info!("Initializing repository at: {}", cli.store.display());
            match cli.backend {
                Backend::Fs => {
                    FileSystemStorage::open(&cli.store).await?;
                }
                Backend::Sqlite => {
                    let db_path = database_path(&cli.store);
                    libvault::db::init(&db_path.to_string_lossy())?;
                }
            }
            println!("Repository initialized at: {}", cli.store.display());
            Ok(())
        }
        Some(Commands::Install {
            package_dir,
            allow_extensions,
            no_directory_check,
        }) => {
            config = config.allow_extensions(allow_extensions);
            config.check_directory_names = !no_directory_check;

            let coordinator = open_coordinator(&cli.store, cli.backend, &config).await?;
            let importer = PackageImporter::new(coordinator, &config);
            let report = importer
                .import(&package_dir)
                .await
                .with_context(|| format!("Failed to import {}", package_dir.display()))?;

            for install in &report.installed {
                match install.action {
                    InstallAction::Installed => println!(
                        "Installed {} (patch {}, {} files)",
                        install.library, install.patch_version, install.files_written
                    ),
                    InstallAction::Upgraded { previous_patch } => println!(
                        "Upgraded {} patch {} -> {} ({} files, {} removed)",
                        install.library,
                        previous_patch,
                        install.patch_version,
                        install.files_written,
                        install.stale_files_removed.len()
                    ),
                    InstallAction::Skipped { installed_patch } => println!(
                        "Skipped {} (patch {} already installed)",
                        install.library, installed_patch
                    ),
                }
            }
            for identity in &report.up_to_date {
                println!("Up to date: {}", identity);
            }
            Ok(())
        }
        Some(Commands::List { machine_name }) => {
            let repository = LibraryRepository::new(open_storage(&cli.store, cli.backend).await?);
            let libraries = repository.list_installed(machine_name.as_deref()).await?;

            if libraries.is_empty() {
                println!("No libraries installed.");
            } else {
                println!("Installed libraries:");
                for library in &libraries {
                    println!(
                        "  {} {}{}",
                        library.machine_name(),
                        library.version(),
                        if library.runnable { " (runnable)" } else { "" }
                    );
                    println!("    {}", library.title);
                }
                println!("\nTotal: {} library(s)", libraries.len());
            }
            Ok(())
        }
        Some(Commands::Files { library }) => {
            let identity = parse_library(&library, &config)?;
            let repository = LibraryRepository::new(open_storage(&cli.store, cli.backend).await?);
            if !repository.exists(&identity).await? {
                return Err(anyhow::anyhow!("Library {} is not installed", identity));
            }
            for path in repository.list_files(&identity).await? {
                println!("{}", path);
            }
            let languages = repository.list_languages(&identity).await?;
            if !languages.is_empty() {
                println!("\nLanguages: {}", languages.join(", "));
            }
            Ok(())
        }
        Some(Commands::Depends {
            library,
            editor,
            dynamic,
        }) => {
            let identity = parse_library(&library, &config)?;
            let repository = LibraryRepository::new(open_storage(&cli.store, cli.backend).await?);
            let resolver = DependencyResolver::new(repository);
            let options = ResolveOptions::with_kinds(DependencyKinds {
                preloaded: true,
                editor,
                dynamic,
            });

            let resolved = resolver.resolve(&[identity], &options).await?;
            for library in &resolved {
                println!("{} (patch {})", library.identity, library.patch_version);
            }
            Ok(())
        }
        Some(Commands::Remove { library }) => {
            let identity = parse_library(&library, &config)?;
            let coordinator = open_coordinator(&cli.store, cli.backend, &config).await?;

            let dependents = coordinator
                .repository()
                .dependents(&identity, DependencyKinds::ALL)
                .await?;
            if !dependents.is_empty() {
                let names: Vec<String> = dependents.iter().map(|d| d.identity.to_string()).collect();
                return Err(anyhow::anyhow!(
                    "Cannot remove {}: required by {}",
                    identity,
                    names.join(", ")
                ));
            }

            if coordinator.remove(&identity).await? {
                println!("Removed library: {}", identity);
            } else {
                println!("Library {} is not installed", identity);
            }
            Ok(())
        }
        Some(Commands::Verify { library }) => {
            if cli.backend != Backend::Sqlite {
                return Err(anyhow::anyhow!("verify requires the sqlite backend"));
            }
            let identity = parse_library(&library, &config)?;
            let storage = open_sqlite(&cli.store)?;
            let corrupted = storage.verify(&identity.library_key()).await?;

            if corrupted.is_empty() {
                println!("{}: all files intact", identity);
                Ok(())
            } else {
                for path in &corrupted {
                    println!("  corrupted: {}", path);
                }
                Err(anyhow::anyhow!(
                    "{} file(s) of {} failed verification",
                    corrupted.len(),
                    identity
                ))
            }
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "libvault", &mut std::io::stdout());
            Ok(())
        }
        None => {
            println!("Libvault Library Repository v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'libvault --help' for usage information");
            Ok(())
        }
    }
}
