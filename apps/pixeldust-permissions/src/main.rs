//! Command-line management of stored site permissions.

use clap::Parser;
use clap::Subcommand;
use pd_browser::Browser;
use pd_browser::BrowserConfig;
use pd_core::BrowserError;
use pd_core::BrowserResult;
use pd_permissions::Decision;
use pd_permissions::MediaType;
use pd_permissions::PermissionKind;
use pd_permissions::PermissionTable;
use pd_permissions::RequestDetails;
use pd_permissions::Site;
use pd_storage::StorageConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pixeldust-permissions")]
#[command(version, about = "Inspect and edit PixelDust site permissions", long_about = None)]
struct Cli {
    /// Storage root (defaults to $PIXELDUST_STORAGE_DIR, then ./.pixeldust)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List stored decisions
    #[command(alias = "ls")]
    List {
        /// Only sites containing this text
        #[arg(long)]
        search: Option<String>,
    },

    /// Show the stored decision for one site and permission
    Get { site: String, kind: PermissionKind },

    /// Store a decision
    Set {
        site: String,
        kind: PermissionKind,
        decision: Decision,
    },

    /// Remove one decision, every decision for a site, or everything
    Clear {
        #[arg(long)]
        site: Option<String>,
        #[arg(long, requires = "site")]
        kind: Option<PermissionKind>,
    },

    /// Silently check a capability the way feature detection would
    Check {
        origin: String,
        capability: String,
        /// Track types for `media` requests (video, audio)
        #[arg(long, value_delimiter = ',')]
        media: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> BrowserResult<()> {
    let mut config = BrowserConfig::default();
    if let Some(root) = cli.storage_dir {
        config.storage = StorageConfig::persistent(root);
    }
    let browser = Browser::new(config)?;
    let permissions = browser.permissions();

    match cli.command {
        Commands::List { search } => {
            let table = match search.as_deref() {
                Some(term) => permissions.search_decisions(term)?,
                None => permissions.all_decisions()?,
            };
            for line in render_table(&table) {
                println!("{line}");
            }
        }
        Commands::Get { site, kind } => {
            let decision = permissions.decision(&parse_site(&site)?, kind)?;
            println!("{}", decision.map_or("unset", Decision::as_str));
        }
        Commands::Set {
            site,
            kind,
            decision,
        } => {
            let site = parse_site(&site)?;
            permissions.set_decision(&site, kind, decision, true)?;
            tracing::info!(%site, %kind, %decision, "stored permission decision");
        }
        Commands::Clear { site, kind } => {
            let removed = match (site.as_deref(), kind) {
                (Some(site), Some(kind)) => permissions.clear_decision(&parse_site(site)?, kind)?,
                (Some(site), None) => permissions.clear_site(&parse_site(site)?)?,
                (None, _) => {
                    permissions.clear_all()?;
                    true
                }
            };
            if !removed {
                println!("nothing to clear");
            }
        }
        Commands::Check {
            origin,
            capability,
            media,
        } => {
            let details = check_details(&origin, &media)?;
            let decision = browser.on_permission_check(&capability, Some(&origin), details);
            println!("{decision}");
        }
    }

    Ok(())
}

/// Accepts either a bare host (`example.com`) or an origin (`https://example.com:8443`).
fn parse_site(value: &str) -> BrowserResult<Site> {
    if value.contains("://") {
        Site::from_origin(value)
    } else {
        Site::new(value)
    }
}

fn check_details(origin: &str, media: &[String]) -> BrowserResult<RequestDetails> {
    let media_types = media
        .iter()
        .map(|name| {
            MediaType::from_name(name).ok_or_else(|| {
                BrowserError::new(
                    "cli.media_type_unknown",
                    format!("unknown media type `{name}` (expected video or audio)"),
                )
            })
        })
        .collect::<BrowserResult<Vec<_>>>()?;
    Ok(RequestDetails::main_frame(origin).with_media_types(media_types))
}

fn render_table(table: &PermissionTable) -> Vec<String> {
    table
        .iter()
        .flat_map(|(site, kinds)| {
            kinds.iter().map(move |(kind, decision)| {
                format!("{:<32} {:<16} {decision}", site.as_str(), kind.display_name())
            })
        })
        .collect()
}
