//! # Tabular Uplink CLI (`uplink`)
//!
//! ## Usage
//!
//! ```bash
//! uplink --config ./config/uplink.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `uplink init` | Create the SQLite database and storage root |
//! | `uplink login --token <t>` | Store the collector login token |
//! | `uplink add ...` | Register a file-mode or server-mode project |
//! | `uplink list` | One line per project |
//! | `uplink show <id>` | Project details and chunk counts |
//! | `uplink validate <id>...` | Validate and split into chunks |
//! | `uplink upload <id>...` | Upload chunks and reconcile |
//! | `uplink serve <id>...` | Drain inbox folders continuously |
//!
//! ## Examples
//!
//! ```bash
//! uplink init
//! uplink login --token "$UPLINK_LOGIN_TOKEN"
//! uplink add --name sales --path ./sales.csv --spec number,text,timestamp --token p-123
//! uplink validate 1
//! uplink upload 1
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tabular_uplink::commands::{self, AddArgs, TaskKind};
use tabular_uplink::config;
use tabular_uplink::progress::ProgressMode;
use tabular_uplink::status;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tabular Uplink: validate, chunk, and upload tabular data.
#[derive(Parser)]
#[command(name = "uplink", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/uplink.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off`
    /// otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and storage root.
    ///
    /// Idempotent: running it again is safe.
    Init,

    /// Store the login token sent with every collector request.
    Login {
        #[arg(long)]
        token: String,
    },

    /// Register a project.
    ///
    /// Give `--path` for a delimited file or `--inbox` for a folder that an
    /// external listener fills with JSON row batches.
    Add {
        #[arg(long)]
        name: String,

        /// Delimited source file.
        #[arg(long, conflicts_with = "inbox", required_unless_present = "inbox")]
        path: Option<PathBuf>,

        /// Inbox folder (server mode).
        #[arg(long)]
        inbox: Option<PathBuf>,

        #[arg(long, default_value = ",")]
        delimiter: char,

        /// Column types, comma separated: `number`, `text`, `timestamp`.
        #[arg(long)]
        spec: String,

        /// Project token issued by the collector.
        #[arg(long)]
        token: String,
    },

    /// List projects.
    List,

    /// Show one project.
    Show { id: i64 },

    /// Validate projects and split them into chunks, restarting from scratch.
    Validate {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Upload chunks and reconcile with the collector.
    Upload {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Drain server-mode inboxes until interrupted.
    Serve {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabular_uplink=info,uplink_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Login { token } => commands::run_login(&cfg, &token).await?,
        Commands::Add {
            name,
            path,
            inbox,
            delimiter,
            spec,
            token,
        } => {
            commands::run_add(
                &cfg,
                AddArgs {
                    name,
                    path,
                    inbox,
                    delimiter,
                    spec,
                    token,
                },
            )
            .await?;
        }
        Commands::List => {
            let store = commands::open_recovered(&cfg).await?;
            status::run_list(store.as_ref()).await?;
        }
        Commands::Show { id } => {
            let store = commands::open_recovered(&cfg).await?;
            status::run_show(store.as_ref(), id).await?;
        }
        Commands::Validate { ids } => {
            commands::run_tasks(&cfg, TaskKind::Validate, &ids, progress).await?
        }
        Commands::Upload { ids } => {
            commands::run_tasks(&cfg, TaskKind::Upload, &ids, progress).await?
        }
        Commands::Serve { ids } => {
            commands::run_tasks(&cfg, TaskKind::Serve, &ids, progress).await?
        }
    }

    Ok(())
}
