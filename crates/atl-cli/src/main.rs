use anyhow::Result;
use atl_schemas::Role;
use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(name = "atl")]
#[command(about = "Atelier back-office CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site overrides)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fail when the merged config carries keys nothing reads.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Run the scheduled sweep (reminders, delay and non-conformity penalties)
    Sweep {
        /// Run a single pass and exit.
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Notification outbox commands
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },

    /// Staff accounts
    User {
        #[command(subcommand)]
        cmd: UserCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum OutboxCmd {
    /// Deliver every due notification, then exit.
    Drain {
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum UserCmd {
    /// Insert a staff member directly (bootstraps the first ADMIN).
    Add {
        #[arg(long)]
        email: String,

        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,

        #[arg(long, value_enum, default_value_t = RoleArg::Employee)]
        role: RoleArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Admin,
    Employee,
    Controlleur,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Admin => Role::Admin,
            RoleArg::Employee => Role::Employee,
            RoleArg::Controlleur => Role::Controlleur,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = atl_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = atl_db::status(&pool).await?;
                    println!("db_ok={} has_commandes_table={}", s.ok, s.has_commandes_table);
                }
                DbCmd::Migrate => {
                    atl_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths, strict } => {
            commands::config_hash(&paths, strict)?;
        }

        Commands::Sweep { once, config_paths } => {
            let config = commands::load_settings(&config_paths)?;
            commands::jobs::sweep(&config, once).await?;
        }

        Commands::Outbox { cmd } => match cmd {
            OutboxCmd::Drain { config_paths } => {
                let config = commands::load_settings(&config_paths)?;
                commands::jobs::drain_outbox(&config).await?;
            }
        },

        Commands::User { cmd } => match cmd {
            UserCmd::Add {
                email,
                first_name,
                last_name,
                role,
            } => {
                commands::users::add(&email, &first_name, &last_name, role.into()).await?;
            }
        },
    }

    Ok(())
}
