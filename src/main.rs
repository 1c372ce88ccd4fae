use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use eks::auth::PasswordHasher;
use eks::config::{DEFAULT_INGEST_PASSWORD, EksConfig, LogConfig};
use eks::ingest::{IngestService, fix_encoding};
use eks::store::{self, GraphStore};
use eks::users::model::{OrganizationType, Role};
use eks::users::{CreateUser, UserService};

#[derive(Parser)]
#[command(name = "eks", version, about = "Enterprise Knowledge System")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Apply pending schema migrations
    Migrate,
    /// Print node and relationship counts
    Status,
    /// Create the administrator account if it does not exist
    SeedAdmin {
        #[arg(long, env = "SEED_ADMIN_EMAIL")]
        email: String,
        #[arg(long, env = "SEED_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "Administrador")]
        name: String,
        #[arg(long, default_value = "cocreate")]
        organization_type: OrganizationType,
        #[arg(long, default_value = "CoCreateAI")]
        company: String,
    },
    /// Create a single user
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "EKS_NEW_USER_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        admin: bool,
        #[arg(long, default_value = "cvc")]
        organization_type: OrganizationType,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        job_title: Option<String>,
        /// Require a password change on first login
        #[arg(long)]
        force_password_change: bool,
    },
    /// Reset passwords for the given emails and force a change on next login
    ResetPasswords {
        #[arg(required = true)]
        emails: Vec<String>,
        #[arg(long, default_value = DEFAULT_INGEST_PASSWORD, hide_default_value = true)]
        password: String,
        /// Reset the accounts that exist even when some emails are unknown
        #[arg(long)]
        allow_partial: bool,
    },
    /// Ingest an org-chart roster CSV
    Ingest { path: PathBuf },
    /// Rewrite a roster CSV as UTF-8 with mojibake repaired
    FixEncoding {
        input: PathBuf,
        output: Option<PathBuf>,
    },
    /// Link every organization to the departments its members belong to
    LinkDepartments,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EksConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_tracing(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Console logging always; a daily-rolling file as well when `LOG_DIR` is set.
fn init_tracing(log: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "eks.log"));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn open_store(config: &EksConfig) -> anyhow::Result<Arc<dyn GraphStore>> {
    store::connect(&config.store)
        .await
        .with_context(|| format!("opening store {}", config.store_label()))
}

async fn run(command: Command, config: EksConfig) -> anyhow::Result<()> {
    // fix-encoding is file-only and needs no store.
    if let Command::FixEncoding { input, output } = &command {
        let output = output.clone().unwrap_or_else(|| corrected_path(input));
        let decoded = fix_encoding(input, &output).await?;
        eprintln!(
            "Wrote {} ({:?}, {} repairs)",
            output.display(),
            decoded.encoding,
            decoded.repairs
        );
        return Ok(());
    }

    let store = open_store(&config).await?;
    let hasher = PasswordHasher::new(config.auth.bcrypt_cost);

    match command {
        Command::Serve => {
            eprintln!("EKS v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("   Store: {}", config.store_label());
            eprintln!(
                "   API:   http://{}:{}",
                config.server.host, config.server.port
            );
            eprintln!("   CORS:  {}", config.server.cors_origin);
            if config.bootstrap.enabled {
                eprintln!("   Bootstrap admin: {}", config.bootstrap.email);
            }
            eks::server::serve(&config, store).await?;
        }
        Command::Migrate => {
            let applied = store.run_migrations().await?;
            for migration in &applied {
                eprintln!("   applied v{} {}", migration.version, migration.name);
            }
            eprintln!(
                "Schema at version {} ({} newly applied)",
                store.schema_version().await?,
                applied.len()
            );
        }
        Command::Status => {
            let counts = store.graph_counts().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            if counts.is_empty() {
                eprintln!("Graph is empty; run `eks ingest <file.csv>` first");
            }
        }
        Command::SeedAdmin {
            email,
            password,
            name,
            organization_type,
            company,
        } => {
            let users = UserService::new(store, hasher);
            let (user, created) = users
                .seed_admin(&email, &name, &password, organization_type, &company)
                .await?;
            if created {
                eprintln!("Created admin {} ({})", user.email, user.id);
            } else {
                eprintln!("Admin {} already exists; organization link ensured", user.email);
            }
        }
        Command::CreateUser {
            email,
            name,
            password,
            admin,
            organization_type,
            company,
            department,
            job_title,
            force_password_change,
        } => {
            let users = UserService::new(store, hasher);
            let user = users
                .create(CreateUser {
                    name,
                    email,
                    password,
                    role: if admin { Role::Admin } else { Role::User },
                    organization_type,
                    company,
                    department,
                    job_title,
                    force_password_change,
                })
                .await?;
            eprintln!("Created {} {} ({})", user.role, user.email, user.id);
        }
        Command::ResetPasswords {
            emails,
            password,
            allow_partial,
        } => {
            if password == DEFAULT_INGEST_PASSWORD {
                tracing::warn!("Resetting to the built-in default password; pass --password to choose one");
            }
            let users = UserService::new(store, hasher);
            let report = users
                .reset_passwords(&emails, &password, allow_partial)
                .await?;
            for email in &report.reset {
                eprintln!("   reset    {email}");
            }
            for email in &report.missing {
                eprintln!("   missing  {email}");
            }
            eprintln!(
                "{} reset, {} not found",
                report.reset.len(),
                report.missing.len()
            );
        }
        Command::Ingest { path } => {
            let ingest = IngestService::new(store, hasher, &config.ingest);
            let report = ingest
                .ingest_file(&path)
                .await
                .with_context(|| format!("ingesting {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&report.summary)?);
        }
        Command::LinkDepartments => {
            let linked = store.link_organization_departments().await?;
            eprintln!("{linked} organization-department links ensured");
        }
        Command::FixEncoding { .. } => {}
    }
    Ok(())
}

/// `roster.csv` becomes `roster_corrigido.csv` next to the input.
fn corrected_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "roster".into());
    input.with_file_name(format!("{stem}_corrigido.csv"))
}
