use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sc_cli::commands::report::OutputFormat;
use sc_cli::commands::util::{DatabaseLock, resolve_now, resolve_user};
use sc_cli::commands::{report, shift, sites, status};
use sc_cli::{Cli, Commands, Config, SitesAction};
use sc_core::{Coordinate, ShiftId, SiteId};

/// Open the database, ensuring the parent directory exists.
fn open_database(config: &Config) -> Result<sc_db::Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    sc_db::Database::open(&config.database_path).with_context(|| {
        format!(
            "failed to open database {}",
            config.database_path.display()
        )
    })
}

#[expect(
    clippy::too_many_lines,
    reason = "CLI command dispatch is inherently verbose"
)]
fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let mut stdout = std::io::stdout().lock();
    let user_flag = cli.user.as_deref();

    match command {
        Commands::Sites(action) => {
            let _lock = DatabaseLock::acquire(&config.database_path)?;
            let mut db = open_database(&config)?;
            match action {
                SitesAction::List { lat, lon, json } => {
                    let position = lat.zip(*lon).map(|(lat, lon)| Coordinate::new(lat, lon));
                    sites::list(&mut stdout, &db, position, *json)?;
                }
                SitesAction::Add {
                    id,
                    name,
                    tenant,
                    lat,
                    lon,
                    radius,
                } => {
                    sites::add(
                        &mut stdout,
                        &mut db,
                        id,
                        tenant,
                        name,
                        Coordinate::new(*lat, *lon),
                        *radius,
                    )?;
                }
                SitesAction::Deactivate { id } => sites::deactivate(&mut stdout, &mut db, id)?,
            }
        }
        Commands::Start { site, location, at } => {
            let user = resolve_user(user_flag, &config)?;
            let site_id = SiteId::new(site.as_str())?;
            let shift_id = ShiftId::new(Uuid::new_v4().to_string())?;
            let _lock = DatabaseLock::acquire(&config.database_path)?;
            let now = resolve_now(at.as_deref())?;
            let mut db = open_database(&config)?;
            shift::start(
                &mut stdout,
                &mut db,
                &user,
                &site_id,
                (*location).into(),
                now,
                shift_id,
            )?;
        }
        Commands::Pause {
            location,
            at,
            shift: shift_id,
        } => {
            let user = resolve_user(user_flag, &config)?;
            let _lock = DatabaseLock::acquire(&config.database_path)?;
            let now = resolve_now(at.as_deref())?;
            let mut db = open_database(&config)?;
            shift::pause(
                &mut stdout,
                &mut db,
                &user,
                shift_id.as_deref(),
                (*location).into(),
                now,
            )?;
        }
        Commands::Resume {
            location,
            at,
            shift: shift_id,
        } => {
            let user = resolve_user(user_flag, &config)?;
            let _lock = DatabaseLock::acquire(&config.database_path)?;
            let now = resolve_now(at.as_deref())?;
            let mut db = open_database(&config)?;
            shift::resume(
                &mut stdout,
                &mut db,
                &user,
                shift_id.as_deref(),
                (*location).into(),
                now,
            )?;
        }
        Commands::End {
            location,
            at,
            shift: shift_id,
        } => {
            let user = resolve_user(user_flag, &config)?;
            let _lock = DatabaseLock::acquire(&config.database_path)?;
            let now = resolve_now(at.as_deref())?;
            let mut db = open_database(&config)?;
            shift::end(
                &mut stdout,
                &mut db,
                &user,
                shift_id.as_deref(),
                (*location).into(),
                now,
            )?;
        }
        Commands::Status { at } => {
            let user = resolve_user(user_flag, &config)?;
            let now = resolve_now(at.as_deref())?;
            let db = open_database(&config)?;
            status::run(&mut stdout, &db, &user, now)?;
        }
        Commands::Report { json, csv, at } => {
            let user = resolve_user(user_flag, &config)?;
            let now = resolve_now(at.as_deref())?;
            let db = open_database(&config)?;
            let format = if *json {
                OutputFormat::Json
            } else if *csv {
                OutputFormat::Csv
            } else {
                OutputFormat::Table
            };
            report::run(&mut stdout, &db, &user, now, format)?;
        }
    }

    Ok(())
}
