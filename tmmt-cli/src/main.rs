//! tmmt - module management CLI
//!
//! Installs and upgrades a module's database schema from a package directory
//! (or archive), grants its roles, and fetches published versions.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process;
use tmmt::migration::{ManifestLoader, ParameterValues, UpgradeStatus, Upgrader, Version};
use tmmt::package::{PackagePrepareTask, PrepareEvent, PreparedPackage};
use tmmt::registry::{GithubClient, ModuleVersion, ModulesRegistry};
use tmmt::{connect, connect_service, pg_service, PgClientExecutor, TmmtConfig};

#[derive(Parser)]
#[command(name = "tmmt")]
#[command(about = "Install and upgrade database modules")]
#[command(version)]
struct Cli {
    /// Connection profile from pg_service.conf (default: $PGSERVICE)
    #[arg(long, conflicts_with = "database_url")]
    service: Option<String>,

    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Package directory, or a .tar.gz / .zip archive holding the module manifest
    #[arg(long, default_value = ".")]
    package: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the installed version and pending changesets
    Status,

    /// Install the module into a database that does not have it yet
    Install {
        /// Stop at this version (default: latest)
        #[arg(long)]
        target: Option<Version>,

        /// Parameter value, NAME=VALUE (repeatable)
        #[arg(short = 'p', long = "parameter", value_name = "NAME=VALUE")]
        parameters: Vec<String>,

        /// Create and grant the module roles afterwards
        #[arg(long)]
        roles: bool,
    },

    /// Apply pending changesets to an installed module
    Upgrade {
        /// Stop at this version (default: latest)
        #[arg(long)]
        target: Option<Version>,

        /// Parameter value, NAME=VALUE (repeatable); recorded values are reused otherwise
        #[arg(short = 'p', long = "parameter", value_name = "NAME=VALUE")]
        parameters: Vec<String>,

        /// Show what would be applied without touching the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Create the module roles and grant their permissions
    Roles,

    /// List published versions of a registered module
    Versions {
        module: String,

        /// Branches and open pull requests instead of releases
        #[arg(long)]
        development: bool,
    },

    /// Download and extract a module version, printing the package directory
    Fetch {
        module: String,

        /// Version name (default: latest release)
        #[arg(long)]
        version: Option<String>,

        /// Parent directory of the extracted package
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// List the profiles of pg_service.conf
    Services,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => {
            if !cli.quiet {
                println!("{}", "✅ Success".green());
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{} {e:#}", "❌ Error:".red());
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let settings = TmmtConfig::load().context("loading tool configuration")?;

    match &cli.command {
        Commands::Status => {
            let (upgrader, _package) = load_upgrader(cli, &settings, ParameterValues::new())?;
            let executor = executor(cli)?;
            print_status(&upgrader.status(&executor)?);
        }
        Commands::Install {
            target,
            parameters,
            roles,
        } => {
            let (upgrader, _package) = load_upgrader(cli, &settings, parse_parameters(parameters)?)?;
            let executor = executor(cli)?;
            let report = upgrader.install(&executor, *target)?;
            println!(
                "📦 Installed {} at version {}",
                report.module.bold(),
                report
                    .version()
                    .map_or_else(|| "-".to_string(), |v| v.to_string())
            );
            if *roles {
                upgrader.create_and_grant_roles(&executor)?;
            }
        }
        Commands::Upgrade {
            target,
            parameters,
            dry_run,
        } => {
            let (upgrader, _package) = load_upgrader(cli, &settings, parse_parameters(parameters)?)?;
            let executor = executor(cli)?;
            if *dry_run {
                let status = upgrader.status(&executor)?;
                if !status.is_installed() {
                    bail!("module {} is not installed", status.module);
                }
                let pending: Vec<_> = status
                    .pending
                    .iter()
                    .filter(|p| target.map_or(true, |t| p.version <= t))
                    .collect();
                if pending.is_empty() {
                    println!("No pending changesets");
                }
                for (i, p) in pending.iter().enumerate() {
                    println!("  {}. {} ({} file(s))", i + 1, p.version, p.files.len());
                }
                return Ok(());
            }
            let report = upgrader.upgrade(&executor, *target)?;
            if report.is_noop() {
                println!("Module {} is up to date", report.module.bold());
            } else {
                for version in &report.applied {
                    println!("  ✓ {version}");
                }
            }
        }
        Commands::Roles => {
            let (upgrader, _package) = load_upgrader(cli, &settings, ParameterValues::new())?;
            let executor = executor(cli)?;
            let report = upgrader.create_and_grant_roles(&executor)?;
            for role in &report.created {
                println!("  + {role}");
            }
            for (role, schema) in &report.skipped {
                println!("  {} {role}: schema {schema} does not exist yet", "!".yellow());
            }
        }
        Commands::Versions {
            module,
            development,
        } => {
            let client = GithubClient::new(&settings)?;
            let module = ModulesRegistry::teksi().get(module)?;
            let snapshot = if *development {
                module.load_development_versions(&client)?
            } else {
                module.load_versions(&client)?
            };
            let latest = snapshot.latest().map(ModuleVersion::name);
            for version in snapshot.versions() {
                let created = version
                    .created_at()
                    .map(|c| c.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                if Some(version.name()) == latest {
                    println!("  {} {created} {}", version.display_name().green(), "(latest)".green());
                } else {
                    println!("  {} {created}", version.display_name());
                }
            }
        }
        Commands::Fetch {
            module,
            version,
            dest,
        } => {
            let client = GithubClient::new(&settings)?;
            let module = ModulesRegistry::teksi().get(module)?;
            let snapshot = module.load_versions(&client)?;
            let chosen = match version {
                Some(name) => snapshot
                    .find(name)
                    .cloned()
                    .ok_or_else(|| anyhow!("module {} has no version {name}", module.name()))?,
                None => snapshot
                    .latest()
                    .cloned()
                    .ok_or_else(|| anyhow!("module {} has no release yet", module.name()))?,
            };
            let parent = dest
                .clone()
                .or_else(|| settings.work_dir.clone())
                .unwrap_or_else(std::env::temp_dir);
            let task = PackagePrepareTask::from_version(chosen, client.http().clone(), &parent);
            let prepared = follow(task)?;
            let package_dir = prepared.package_dir.clone();
            prepared.workdir.persist();
            println!("{}", package_dir.display());
        }
        Commands::Services => {
            for name in pg_service::service_names()? {
                println!("  {name}");
            }
        }
    }
    Ok(())
}

fn parse_parameters(assignments: &[String]) -> Result<ParameterValues> {
    Ok(ParameterValues::parse_assignments(
        assignments.iter().map(String::as_str),
    )?)
}

/// Load the manifest, preparing the package first when given an archive
///
/// The prepared package is returned so its directory outlives the run.
fn load_upgrader(
    cli: &Cli,
    settings: &TmmtConfig,
    parameters: ParameterValues,
) -> Result<(Upgrader, Option<PreparedPackage>)> {
    let (package_dir, prepared) = if cli.package.is_file() {
        let parent = settings.work_dir.clone().unwrap_or_else(std::env::temp_dir);
        let prepared = follow(PackagePrepareTask::from_archive(&cli.package, &parent))?;
        (prepared.package_dir.clone(), Some(prepared))
    } else {
        (cli.package.clone(), None)
    };

    let config = ManifestLoader::load(&package_dir)
        .with_context(|| format!("loading manifest from {}", package_dir.display()))?;
    Ok((Upgrader::from_settings(config, parameters, settings), prepared))
}

fn executor(cli: &Cli) -> Result<PgClientExecutor> {
    let client = match (&cli.service, database_url(cli)) {
        (Some(service), _) => connect_service(service)?,
        (None, Some(url)) => connect(&url)?,
        (None, None) => match std::env::var("PGSERVICE") {
            Ok(service) => connect_service(&service)?,
            Err(_) => bail!(
                "no database given: use --service or --database-url, or set TMMT_DATABASE_URL, DATABASE_URL or PGSERVICE"
            ),
        },
    };
    Ok(PgClientExecutor::new(client))
}

fn database_url(cli: &Cli) -> Option<String> {
    cli.database_url
        .clone()
        .or_else(|| std::env::var("TMMT_DATABASE_URL").ok())
        .or_else(|| std::env::var("DATABASE_URL").ok())
}

/// Wait for a preparation task, echoing its progress
fn follow(task: PackagePrepareTask) -> Result<PreparedPackage> {
    let mut last_percent = None;
    for event in task.events().iter() {
        match event {
            PrepareEvent::Progress(fraction) => {
                let percent = (fraction * 100.0) as u32;
                if last_percent != Some(percent) && percent % 10 == 0 {
                    log::info!("downloaded {percent}%");
                    last_percent = Some(percent);
                }
            }
            PrepareEvent::Extracting => log::info!("extracting"),
        }
    }
    Ok(task.wait()?)
}

fn print_status(status: &UpgradeStatus) {
    println!("\n📊 Module {}\n", status.module.bold());

    match &status.baseline {
        Some(baseline) => println!(
            "✅ Installed: {} ({})",
            baseline.version,
            baseline.applied_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("✅ Installed: {}", "not installed".yellow()),
    }
    if let Some(latest) = status.latest {
        println!("📦 Package provides up to {latest}");
    }

    println!();
    if status.pending.is_empty() {
        println!("⏳ Pending changesets: None");
    } else {
        println!("⏳ Pending changesets ({}):", status.pending.len());
        if let Some(next) = status.next_pending_version() {
            println!("  next: {}", next.to_string().bold());
        }
        for pending in &status.pending {
            println!("  ⏳ {}", pending.version);
        }
    }
}
