use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use depcat::catalog::{export, CatalogStore};
use depcat::config::Config;
use depcat::filter::{Filter, FilterConfig};
use depcat::git::SourceUpdateChecker;
use depcat::runner::{CommandRunner, SystemRunner};
use depcat::scanner::{self, ScannerEngine};
use depcat::sources::SourceRegistry;
use depcat::types::{Ecosystem, Package, Verification};
use depcat::updater::UpdateOrchestrator;
use depcat::{cache, Progress, ProgressSink};

#[derive(Parser)]
#[command(name = "depcat")]
#[command(about = "Catalog and update dependencies across all your projects", version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Filter by ecosystem (npm, bun, python, cpp)
    #[arg(short = 'e', long)]
    ecosystem: Option<String>,

    /// Filter by package name pattern (regex)
    #[arg(short = 'n', long)]
    name_pattern: Option<String>,

    /// Only packages known to be outdated
    #[arg(long)]
    outdated: bool,

    /// Filter by dependency kind (dev, prod)
    #[arg(short = 'k', long)]
    kind: Option<String>,

    /// Only packages of projects under this path
    #[arg(short = 'p', long)]
    project: Option<String>,
}

impl From<FilterArgs> for FilterConfig {
    fn from(args: FilterArgs) -> Self {
        FilterConfig {
            ecosystem: args.ecosystem,
            name_pattern: args.name_pattern,
            outdated_only: args.outdated,
            kind: args.kind,
            project_prefix: args.project,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Discover projects below a directory and record them
    Scan {
        /// Root to scan
        #[arg(default_value = ".")]
        root: String,

        /// Only look for one ecosystem
        #[arg(short = 'e', long)]
        ecosystem: Option<Ecosystem>,
    },

    /// Record exactly one directory as a project
    Add {
        path: String,

        #[arg(short = 'e', long)]
        ecosystem: Option<Ecosystem>,
    },

    /// Record globally installed npm, bun and pip packages
    Globals,

    /// List catalogued packages
    List {
        #[command(flatten)]
        filters: FilterArgs,

        /// Output format
        #[arg(short = 'o', long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Look up the latest version of catalogued packages
    Check {
        #[command(flatten)]
        filters: FilterArgs,

        /// Disable cache
        #[arg(long)]
        no_cache: bool,

        /// Output format
        #[arg(short = 'o', long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Update one package with its project's package manager
    Update {
        /// Project path, or a global scope such as ::global::npm
        project: String,
        name: String,

        /// Target version (default: latest)
        #[arg(long)]
        to: Option<String>,
    },

    /// Update every outdated package matching the filters, one at a time
    UpdateOutdated {
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Remove one package with its project's package manager
    Uninstall { project: String, name: String },

    /// Run the project's bulk update and rescan it
    UpdateProject { path: String },

    /// Compare a working copy with its upstream branch
    GitCheck { path: String },

    /// Fast-forward a working copy and rescan it
    GitPull { path: String },

    /// Forget a project (and, for groups, everything inside it)
    Remove { path: String },

    /// Forget one package record
    RemovePackage { project: String, name: String },

    /// Wipe the whole catalog
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Dump the catalog
    Export {
        #[arg(short = 'f', long, value_enum, default_value = "json")]
        format: ExportFormat,

        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Clear the registry response cache
    ClearCache,

    /// Generate example configuration file
    InitConfig {
        /// Path to write config file
        #[arg(default_value = ".depcat.toml")]
        path: String,

        /// Force overwrite existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Everything a command needs, built from the loaded config.
struct App {
    config: Config,
    catalog: CatalogStore,
    scanner: ScannerEngine,
    runner: Arc<dyn CommandRunner>,
}

impl App {
    fn open() -> Result<Self> {
        let config = Config::load_default()?;
        let catalog = CatalogStore::open(&config.global.catalog_path)
            .with_context(|| format!("Failed to open catalog {}", config.global.catalog_path.display()))?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let scanner = ScannerEngine::from_config(&config, runner.clone());
        Ok(Self {
            config,
            catalog,
            scanner,
            runner,
        })
    }

    fn orchestrator(&self) -> Result<UpdateOrchestrator> {
        let sources = SourceRegistry::from_config(&self.config)?;
        Ok(
            UpdateOrchestrator::new(self.catalog.clone(), self.scanner.clone(), sources, self.runner.clone())
                .with_python(self.config.global.python.clone()),
        )
    }

    fn source_checker(&self) -> SourceUpdateChecker {
        SourceUpdateChecker::new(self.catalog.clone(), self.scanner.clone(), self.runner.clone())
    }

    fn package(&self, project: &str, name: &str) -> Result<Package> {
        let key = project_key(project);
        self.catalog
            .get_package(&key, name)?
            .ok_or_else(|| anyhow::anyhow!("No package {} recorded for {}", name, key))
    }
}

/// Catalog key for a user-supplied project path. Sentinels pass through.
fn project_key(raw: &str) -> String {
    if Ecosystem::from_global_path(raw).is_some() {
        return raw.to_string();
    }
    scanner::absolute(Path::new(raw))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Print progress to stderr until every sink clone is dropped.
fn progress_printer() -> (ProgressSink, JoinHandle<()>) {
    let (sink, mut rx) = ProgressSink::channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Progress::Message(message) => eprintln!("{}", message.dimmed()),
                Progress::Item { current, total, name } => {
                    eprintln!("{} {}", format!("[{}/{}]", current, total).dimmed(), name)
                }
            }
        }
    });
    (sink, handle)
}

async fn finish(handle: JoinHandle<()>) {
    let _ = handle.await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "depcat=debug" } else { "depcat=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Scan { root, ecosystem } => run_scan(&root, ecosystem).await,
        Commands::Add { path, ecosystem } => run_add(&path, ecosystem).await,
        Commands::Globals => run_globals().await,
        Commands::List { filters, output } => run_list(filters.into(), output),
        Commands::Check { filters, no_cache, output } => run_check(filters.into(), no_cache, output).await,
        Commands::Update { project, name, to } => run_update(&project, &name, to.as_deref()).await,
        Commands::UpdateOutdated { filters } => run_update_outdated(filters.into()).await,
        Commands::Uninstall { project, name } => run_uninstall(&project, &name).await,
        Commands::UpdateProject { path } => run_update_project(&path).await,
        Commands::GitCheck { path } => run_git_check(&path).await,
        Commands::GitPull { path } => run_git_pull(&path).await,
        Commands::Remove { path } => run_remove(&path),
        Commands::RemovePackage { project, name } => run_remove_package(&project, &name),
        Commands::Clear { yes } => run_clear(yes),
        Commands::Export { format, out } => run_export(format, out.as_deref()),
        Commands::ClearCache => run_clear_cache(),
        Commands::InitConfig { path, force } => run_init_config(&path, force),
    }
}

fn print_apply(report: &depcat::catalog::ApplyReport) {
    println!(
        "Recorded {} projects and {} packages",
        report.projects.to_string().bold(),
        report.packages.to_string().bold()
    );
    if report.pruned > 0 {
        println!("Removed {} packages no longer declared", report.pruned);
    }
    for error in &report.errors {
        eprintln!("  {} {}", "✗".red(), error);
    }
}

async fn run_scan(root: &str, ecosystem: Option<Ecosystem>) -> Result<()> {
    let app = App::open()?;
    let (sink, handle) = progress_printer();
    let result = app.scanner.scan_directory(root, ecosystem, sink).await;
    finish(handle).await;
    let result = result?;

    println!(
        "Scanned {} in {:.1}s: {} projects, {} packages",
        root.cyan(),
        result.duration.as_secs_f64(),
        result.projects.len(),
        result.packages_found
    );
    print_apply(&app.catalog.apply_scan(&result)?);
    Ok(())
}

async fn run_add(path: &str, ecosystem: Option<Ecosystem>) -> Result<()> {
    let app = App::open()?;
    let (sink, handle) = progress_printer();
    let result = app.scanner.scan_single_project(path, ecosystem, sink).await;
    finish(handle).await;
    let result = result?;

    if result.is_empty() {
        println!("No recognizable manifest in {}", path.cyan());
        return Ok(());
    }
    print_apply(&app.catalog.apply_scan(&result)?);
    Ok(())
}

async fn run_globals() -> Result<()> {
    let app = App::open()?;
    let (sink, handle) = progress_printer();
    let result = app.scanner.scan_all_global_packages(sink).await;
    finish(handle).await;

    print_apply(&app.catalog.apply_scan(&result)?);
    Ok(())
}

fn select_packages(catalog: &CatalogStore, filter_config: FilterConfig) -> Result<Vec<Package>> {
    let filter = Filter::from_config(filter_config)?;
    let mut packages = filter.apply(catalog.get_all_packages()?);
    packages.sort_by(|a, b| (&a.project_path, &a.name).cmp(&(&b.project_path, &b.name)));
    Ok(packages)
}

fn run_list(filter_config: FilterConfig, output: Option<OutputFormat>) -> Result<()> {
    let app = App::open()?;
    let packages = select_packages(&app.catalog, filter_config)?;

    match output {
        Some(OutputFormat::Json) => println!("{}", serde_json::to_string_pretty(&packages)?),
        Some(OutputFormat::Yaml) => println!("{}", serde_yaml::to_string(&packages)?),
        Some(OutputFormat::Text) | None => {
            let names: BTreeMap<String, String> = app
                .catalog
                .get_all_projects()?
                .into_iter()
                .map(|p| (p.path.clone(), p.display_name()))
                .collect();

            let mut by_project: BTreeMap<&str, Vec<&Package>> = BTreeMap::new();
            for package in &packages {
                by_project.entry(&package.project_path).or_default().push(package);
            }

            println!(
                "\n{} packages in {} projects:\n",
                packages.len().to_string().bold(),
                by_project.len().to_string().bold()
            );
            for (project, project_packages) in by_project {
                let label = names.get(project).map(String::as_str).unwrap_or(project);
                println!("{} {}", label.cyan(), format!("({})", project).dimmed());
                for pkg in project_packages {
                    let mut line = format!("  └── {}: {}", pkg.name.green(), pkg.version.yellow());
                    if pkg.is_outdated {
                        if let Some(latest) = &pkg.latest_version {
                            line.push_str(&format!(" -> {}", latest.green()));
                        }
                    }
                    if pkg.not_found {
                        line.push_str(&format!(" [{}]", "not found".red()));
                    }
                    if pkg.is_dev {
                        line.push_str(&format!(" [{}]", "dev".magenta()));
                    }
                    println!("{}", line);
                }
            }
        }
    }
    Ok(())
}

async fn run_check(filter_config: FilterConfig, no_cache: bool, output: Option<OutputFormat>) -> Result<()> {
    let mut app = App::open()?;
    if no_cache {
        app.config.global.cache_enabled = false;
    }
    let packages = select_packages(&app.catalog, filter_config)?;
    if packages.is_empty() {
        match output {
            Some(OutputFormat::Json) | Some(OutputFormat::Yaml) => println!("[]"),
            _ => println!("No packages to check."),
        }
        return Ok(());
    }

    let orchestrator = app.orchestrator()?;
    let (sink, handle) = progress_printer();
    let checks = orchestrator.check_for_updates(&packages, &sink).await;
    drop(sink);
    finish(handle).await;

    let outdated: Vec<_> = checks.iter().filter(|c| c.is_outdated).collect();
    match output {
        Some(OutputFormat::Json) => println!("{}", serde_json::to_string_pretty(&outdated)?),
        Some(OutputFormat::Yaml) => println!("{}", serde_yaml::to_string(&outdated)?),
        Some(OutputFormat::Text) | None => {
            for check in &outdated {
                println!(
                    "  {}: {} -> {} {}",
                    check.package.name.cyan(),
                    check.package.version.yellow(),
                    check.latest_version.as_deref().unwrap_or("?").green(),
                    format!("({})", check.package.project_path).dimmed()
                );
            }
            let missing = checks.iter().filter(|c| c.not_found).count();
            if missing > 0 {
                println!("{} packages not found in their registry", missing.to_string().red());
            }
            if outdated.is_empty() {
                println!("\nAll packages are up to date!");
            } else {
                println!("\n{} updates available", outdated.len().to_string().bold());
            }
        }
    }
    Ok(())
}

async fn run_update(project: &str, name: &str, to: Option<&str>) -> Result<()> {
    let app = App::open()?;
    let package = app.package(project, name)?;
    let orchestrator = app.orchestrator()?;

    let (sink, handle) = progress_printer();
    let result = orchestrator.update_package(&package, to, &sink).await;
    drop(sink);
    finish(handle).await;

    if !result.success {
        anyhow::bail!(
            "Update of {} failed: {}",
            name,
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    let new_version = result.new_version.as_deref().unwrap_or("?");
    match result.verification {
        Verification::Verified => println!(
            "  {} {} {} -> {}",
            "✓".green(),
            name,
            result.old_version.yellow(),
            new_version.green()
        ),
        _ => println!(
            "  {} {} {} -> {} (not confirmed on disk)",
            "!".yellow(),
            name,
            result.old_version.yellow(),
            new_version.green()
        ),
    }
    Ok(())
}

async fn run_update_outdated(mut filter_config: FilterConfig) -> Result<()> {
    let app = App::open()?;
    filter_config.outdated_only = true;
    let packages = select_packages(&app.catalog, filter_config)?;
    if packages.is_empty() {
        println!("Nothing outdated. Run `depcat check` first to refresh registry data.");
        return Ok(());
    }

    let orchestrator = app.orchestrator()?;
    let (sink, handle) = progress_printer();
    let summary = orchestrator.update_packages(&packages, &sink).await;
    drop(sink);
    finish(handle).await;

    println!("{}", summary);
    Ok(())
}

async fn run_uninstall(project: &str, name: &str) -> Result<()> {
    let app = App::open()?;
    let package = app.package(project, name)?;
    let orchestrator = app.orchestrator()?;

    let (sink, handle) = progress_printer();
    let removed = orchestrator.uninstall_package(&package, &sink).await;
    drop(sink);
    finish(handle).await;

    if !removed {
        anyhow::bail!("Could not uninstall {}; see the log above", name);
    }
    println!("  {} removed {}", "✓".green(), name);
    Ok(())
}

async fn run_update_project(path: &str) -> Result<()> {
    let app = App::open()?;
    let orchestrator = app.orchestrator()?;
    let key = project_key(path);

    let (sink, handle) = progress_printer();
    let result = orchestrator.update_project(&key, &sink).await;
    drop(sink);
    finish(handle).await;

    if !result.success {
        anyhow::bail!(
            "Update of {} failed: {}",
            key,
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    println!("  {} {}", "✓".green(), result.details);
    Ok(())
}

async fn run_git_check(path: &str) -> Result<()> {
    let app = App::open()?;
    let key = project_key(path);
    let status = app.source_checker().record(&key).await?;

    let remote = status.remote_revision.as_deref().unwrap_or("unknown");
    if status.update_available {
        println!(
            "{}: {} -> {}",
            key.cyan(),
            short(&status.local_revision).yellow(),
            short(remote).green()
        );
    } else {
        println!("{}: up to date at {}", key.cyan(), short(&status.local_revision).green());
    }
    Ok(())
}

fn short(revision: &str) -> &str {
    revision.get(..7).unwrap_or(revision)
}

async fn run_git_pull(path: &str) -> Result<()> {
    let app = App::open()?;
    let key = project_key(path);

    let (sink, handle) = progress_printer();
    let pulled = app.source_checker().pull_and_rescan(&key, &sink).await;
    drop(sink);
    finish(handle).await;

    if !pulled {
        anyhow::bail!("git pull in {} failed; the working copy was left as it was", key);
    }
    println!("  {} pulled and rescanned {}", "✓".green(), key);
    Ok(())
}

fn run_remove(path: &str) -> Result<()> {
    let app = App::open()?;
    let key = project_key(path);
    app.catalog.delete_project(&key)?;
    println!("Removed {}", key);
    Ok(())
}

fn run_remove_package(project: &str, name: &str) -> Result<()> {
    let app = App::open()?;
    let key = project_key(project);
    app.catalog.delete_package(&key, name)?;
    app.catalog.refresh_package_count(&key)?;
    println!("Removed {} from {}", name, key);
    Ok(())
}

fn run_clear(yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("This deletes every project and package record. Re-run with --yes to confirm.");
    }
    let app = App::open()?;
    app.catalog.clear_all_data()?;
    println!("Catalog cleared");
    Ok(())
}

fn run_export(format: ExportFormat, out: Option<&Path>) -> Result<()> {
    let app = App::open()?;
    let content = match format {
        ExportFormat::Json => export::to_json(&app.catalog)?,
        ExportFormat::Csv => export::to_csv(&app.catalog)?,
    };

    match out {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported catalog to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn run_clear_cache() -> Result<()> {
    let cache = cache::Cache::new()?;
    let removed = cache.clear()?;
    println!("Cleared {} cached responses from {}", removed, cache.dir().display());
    Ok(())
}

fn run_init_config(path: &str, force: bool) -> Result<()> {
    let path = Path::new(path);

    if path.exists() && !force {
        return Err(anyhow::anyhow!(
            "Configuration file already exists at {}. Use --force to overwrite.",
            path.display()
        ));
    }

    std::fs::write(path, depcat::config::EXAMPLE_CONFIG)?;

    println!("Created configuration file at: {}", path.display());
    println!("\nEdit this file to customize depcat behavior.");
    println!("See comments in the file for available options.");

    Ok(())
}
