use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use terrafix::cancel::CancelToken;
use terrafix::config::{self, FixerConfig, RunConfig};
use terrafix::ctrl::{Controller, ControllerOptions};
use terrafix::logging::{self, LogConfig};
use terrafix::resolver::{ReferenceOrigin, Resolver, ScanResolver};
use terrafix::schema::ProviderSchemas;
use terrafix::state::{Module, RootState, StateDocument};
use terrafix::vfs::{Materialize, MemFs};

#[derive(Parser)]
#[command(name = "terrafix")]
#[command(about = "Rewrite Terraform configuration for newer provider schema versions", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter directive, e.g. `debug` or `terrafix::ctrl=debug`
    /// (overrides TERRAFIX_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fix references and definitions of one provider's blocks
    Fix(FixArgs),

    /// Print modules, reference origins with their targets, and targets
    Inspect {
        /// Root module directory
        path: PathBuf,

        #[command(flatten)]
        sources: SourceArgs,
    },

    /// List providers in a provider schema file
    Providers {
        #[command(flatten)]
        sources: SourceArgs,
    },
}

#[derive(Args, Default)]
struct SourceArgs {
    /// Output of `terraform providers schema -json`
    #[arg(long)]
    provider_schema: Option<PathBuf>,

    /// Output of `terraform show -json`
    #[arg(long)]
    state: Option<PathBuf>,

    /// Run file (defaults to terrafix.toml in the root module, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct FixArgs {
    /// Root module directory
    path: PathBuf,

    #[command(flatten)]
    sources: SourceArgs,

    /// Provider address, e.g. `hashicorp/azurerm`
    #[arg(short, long)]
    provider: Option<String>,

    /// Write the fixed tree to this directory instead of printing it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print a unified diff of each changed file instead of full bodies
    #[arg(short, long)]
    diff: bool,

    /// Provider executable to run as the fixer (the provider address is
    /// deduced from its name when --provider is absent)
    #[arg(long)]
    fixer_command: Option<PathBuf>,

    /// Extra argument for the fixer command (repeatable)
    #[arg(long = "fixer-arg")]
    fixer_args: Vec<String>,

    /// Suffix the dummy fixer appends to reference expressions
    #[arg(long)]
    suffix: Option<String>,

    /// Attribute line the dummy fixer adds to definitions, e.g. `fixed = true`
    #[arg(long)]
    attribute: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogConfig::default().with_filter(cli.log_level.clone()))?;

    match cli.command {
        Commands::Fix(args) => cmd_fix(args),
        Commands::Inspect { path, sources } => cmd_inspect(&path, &sources),
        Commands::Providers { sources } => cmd_providers(&sources),
    }
}

/// Helper: Load the run file and apply the shared flag overrides.
fn load_config(root: Option<&Path>, sources: &SourceArgs) -> Result<RunConfig> {
    let mut config = match (&sources.config, root) {
        (Some(path), _) => config::load_from_path(path)?,
        (None, Some(root)) => config::load_from_dir(root)?,
        (None, None) => RunConfig::default(),
    };
    if let Some(path) = &sources.provider_schema {
        config.provider_schema = Some(path.clone());
    }
    if let Some(path) = &sources.state {
        config.state = Some(path.clone());
    }
    Ok(config)
}

fn fix_config(args: &FixArgs) -> Result<RunConfig> {
    let mut config = load_config(Some(args.path.as_path()), &args.sources)?;
    if let Some(provider) = &args.provider {
        config.provider = Some(provider.clone());
    }
    if let Some(output) = &args.output {
        config.output = Some(output.clone());
    }
    if let Some(command) = &args.fixer_command {
        config.fixer = FixerConfig::Command {
            command: command.clone(),
            args: args.fixer_args.clone(),
        };
    } else if args.suffix.is_some() || args.attribute.is_some() {
        let (mut suffix, mut attribute) = match config.fixer {
            FixerConfig::Dummy { suffix, attribute } => (suffix, attribute),
            FixerConfig::Command { .. } => {
                anyhow::bail!("--suffix and --attribute only apply to the dummy fixer")
            }
        };
        if let Some(value) = &args.suffix {
            suffix = value.clone();
        }
        if let Some(value) = &args.attribute {
            attribute = Some(value.clone());
        }
        config.fixer = FixerConfig::Dummy { suffix, attribute };
    }
    config.validate().context("invalid command line")?;
    Ok(config)
}

fn load_schemas(config: &RunConfig) -> Result<ProviderSchemas> {
    let path = config
        .provider_schema
        .as_ref()
        .context("no provider schema given: pass --provider-schema or set provider_schema")?;
    Ok(ProviderSchemas::load(path)?)
}

fn load_historic(config: &RunConfig) -> Result<Option<Arc<StateDocument>>> {
    match &config.state {
        Some(path) => Ok(Some(Arc::new(StateDocument::load(path)?))),
        None => Ok(None),
    }
}

/// Helper: Cancel the run on Ctrl-C. A running fixer command is killed and
/// nothing is written.
fn interrupt_token() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || handler.cancel()).context("failed to install the Ctrl-C handler")?;
    Ok(cancel)
}

fn cmd_fix(args: FixArgs) -> Result<()> {
    let cancel = interrupt_token()?;
    let config = fix_config(&args)?;
    let provider = config
        .provider_addr()
        .context("no provider given: pass --provider or --fixer-command")?;
    let schemas = Arc::new(load_schemas(&config)?);
    let historic = load_historic(&config)?;

    let memfs = MemFs::new(&args.path)
        .with_context(|| format!("failed to load {}", args.path.display()))?;
    let fixer = config.fixer.build();

    eprintln!(
        "{}",
        format!(
            "Fixing {} for {} ({} fixer)",
            args.path.display(),
            provider,
            config.fixer.kind()
        )
        .dimmed()
    );

    let mut ctrl = Controller::new(
        memfs,
        ScanResolver::new(),
        fixer,
        ControllerOptions {
            provider,
            schemas,
            historic,
        },
    )?;
    let summary = ctrl.run(&cancel)?;
    let changed = ctrl.fs().changed_files();

    eprintln!("\n{}", "Summary:".bold());
    eprintln!("  {} modules", summary.modules);
    eprintln!("  {} fixer requests", summary.requests);
    eprintln!("  {} updates", format!("{}", summary.updates).green());
    eprintln!("  {} files changed", format!("{}", changed.len()).green());

    if let Some(output) = &config.output {
        ctrl.write(Materialize::Dir(output))?;
        eprintln!("{} Wrote {}", "✓".green(), output.display());
    } else if args.diff {
        for file in &changed {
            let before = fs::read(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let after = ctrl.fs().read_file(file)?;
            display_diff(
                file,
                &String::from_utf8_lossy(&before),
                &String::from_utf8_lossy(&after),
            );
        }
    } else {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        ctrl.write(Materialize::Preview(&mut out))?;
    }
    Ok(())
}

fn cmd_inspect(path: &Path, sources: &SourceArgs) -> Result<()> {
    let config = load_config(Some(path), sources)?;
    let schemas = match &config.provider_schema {
        Some(_) => load_schemas(&config)?,
        None => ProviderSchemas::new(),
    };
    let historic = load_historic(&config)?;

    let memfs = MemFs::new(path).with_context(|| format!("failed to load {}", path.display()))?;
    let resolver = ScanResolver::new();
    let (state, errors) = RootState::build_lenient(&memfs, &resolver, Arc::new(schemas), historic)?;

    for (module_path, module) in state.modules() {
        print_module(&state, &resolver, module_path, module);
    }

    if let Some(errors) = errors {
        eprintln!(
            "\n{} {} module errors:\n{}",
            "✗".red(),
            errors.count(),
            errors
        );
    }
    Ok(())
}

fn print_module(state: &RootState, resolver: &ScanResolver, path: &Path, module: &Module) {
    println!("{} {}", "Module".bold(), path.display());
    println!(
        "  files: {}",
        module
            .files()
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    for call in module.meta().module_calls.values() {
        println!(
            "  module {} {}",
            call.local_name.cyan(),
            call.source.as_str().dimmed()
        );
    }

    let schema = resolver.module_schema(module.meta(), state.schemas());
    for (type_name, addr) in &schema.resources {
        println!("  resource {} {}", type_name.cyan(), addr.to_string().dimmed());
    }
    for (type_name, addr) in &schema.data_sources {
        println!("  data {} {}", type_name.cyan(), addr.to_string().dimmed());
    }

    println!("  {}", "origins:".bold());
    for origin in module.origins() {
        let range = origin.range();
        let text = module
            .file(&range.filename)
            .and_then(|file| file.slice(range))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        print!("    {} {} {}", origin.kind(), range, text.yellow());
        match origin {
            ReferenceOrigin::Local(_) => {
                match resolver.resolve_origin(state, path, &range.filename, range.start()) {
                    Ok(targets) if targets.is_empty() => println!(" -> {}", "(none)".dimmed()),
                    Ok(targets) => {
                        for target in targets {
                            println!();
                            print!(
                                "      -> {} ({}) in {}",
                                target.addr,
                                target.kind,
                                target.path.display()
                            );
                        }
                        println!();
                    }
                    Err(e) => println!(" -> {}", e.to_string().red()),
                }
            }
            ReferenceOrigin::Direct(o) => {
                println!(" -> {} in {}", o.target_addr, o.target_path.display())
            }
            ReferenceOrigin::Path(o) => {
                println!(" -> {} in {}", o.target_addr, o.target_path.display())
            }
        }
    }

    println!("  {}", "targets:".bold());
    for target in module.targets() {
        for t in target.flatten() {
            let range = t
                .range
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            println!("    {} ({}) {}", t.addr, t.kind, range.dimmed());
        }
    }
}

fn cmd_providers(sources: &SourceArgs) -> Result<()> {
    let config = load_config(None, sources)?;
    let schemas = load_schemas(&config)?;
    if schemas.is_empty() {
        println!("{}", "No providers found".yellow());
        return Ok(());
    }
    for schema in schemas.iter() {
        println!(
            "{} ({} resources, {} data sources)",
            schema.addr.to_string().bold(),
            schema.resources.len(),
            schema.data_sources.len()
        );
    }
    Ok(())
}

/// Helper: Show unified diff between original and fixed content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!("\n{}", format!("--- {} (original)", file.display()).dimmed());
    println!("{}", format!("+++ {} (fixed)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);
    for change in diff.iter_all_changes() {
        let line = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", line);
    }
    io::stdout().flush().ok();
}
