use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use viral_reference_manager::app::{self, App, ProgressSink};
use viral_reference_manager::cache::RecordCache;
use viral_reference_manager::config::{ConfigLoader, ResolvedConfig};
use viral_reference_manager::domain::{Accession, DataType};
use viral_reference_manager::error::{ErrorKind, RepoError};
use viral_reference_manager::ncbi::{CachedNcbiClient, NcbiHttpClient};
use viral_reference_manager::output::{JsonOutput, OutputMode, StderrProgress, TextOutput};
use viral_reference_manager::pipeline::PipelineOptions;
use viral_reference_manager::repo::Repo;
use viral_reference_manager::store::RepoLayout;

#[derive(Parser)]
#[command(name = "vref")]
#[command(about = "Event-sourced reference repository for viral OTUs")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, default_value = ".", help = "Repository directory")]
    path: Utf8PathBuf,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true, help = "Bypass the local NCBI record cache")]
    ignore_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create an empty repository")]
    Init(InitArgs),
    #[command(about = "Manage OTUs")]
    Otu(OtuArgs),
    #[command(about = "Create and update the OTUs listed in vref.json")]
    Sync(SyncArgs),
    #[command(about = "Write the current repository state as a reference.json file")]
    Build(BuildArgs),
    #[command(about = "Manage the NCBI record cache")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct InitArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    organism: String,

    #[arg(long, value_enum, default_value_t = DataType::Genome)]
    data_type: DataType,
}

#[derive(Args)]
struct OtuArgs {
    #[command(subcommand)]
    command: OtuCommand,
}

#[derive(Subcommand)]
enum OtuCommand {
    #[command(about = "Create an OTU from a taxonomy ID, optionally seeded with accessions")]
    Create {
        taxid: u32,
        accessions: Vec<String>,
    },
    #[command(about = "Add sequences by accession")]
    Add {
        taxid: u32,
        #[arg(required = true)]
        accessions: Vec<String>,
    },
    #[command(about = "Add every accession NCBI links to the OTU")]
    Update { taxid: u32 },
    #[command(about = "Exclude accessions from an OTU")]
    Exclude {
        taxid: u32,
        #[arg(required = true)]
        accessions: Vec<String>,
    },
    #[command(about = "List OTUs")]
    List,
    #[command(about = "Show one OTU")]
    Show { taxid: u32 },
}

#[derive(Args)]
struct SyncArgs {
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    #[arg(long, help = "Channel capacity between pipeline stages")]
    capacity: Option<usize>,
}

#[derive(Args)]
struct BuildArgs {
    #[arg(short, long, default_value = "reference.json")]
    output: Utf8PathBuf,

    #[arg(long, help = "Recorded as the reference name")]
    version: Option<String>,

    #[arg(short, long)]
    indent: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Delete all cached NCBI records")]
    Clear,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<RepoError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RepoError) -> u8 {
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::Validation => 2,
        ErrorKind::External => 3,
        ErrorKind::Integrity => 4,
        ErrorKind::Io => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Init(args) => {
            let result = app::init_repo(&cli.path, args.data_type, &args.name, &args.organism)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_init(&result),
            }
            Ok(())
        }
        Commands::Otu(args) => {
            let config = ConfigLoader::resolve(None, &cli.path)?;
            let mut app = open_app(&cli.path, &config, cli.ignore_cache)?;
            run_otu(args.command, &mut app, output_mode)
        }
        Commands::Sync(args) => {
            let config = ConfigLoader::resolve(args.config.as_deref(), &cli.path)?;
            let mut app = open_app(&cli.path, &config, cli.ignore_cache)?;
            let options = PipelineOptions {
                capacity: args.capacity.unwrap_or(PipelineOptions::default().capacity),
            };
            let cancel = AtomicBool::new(false);
            let result = app.sync(&config, options, &cancel, sink(output_mode))?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_sync(&result),
            }
            Ok(())
        }
        Commands::Build(args) => {
            let repo = Repo::open(&cli.path)?;
            let result =
                app::build_reference(&repo, &args.output, args.version.as_deref(), args.indent)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_build(&result),
            }
            Ok(())
        }
        Commands::Cache(CacheArgs {
            command: CacheCommand::Clear,
        }) => {
            let layout = RepoLayout::new(cli.path.clone());
            if !layout.is_initialized() {
                return Err(RepoError::NotARepository(cli.path).into());
            }
            let config = ConfigLoader::resolve(None, &cli.path)?;
            let cache = RecordCache::new(layout.cache_dir(), config.ncbi.cache_policy)?;
            let result = app::clear_cache(&cache)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_clear(&result),
            }
            Ok(())
        }
    }
}

type HttpApp = App<CachedNcbiClient<NcbiHttpClient>>;

fn open_app(
    path: &Utf8Path,
    config: &ResolvedConfig,
    ignore_cache: bool,
) -> miette::Result<HttpApp> {
    let layout = RepoLayout::new(path);
    if !layout.is_initialized() {
        return Err(RepoError::NotARepository(path.to_path_buf()).into());
    }
    let cache = RecordCache::new(layout.cache_dir(), config.ncbi.cache_policy)?;
    let http = NcbiHttpClient::new(config.ncbi.credentials())?;
    let client = CachedNcbiClient::new(http, cache, ignore_cache);
    Ok(App::open(path, client)?)
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &StderrProgress,
    }
}

fn parse_accessions(values: &[String]) -> miette::Result<Vec<Accession>> {
    values
        .iter()
        .map(|value| value.parse::<Accession>().map_err(miette::Report::from))
        .collect()
}

fn run_otu(command: OtuCommand, app: &mut HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    let sink = sink(output_mode);
    match command {
        OtuCommand::Create { taxid, accessions } => {
            let accessions = parse_accessions(&accessions)?;
            let result = app.create_otu(taxid, &accessions, sink)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_create(&result),
            }
        }
        OtuCommand::Add { taxid, accessions } => {
            let accessions = parse_accessions(&accessions)?;
            let result = app.add_sequences(taxid, &accessions, sink)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_add(&result),
            }
        }
        OtuCommand::Update { taxid } => {
            let result = app.update_otu(taxid, sink)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_add(&result),
            }
        }
        OtuCommand::Exclude { taxid, accessions } => {
            let accessions = parse_accessions(&accessions)?;
            let result = app.exclude(taxid, &accessions, sink)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_exclude(&result),
            }
        }
        OtuCommand::List => {
            let result = app.list();
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&result).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_list(&result),
            }
        }
        OtuCommand::Show { taxid } => {
            let otu = app.show(taxid)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_json(&otu).into_diagnostic()?,
                OutputMode::Interactive => TextOutput::print_otu(&otu),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_arguments() {
        let cli = Cli::try_parse_from(["vref", "build", "-i", "--version", "v1.2.0"]).unwrap();
        let Commands::Build(args) = cli.command else {
            panic!("expected build command");
        };
        assert_eq!(args.output, "reference.json");
        assert_eq!(args.version.as_deref(), Some("v1.2.0"));
        assert!(args.indent);
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(map_exit_code(&RepoError::TaxidNotFound(1)), 2);
        assert_eq!(map_exit_code(&RepoError::DuplicateName("x".to_string())), 2);
        assert_eq!(map_exit_code(&RepoError::NcbiHttp("down".to_string())), 3);
        assert_eq!(map_exit_code(&RepoError::MisplacedMetadata(2)), 4);
        assert_eq!(map_exit_code(&RepoError::Filesystem("disk".to_string())), 1);
    }
}
