use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mproc_share::app::{
    ArchiveSettings, ShareApp, ShareOptions, ShareRequest, convert_reference,
};
use mproc_share::config::{ConfigLoader, ResolvedConfig};
use mproc_share::convert::{ImageConverter, SystemConverter};
use mproc_share::correlator::Correlator;
use mproc_share::domain::{Modality, SubjectId};
use mproc_share::error::ShareError;
use mproc_share::nda::Image03Table;
use mproc_share::output::{JsonOutput, LogProgress};
use mproc_share::upload::{
    AwsCliStore, Credentials, DryRunStore, DryRunUploader, MetadataUploader, MindarHttpClient,
    ObjectStore,
};

#[derive(Parser)]
#[command(name = "mproc-share")]
#[command(about = "Share minimally processed ABCD imaging series as BIDS archives with NDA")]
#[command(version)]
struct Cli {
    /// Config file (default: ./mproc-share.json, then the user config dir)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the processed and raw files of every run of one modality")]
    Locate(LocateArgs),
    #[command(about = "Convert, package and upload every run of one modality")]
    Share(ShareArgs),
    #[command(about = "Convert one processed image named after its fast-track archive")]
    Convert(ConvertArgs),
    #[command(about = "Query an NDA image03 export")]
    Ndar(NdarArgs),
}

#[derive(Args)]
struct LocateArgs {
    subject: String,
    modality: Modality,
}

#[derive(Args)]
struct ShareArgs {
    #[arg(long)]
    subject: String,

    /// Subjects file with pGUID, dob, gender and event_rc columns
    #[arg(long)]
    demog: PathBuf,

    #[arg(long)]
    modality: Modality,

    /// NDA image03 export or package
    #[arg(long)]
    nda_db: PathBuf,

    #[arg(long)]
    outdir: PathBuf,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(long)]
    input: PathBuf,

    /// Fast-track archive name the output name is derived from
    #[arg(long)]
    reference: String,

    #[arg(long)]
    outdir: PathBuf,
}

#[derive(Args)]
struct NdarArgs {
    #[arg(long)]
    db: PathBuf,

    #[command(subcommand)]
    query: NdarQuery,
}

#[derive(Subcommand)]
enum NdarQuery {
    #[command(about = "All records, or those of one subject")]
    Records { subject: Option<String> },
    #[command(about = "Image file names of one subject")]
    Files { subject: String },
    #[command(about = "image03 ids of one image file")]
    Id { file_name: String },
    #[command(about = "Records of one image file")]
    RecordsFor { file_name: String },
    #[command(about = "Image files shared by records with different ids")]
    Duplicates,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ShareError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ShareError) -> u8 {
    match error {
        ShareError::MissingConfig
        | ShareError::ConfigRead(_)
        | ShareError::ContainerNotFound(_)
        | ShareError::SubjectNotFound(_)
        | ShareError::MissingFile { .. }
        | ShareError::MissingEvents { .. }
        | ShareError::Credentials { .. } => 2,
        ShareError::Conversion(_) | ShareError::UploadHttp(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Locate(args) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            let subject = args.subject.parse::<SubjectId>()?;
            let correlator = Correlator::new(config.layout.clone());
            let runs = correlator.correlate(&subject, args.modality)?;
            JsonOutput::print_runs(&runs).into_diagnostic()?;
            Ok(())
        }
        Commands::Share(args) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            run_share(args, config)
        }
        Commands::Convert(args) => {
            let converter = match ConfigLoader::resolve(cli.config.as_deref()) {
                Ok(config) => SystemConverter::new(config.converter),
                Err(ShareError::MissingConfig) => SystemConverter::new("mri_convert"),
                Err(err) => return Err(err.into()),
            };
            let result = convert_reference(
                &converter,
                &args.input,
                &args.reference,
                &args.outdir,
                &LogProgress,
            )?;
            JsonOutput::print_convert(&result).into_diagnostic()?;
            Ok(())
        }
        Commands::Ndar(args) => run_ndar(args),
    }
}

fn run_share(args: ShareArgs, config: ResolvedConfig) -> miette::Result<()> {
    let request = ShareRequest {
        subject: args.subject.parse::<SubjectId>()?,
        modality: args.modality,
        demographics: args.demog,
        nda_db: args.nda_db,
        outdir: args.outdir,
    };
    let options = ShareOptions {
        dry_run: args.dry_run,
    };
    let converter = SystemConverter::new(&config.converter);
    let upload = &config.upload;

    if options.dry_run {
        let uploader = DryRunUploader::new(&upload.schema_name);
        let store = DryRunStore::new(&upload.aws, &upload.bucket);
        share_with(&config, converter, uploader, store, &request, options)
    } else {
        let credentials = Credentials::read(&upload.credentials)?;
        let uploader = MindarHttpClient::new(&upload.mindar_url, &upload.schema_name, credentials)?;
        let store = AwsCliStore::new(&upload.aws, &upload.bucket);
        share_with(&config, converter, uploader, store, &request, options)
    }
}

fn share_with<C: ImageConverter, U: MetadataUploader, S: ObjectStore>(
    config: &ResolvedConfig,
    converter: C,
    uploader: U,
    store: S,
    request: &ShareRequest,
    options: ShareOptions,
) -> miette::Result<()> {
    let app = ShareApp::new(
        Correlator::new(config.layout.clone()),
        converter,
        uploader,
        store,
        ArchiveSettings {
            bucket: config.upload.bucket.clone(),
            dataset_description: config.dataset_description.clone(),
        },
    );
    let result = app.share(request, options, &LogProgress)?;
    JsonOutput::print_share(&result).into_diagnostic()?;
    Ok(())
}

fn run_ndar(args: NdarArgs) -> miette::Result<()> {
    let table = Image03Table::read(&args.db)?;
    match args.query {
        NdarQuery::Records { subject } => {
            let key = subject.map(|subject| pguid(&subject)).transpose()?;
            JsonOutput::print_json(&table.records(key.as_deref())).into_diagnostic()?;
        }
        NdarQuery::Files { subject } => {
            JsonOutput::print_json(&table.list_files(&pguid(&subject)?)).into_diagnostic()?;
        }
        NdarQuery::Id { file_name } => {
            JsonOutput::print_json(&table.ids_for_file(&file_name)).into_diagnostic()?;
        }
        NdarQuery::RecordsFor { file_name } => {
            JsonOutput::print_json(&table.records_for_file(&file_name)).into_diagnostic()?;
        }
        NdarQuery::Duplicates => {
            JsonOutput::print_json(&table.duplicates()).into_diagnostic()?;
        }
    }
    Ok(())
}

fn pguid(subject: &str) -> Result<String, ShareError> {
    Ok(subject.parse::<SubjectId>()?.pguid())
}
