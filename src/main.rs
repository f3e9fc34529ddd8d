//! s3-fanout - Bounded fan-out uploader for S3-compatible stores
//!
//! Uploads files or probes objects, one producer thread per argument.

use clap::{Parser, Subcommand};
use s3_fanout::fanout::{Destination, Job, JobReport};
use s3_fanout::s3::CredentialsProvider;
use s3_fanout::{Config, FanoutManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// s3-fanout - Push and probe objects in an S3-compatible store
#[derive(Parser, Debug)]
#[command(name = "s3-fanout")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files
    Put {
        /// Files to upload; the object key is the prefix plus the file name
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Key prefix for uploaded objects
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Refuse to overwrite existing objects
        #[arg(long)]
        conditional: bool,

        /// Skip the upload when the object already exists
        #[arg(long)]
        probe_first: bool,
    },
    /// Check whether objects exist
    Head {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting s3-fanout v{}", s3_fanout::VERSION);

    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    let credentials = Arc::new(CredentialsProvider::resolve(&config.s3)?);
    let bucket: Arc<str> = Arc::from(config.s3.bucket.as_str());
    let destination =
        |key: String| Destination::new(Arc::clone(&credentials), Arc::clone(&bucket), key);

    let jobs: Vec<Job> = match args.command {
        Command::Put {
            files,
            prefix,
            conditional,
            probe_first,
        } => files
            .into_iter()
            .map(|path| -> anyhow::Result<Job> {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow::anyhow!("Not a file: {}", path.display()))?;
                let job = Job::put_path(destination(format!("{prefix}{name}")), path)
                    .with_conditional(conditional);
                Ok(if probe_first { job.probe_first() } else { job })
            })
            .collect::<anyhow::Result<Vec<Job>>>()?,
        Command::Head { keys } => keys
            .into_iter()
            .map(|key| Job::head(destination(key)))
            .collect(),
    };

    let manager = FanoutManager::from_config(&config)?;
    manager.start()?;

    let reports: Vec<JobReport> = std::thread::scope(|scope| {
        let producers: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let manager = &manager;
                scope.spawn(move || manager.submit(job))
            })
            .collect();
        producers
            .into_iter()
            .filter_map(|producer| producer.join().ok())
            .collect()
    });

    manager.stop();

    for report in &reports {
        println!(
            "{}: {} (attempts: {}, retries: {})",
            report.object_key, report.classification, report.attempts, report.retries
        );
    }
    println!("{}", manager.statistics());

    let failed = reports.iter().filter(|report| !report.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} jobs failed", reports.len());
    }

    Ok(())
}
