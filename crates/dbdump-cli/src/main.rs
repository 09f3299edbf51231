//! dbdump CLI - snapshot and restore relational databases.

use clap::{Parser, Subcommand};
use dbdump::{
    connect, Config, DumpError, DumpOptions, Dumper, Format, LoadOptions, Loader, TypeRegistry,
};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "dbdump")]
#[command(about = "Dump a database to JSON, MessagePack, YAML or CSV and load it back")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump every table of the database
    Dump {
        /// Wire format: json, msgpack, yaml, csv [default: from config]
        #[arg(short, long)]
        format: Option<String>,

        /// Output file, or - for stdout
        #[arg(short, long, default_value = "-", conflicts_with = "dir")]
        output: PathBuf,

        /// Write one file per table into this directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Override rows per page
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Load a dump into the database in one transaction
    Load {
        /// Wire format: json, msgpack, yaml, csv [default: from config]
        #[arg(short, long)]
        format: Option<String>,

        /// Input file, or - for stdin
        #[arg(short, long, default_value = "-", conflicts_with = "dir")]
        input: PathBuf,

        /// Load every file of this directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Keep existing rows instead of truncating first
        #[arg(long)]
        no_truncate: bool,
    },

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), DumpError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let registry = Arc::new(TypeRegistry::builtin());

    match cli.command {
        Commands::Dump {
            format,
            output,
            dir,
            page_size,
        } => {
            let format = resolve_format(format.as_deref(), config.dump.format)?;
            if let Some(size) = page_size {
                config.dump.page_size = size;
                config.validate()?;
            }

            let mut conn = connect(&config.database).await?;
            let mut dumper = Dumper::new(conn.as_mut(), registry, DumpOptions::from(&config.dump));

            let stats = match dir {
                Some(dir) => dumper.dump_to_dir(format, &dir).await?,
                None if is_stdio(&output) => {
                    let stdout = io::stdout();
                    let mut out = BufWriter::new(stdout.lock());
                    let stats = dumper.dump_to_writer(format, &mut out).await?;
                    out.flush()?;
                    stats
                }
                None => {
                    let mut out = BufWriter::new(File::create(&output)?);
                    let stats = dumper.dump_to_writer(format, &mut out).await?;
                    out.flush()?;
                    stats
                }
            };

            info!(
                "Dumped {} tables ({} rows, {} empty skipped)",
                stats.tables, stats.rows, stats.skipped_empty
            );
        }

        Commands::Load {
            format,
            input,
            dir,
            no_truncate,
        } => {
            let format = resolve_format(format.as_deref(), config.dump.format)?;
            if no_truncate {
                config.load.truncate = false;
            }

            let stats = match dir {
                Some(dir) => {
                    let mut conn = connect(&config.database).await?;
                    Loader::new(conn.as_mut(), registry, LoadOptions::from(&config))
                        .load_from_dir(format, &dir)
                        .await?
                }
                None => {
                    // Open the input before connecting so a bad path fails fast
                    let reader: Box<dyn Read + Send> = if is_stdio(&input) {
                        Box::new(BufReader::new(io::stdin()))
                    } else {
                        Box::new(BufReader::new(File::open(&input)?))
                    };
                    let mut conn = connect(&config.database).await?;
                    Loader::new(conn.as_mut(), registry, LoadOptions::from(&config))
                        .load_from_reader(format, reader)
                        .await?
                }
            };

            info!(
                "Loaded {} tables ({} rows in {} batches)",
                stats.tables, stats.rows, stats.batches
            );
        }

        Commands::HealthCheck => {
            let mut conn = connect(&config.database).await?;
            let tables = conn.list_tables().await?;
            println!("Connection: OK");
            println!("  Backend: {}", conn.dialect().backend());
            println!("  Database: {}", config.database.database);
            println!("  Tables: {}", tables.len());
        }
    }

    Ok(())
}

fn resolve_format(arg: Option<&str>, default: Format) -> Result<Format, DumpError> {
    arg.map(str::parse).unwrap_or(Ok(default))
}

fn is_stdio(path: &std::path::Path) -> bool {
    path.as_os_str() == "-"
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr; stdout may carry the dump itself
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
