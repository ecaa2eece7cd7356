//! # gbk-iconv CLI - GBK family and UTF-16 converter
//!
//! Command-line front end over the conversion library. Mapping tables are
//! read from `--tables`, `GBK_ICONV_TABLE_DIR`, or the crate's `tables/`
//! directory, in that order.

#[cfg(feature = "cli")]
use std::fs;
#[cfg(feature = "cli")]
use std::io::{self, Read, Write};
#[cfg(feature = "cli")]
use std::path::{Path, PathBuf};

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use serde::Serialize;

#[cfg(feature = "cli")]
use gbk_iconv::{ConverterFactory, Encoding, EncodingPair, Error as ConvertError};

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features disabled. Enable with --features cli");
    std::process::exit(1);
}

/// gbk-iconv: convert between GBK, GB2312, GB18030, UTF-8 and UTF-16
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "gbk-iconv")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Directory holding gbk2unicode.json and unicode2gbk.json
    #[arg(long, global = true)]
    tables: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Convert a file between encodings
    Convert(ConvertArgs),

    /// Check that a file is well-formed in an encoding
    Validate(ValidateArgs),

    /// List the supported encoding pairs
    List,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ConvertArgs {
    /// Source encoding
    #[arg(short = 'f', long = "from")]
    from: Encoding,

    /// Target encoding
    #[arg(short = 't', long = "to")]
    to: Encoding,

    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ValidateArgs {
    /// Expected encoding
    #[arg(short, long)]
    encoding: Encoding,

    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ConversionResult {
    pair: EncodingPair,
    bytes_processed: usize,
    bytes_written: usize,
    processing_time_ms: u64,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ValidationResult {
    encoding: Encoding,
    valid: bool,
    error: Option<String>,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct PairInfo {
    id: u8,
    from: Encoding,
    to: Encoding,
    table: Option<&'static str>,
    bom: Option<String>,
}

#[cfg(feature = "cli")]
fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let factory = match cli.tables {
        Some(ref dir) => ConverterFactory::new(dir),
        None => ConverterFactory::from_env(),
    };

    match cli.command {
        Commands::Convert(ref args) => convert_command(args, &cli, &factory)?,
        Commands::Validate(ref args) => validate_command(args, &cli)?,
        Commands::List => list_command(&cli)?,
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn read_input(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) => {
            log::info!("reading from {}", path.display());
            fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
        }
        None => {
            log::info!("reading from stdin");
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read from stdin")?;
            Ok(buffer)
        }
    }
}

#[cfg(feature = "cli")]
fn convert_command(args: &ConvertArgs, cli: &Cli, factory: &ConverterFactory) -> Result<()> {
    let start_time = std::time::Instant::now();

    let pair = EncodingPair::new(args.from, args.to)?;
    log::info!("converting {}", pair);

    let converter = factory.create(pair).with_context(|| {
        format!(
            "Failed to create converter for {} (tables in {})",
            pair,
            factory.table_dir().display()
        )
    })?;

    let input_data = read_input(args.input.as_deref())?;
    let output_data = converter
        .convert_to_vec(&input_data)
        .context("Conversion failed")?;

    if let Some(ref output_path) = args.output {
        fs::write(output_path, &output_data)
            .with_context(|| format!("Failed to write output file: {}", output_path.display()))?;
        log::info!("wrote to {}", output_path.display());
    } else {
        io::stdout()
            .write_all(&output_data)
            .context("Failed to write to stdout")?;
    }

    let processing_time = start_time.elapsed();
    log::info!(
        "processed {} bytes -> {} bytes in {:?}",
        input_data.len(),
        output_data.len(),
        processing_time
    );

    if let OutputFormat::Json = cli.format {
        let result = ConversionResult {
            pair,
            bytes_processed: input_data.len(),
            bytes_written: output_data.len(),
            processing_time_ms: processing_time.as_millis() as u64,
        };
        // stdout may carry the converted bytes
        eprintln!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn validate_command(args: &ValidateArgs, cli: &Cli) -> Result<()> {
    let input_data = read_input(args.input.as_deref())?;
    let outcome = args.encoding.validate(&input_data);

    match cli.format {
        OutputFormat::Json => {
            let result = ValidationResult {
                encoding: args.encoding,
                valid: outcome.is_ok(),
                error: outcome.as_ref().err().map(ConvertError::to_string),
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => match outcome {
            Ok(()) => println!("✓ Input is valid {}", args.encoding),
            Err(ref e) => {
                println!("✗ Input is not valid {}", args.encoding);
                println!("  {}", e);
            }
        },
    }

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn list_command(cli: &Cli) -> Result<()> {
    let pairs: Vec<PairInfo> = EncodingPair::ALL
        .into_iter()
        .map(|pair| PairInfo {
            id: pair.id(),
            from: pair.source(),
            to: pair.target(),
            table: pair.table().map(|kind| kind.file_name()),
            bom: pair.target().bom().map(|bom| format!("{:02X?}", bom)),
        })
        .collect();

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&pairs)?);
        }
        OutputFormat::Text => {
            println!("Supported Pairs ({} total):", pairs.len());
            println!();
            for info in &pairs {
                println!(
                    "{:>2}  {:8} -> {:8}  {}",
                    info.id,
                    info.from.name(),
                    info.to.name(),
                    info.table.unwrap_or("-")
                );
                if cli.verbose {
                    if let Some(ref bom) = info.bom {
                        println!("      BOM: {}", bom);
                    }
                }
            }
        }
    }

    Ok(())
}
