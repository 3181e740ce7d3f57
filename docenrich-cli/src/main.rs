//! docenrich command-line converter
//!
//! Provisions the configured analysis-engine bundle, converts one VXML
//! payload and writes the enriched result.
//!
//! Usage:
//!   docenrich --config docenrich.toml input.xml > enriched.xml
//!   cat input.xml | docenrich -O support-root=/opt/docenrich \
//!       -O pear-filename=people.pear -O type=Person.org.example.PersonType

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docenrich_cli::{base_options, parse_override};
use docenrich_converter::{Converter, ConverterOptions, EnrichingConverter};
use docenrich_engine::RuleEngineFactory;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "docenrich")]
#[command(about = "Enrich VXML documents with analysis-engine annotations")]
struct Args {
    /// Path to the converter config file; options come only from -O when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input document; stdin when omitted
    input: Option<PathBuf>,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Extra converter option, applied after the config file (repeatable)
    #[arg(short = 'O', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();

    let mut flat = base_options(args.config.as_deref())?;
    for raw in &args.options {
        let (key, value) = parse_override(raw)?;
        flat.push(key, value);
    }
    let options = ConverterOptions::from_source(&flat).context("invalid converter options")?;
    let mut converter = EnrichingConverter::new(&options, &RuleEngineFactory)
        .context("failed to start converter")?;

    let input = match &args.input {
        Some(path) => {
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let output = converter
        .convert(Some(&input))
        .context("conversion failed")?
        .unwrap_or_default();
    match &args.output {
        Some(path) => {
            fs::write(path, &output).with_context(|| format!("failed to write {}", path.display()))?
        }
        None => io::stdout().write_all(&output)?,
    }
    converter.terminate()?;

    info!(
        component_id = %converter.component().component_id,
        input_bytes = input.len(),
        output_bytes = output.len(),
        "Conversion complete"
    );
    Ok(())
}
