//! Process command - extract the fields of a single invoice.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use invsheet_core::models::record::FIELD_COUNT;
use invsheet_core::{ExtractionResult, InvoiceDocument};

use super::{build_pipeline, load_config, resolve_credentials};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input PDF
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Also OCR the images embedded in the PDF
    #[arg(long)]
    ocr: bool,

    /// Print the raw model reply after the fields
    #[arg(long)]
    show_reply: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON object keyed by field label
    Json,
    /// One `label: value` line per field
    Text,
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if args.ocr {
        config.ocr.enabled = true;
    }

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let credentials = resolve_credentials(&config);
    let pipeline = build_pipeline(config, &credentials)?;
    let document = InvoiceDocument::from_path(&args.input)?;

    info!("Processing file: {}", args.input.display());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    spinner.set_message(format!("Extracting {}", document.name));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = pipeline.process(&document).await;
    spinner.finish_and_clear();
    let result = result?;

    for warning in &result.warnings {
        eprintln!("{} {}", style("!").yellow(), warning);
    }

    let output = format_result(&result, args.format)?;
    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    if args.show_reply {
        println!();
        println!("{}", style("Model reply:").bold());
        println!("{}", result.reply);
    }

    println!(
        "{} {} of {} fields found in {}ms",
        style("ℹ").blue(),
        result.record.found_count(),
        FIELD_COUNT,
        result.processing_time_ms
    );

    Ok(())
}

fn format_result(result: &ExtractionResult, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(&result.record)?,
        OutputFormat::Text => result.record.summary(),
    })
}
