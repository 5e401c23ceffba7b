//! Batch command - extract invoices and append them to the spreadsheets.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error};

use invsheet_core::models::parse_month;
use invsheet_core::{InvoiceDocument, InvoiceOutcome};

use super::{build_pipeline, build_sinks, load_config, resolve_credentials};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input PDFs or glob patterns, processed in the order given
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Invoice month, selects the tab of the remote spreadsheet
    #[arg(short, long, required_unless_present = "no_remote")]
    month: Option<String>,

    /// Local workbook to append to
    #[arg(short, long)]
    workbook: PathBuf,

    /// Where to save the updated workbook (default: overwrite the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only append to the local workbook
    #[arg(long)]
    no_remote: bool,

    /// Keep going when an invoice fails
    #[arg(long)]
    continue_on_error: bool,

    /// Also OCR the images embedded in the PDFs
    #[arg(long)]
    ocr: bool,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    if args.ocr {
        config.ocr.enabled = true;
    }

    let month = match (&args.month, args.no_remote) {
        (Some(name), false) => Some(parse_month(name)?),
        _ => None,
    };

    let files = expand_inputs(&args.inputs)?;
    if files.is_empty() {
        anyhow::bail!("No PDF files found for: {}", args.inputs.join(" "));
    }
    if !args.workbook.exists() {
        anyhow::bail!("Workbook not found: {}", args.workbook.display());
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    let documents = files
        .iter()
        .map(|path| {
            InvoiceDocument::from_path(path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let credentials = resolve_credentials(&config);
    let output = args.output.clone().unwrap_or_else(|| args.workbook.clone());
    let pipeline = build_pipeline(config, &credentials)?;
    let mut sinks = build_sinks(pipeline.config(), &credentials, month, &args.workbook, &output).await?;

    let progress = ProgressBar::new(documents.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} invoices")?
            .progress_chars("=>-"),
    );

    let result = pipeline
        .run_batch(&documents, &mut sinks, args.continue_on_error, |outcome| {
            progress.suspend(|| print_outcome(outcome));
            progress.inc(1);
        })
        .await;

    let report = match result {
        Ok(report) => {
            progress.finish_with_message("Complete");
            report
        }
        Err(e) => {
            progress.abandon();
            error!("Batch aborted: {}", e);
            return Err(e).context("Batch aborted, rows appended before the failure were kept");
        }
    };

    println!();
    println!(
        "{} Processed {} invoices in {:?}",
        style("✓").green(),
        report.outcomes.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed",
        style(report.succeeded()).green(),
        style(report.failed()).red()
    );
    println!(
        "{} Updated workbook saved to {}",
        style("✓").green(),
        output.display()
    );

    let failed: Vec<_> = report.outcomes.iter().filter(|o| !o.is_success()).collect();
    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed invoices:").red());
        for outcome in failed {
            println!(
                "  - {}: {}",
                outcome.name,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

/// Expand files and glob patterns into PDF paths, keeping argument order.
fn expand_inputs(inputs: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let mut matched: Vec<PathBuf> = glob(input)?
            .filter_map(|r| r.ok())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
            })
            .collect();
        debug!("{} matched {} files", input, matched.len());
        files.append(&mut matched);
    }
    Ok(files)
}

fn print_outcome(outcome: &InvoiceOutcome) {
    if let Some(record) = &outcome.record {
        println!();
        println!("{} Structured Summary:", style(&outcome.name).bold());
        println!("{}", record.summary());
    }
    match &outcome.error {
        Some(e) => println!("{} {}: {}", style("✗").red(), outcome.name, e),
        None => println!(
            "{} {} appended to {}",
            style("✓").green(),
            outcome.name,
            outcome.written_to.join(", ")
        ),
    }
}
