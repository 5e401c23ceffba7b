//! Serve command - browser upload form around the batch pipeline.
//!
//! Routes:
//!   GET  /              upload form (PDFs, month, workbook)
//!   POST /process       run the batch, render the summaries
//!   GET  /download/:id  updated workbook of a finished run
//!   GET  /api/health    liveness probe
//!
//! Finished runs stay downloadable for [`DOWNLOAD_TTL`]; expired runs are
//! dropped together with their job directory on the next upload or download.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Month;
use clap::Args;
use console::style;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use invsheet_core::models::{MONTH_NAMES, parse_month};
use invsheet_core::{Credentials, InvoiceDocument, InvoiceOutcome, InvsheetConfig};

use super::{build_pipeline, build_sinks, load_config, resolve_credentials};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const DOWNLOAD_TTL: Duration = Duration::from_secs(60 * 60);

/// Arguments for the serve command.
#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8501")]
    addr: SocketAddr,
}

#[derive(Clone)]
struct AppState {
    config: Arc<InvsheetConfig>,
    credentials: Arc<Credentials>,
    work_dir: Arc<TempDir>,
    downloads: Arc<Mutex<HashMap<Uuid, Download>>>,
    download_ttl: Duration,
}

struct Download {
    job_dir: PathBuf,
    path: PathBuf,
    file_name: String,
    created: Instant,
}

impl AppState {
    fn new(config: InvsheetConfig, credentials: Credentials) -> std::io::Result<Self> {
        Ok(Self {
            config: Arc::new(config),
            credentials: Arc::new(credentials),
            work_dir: Arc::new(tempfile::tempdir()?),
            downloads: Arc::default(),
            download_ttl: DOWNLOAD_TTL,
        })
    }

    /// Drop expired downloads and their job directories.
    fn prune_downloads(&self) {
        let Ok(mut downloads) = self.downloads.lock() else {
            return;
        };
        let expired: Vec<Uuid> = downloads
            .iter()
            .filter(|(_, d)| d.created.elapsed() >= self.download_ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(download) = downloads.remove(&id) {
                remove_job_dir(&download.job_dir);
            }
        }
    }
}

fn remove_job_dir(dir: &FsPath) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!("Failed to remove {}: {}", dir.display(), e);
    }
}

#[derive(Default)]
struct UploadForm {
    invoices: Vec<InvoiceDocument>,
    month: Option<String>,
    workbook: Option<(String, Vec<u8>)>,
    continue_on_error: bool,
}

/// Finished run: outcomes seen so far and the abort reason, if any.
struct RunResult {
    outcomes: Vec<InvoiceOutcome>,
    error: Option<String>,
}

pub async fn run(args: ServeArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let credentials = resolve_credentials(&config);
    let state = AppState::new(config, credentials)?;

    let listener = TcpListener::bind(args.addr).await?;
    println!(
        "{} Upload form at http://{}",
        style("✓").green(),
        listener.local_addr()?
    );
    info!("Serving on {}", args.addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/process", post(process))
        .route("/download/:id", get(download))
        .route("/api/health", get(|| async { "OK" }))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn index() -> Html<String> {
    Html(page("Invoice PDF Processing", &form_html()))
}

async fn process(State(state): State<AppState>, multipart: Multipart) -> Response {
    state.prune_downloads();
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(message) => return error_page(StatusCode::BAD_REQUEST, &message),
    };

    if form.invoices.is_empty() {
        return error_page(StatusCode::BAD_REQUEST, "Please upload the invoice PDFs.");
    }
    let Some((workbook_name, workbook_data)) = form.workbook else {
        return error_page(StatusCode::BAD_REQUEST, "Please upload the local master Excel file.");
    };
    let month = match form.month.as_deref().map(parse_month) {
        Some(Ok(month)) => month,
        Some(Err(e)) => return error_page(StatusCode::BAD_REQUEST, &e.to_string()),
        None => return error_page(StatusCode::BAD_REQUEST, "Please select the invoice month."),
    };

    let id = Uuid::new_v4();
    let job_dir = state.work_dir.path().join(id.to_string());
    let workbook_path = job_dir.join("workbook.xlsx");
    let staged = std::fs::create_dir_all(&job_dir).and_then(|_| std::fs::write(&workbook_path, &workbook_data));
    if let Err(e) = staged {
        warn!("Failed to stage upload: {}", e);
        remove_job_dir(&job_dir);
        return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Could not store the upload.");
    }

    info!(
        "Run {}: {} invoices for {}, workbook {}",
        id,
        form.invoices.len(),
        month.name(),
        workbook_name
    );

    let config = InvsheetConfig::clone(&state.config);
    let credentials = Credentials::clone(&state.credentials);
    let path = workbook_path.clone();
    let continue_on_error = form.continue_on_error;
    let invoices = form.invoices;

    // The pipeline holds the OCR engine, which is not Send, so the run is
    // driven on a blocking thread.
    let joined = tokio::task::spawn_blocking(move || {
        tokio::runtime::Handle::current().block_on(run_job(
            config,
            credentials,
            month,
            path,
            invoices,
            continue_on_error,
        ))
    })
    .await;

    let result = match joined {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            remove_job_dir(&job_dir);
            return error_page(StatusCode::BAD_GATEWAY, &format!("{:#}", e));
        }
        Err(e) => {
            remove_job_dir(&job_dir);
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    if let Ok(mut downloads) = state.downloads.lock() {
        downloads.insert(
            id,
            Download {
                job_dir,
                path: workbook_path,
                file_name: workbook_name,
                created: Instant::now(),
            },
        );
    }

    Html(page("Invoice PDF Processing", &results_html(id, &result))).into_response()
}

async fn run_job(
    config: InvsheetConfig,
    credentials: Credentials,
    month: Month,
    workbook: PathBuf,
    invoices: Vec<InvoiceDocument>,
    continue_on_error: bool,
) -> anyhow::Result<RunResult> {
    let pipeline = build_pipeline(config, &credentials)?;
    let mut sinks = build_sinks(pipeline.config(), &credentials, Some(month), &workbook, &workbook).await?;

    let mut outcomes = Vec::new();
    let result = pipeline
        .run_batch(&invoices, &mut sinks, continue_on_error, |o| outcomes.push(o.clone()))
        .await;

    Ok(RunResult {
        outcomes,
        error: result.err().map(|e| e.to_string()),
    })
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, String> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|e| e.body_text())?;

        match name.as_str() {
            "invoices" => {
                if data.is_empty() {
                    continue;
                }
                let file_name = file_name.unwrap_or_else(|| format!("invoice-{}.pdf", form.invoices.len() + 1));
                form.invoices.push(InvoiceDocument::new(file_name, data.to_vec()));
            }
            "workbook" if !data.is_empty() => {
                let file_name = file_name.unwrap_or_else(|| "workbook.xlsx".to_string());
                form.workbook = Some((file_name, data.to_vec()));
            }
            "month" => form.month = Some(String::from_utf8_lossy(&data).into_owned()),
            "continue_on_error" => form.continue_on_error = true,
            _ => {}
        }
    }
    Ok(form)
}

async fn download(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    state.prune_downloads();
    let entry = state
        .downloads
        .lock()
        .ok()
        .and_then(|downloads| downloads.get(&id).map(|d| (d.path.clone(), d.file_name.clone())));
    let Some((path, file_name)) = entry else {
        return (StatusCode::NOT_FOUND, "Unknown download").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let disposition = format!(
                "attachment; filename=\"{}\"",
                file_name.replace(['"', '\\'], "_")
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, XLSX_MIME.to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read workbook").into_response()
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1>\n{body}\n</body></html>",
        title = escape_html(title),
        body = body
    )
}

fn form_html() -> String {
    let options: String = MONTH_NAMES
        .iter()
        .map(|m| format!("<option value=\"{m}\">{m}</option>"))
        .collect();
    format!(
        "<form action=\"/process\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <p>Please Upload the Invoice PDFs<br><input type=\"file\" name=\"invoices\" accept=\".pdf\" multiple required></p>\n\
         <p>Please select the invoice month:<br><select name=\"month\">{options}</select></p>\n\
         <p>Please Upload the Local Master Excel File<br><input type=\"file\" name=\"workbook\" accept=\".xlsx\" required></p>\n\
         <p><label><input type=\"checkbox\" name=\"continue_on_error\" value=\"1\"> Continue when an invoice fails</label></p>\n\
         <p><button type=\"submit\">Process</button></p>\n\
         </form>"
    )
}

fn results_html(id: Uuid, result: &RunResult) -> String {
    let mut html = String::new();
    for outcome in &result.outcomes {
        if let Some(record) = &outcome.record {
            html.push_str(&format!(
                "<h3>{} Structured Summary:</h3>\n<pre>{}</pre>\n",
                escape_html(&outcome.name),
                escape_html(&record.summary())
            ));
        }
        if let Some(error) = &outcome.error {
            html.push_str(&format!(
                "<p class=\"error\">{}: {}</p>\n",
                escape_html(&outcome.name),
                escape_html(error)
            ));
        }
    }
    if let Some(error) = &result.error {
        html.push_str(&format!(
            "<p class=\"error\">Processing stopped: {}</p>\n",
            escape_html(error)
        ));
    }
    html.push_str(&format!(
        "<p><a href=\"/download/{id}\">Download Updated Excel</a></p>\n<p><a href=\"/\">Process more invoices</a></p>"
    ));
    html
}

fn error_page(status: StatusCode, message: &str) -> Response {
    let body = format!(
        "<p class=\"error\">{}</p>\n<p><a href=\"/\">Back</a></p>",
        escape_html(message)
    );
    (status, Html(page("Invoice PDF Processing", &body))).into_response()
}
