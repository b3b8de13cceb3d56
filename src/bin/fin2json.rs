//! CLI binary for edgequake-fin2json.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and writes the compiled JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_fin2json::{
    extract_inputs, write_compiled, BatchOutput, ExtractionConfig, ExtractionProgressCallback,
    ProgressCallback, Task, UnitReport,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── Terminal styling ─────────────────────────────────────────────────────────

const GREEN: &str = "32";
const RED: &str = "31";
const CYAN: &str = "36";
const DIM: &str = "2";
const BOLD: &str = "1";

/// Wrap `s` in an ANSI SGR sequence.
fn paint(code: &str, s: &str) -> String {
    format!("\x1b[{code}m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a bar over all units plus one log line per unit.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Unit start times keyed by compiled-output key.
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` reports the unit total.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} units  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, key: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(key))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_units: usize) {
        self.activate_bar(total_units);
        self.bar.println(format!(
            "{} {}",
            paint(CYAN, "◆"),
            paint(BOLD, &format!("Extracting {total_units} units…"))
        ));
    }

    fn on_unit_start(&self, key: &str, _index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(key.to_string(), Instant::now());
        }
        self.bar.set_message(key.to_string());
    }

    fn on_unit_complete(&self, key: &str, fraction: f64) {
        self.bar.println(format!(
            "  {} {:<24}  {}  {}",
            paint(GREEN, "✓"),
            key,
            paint(DIM, &format!("{:>3.0}%", fraction * 100.0)),
            paint(DIM, &format!("{:.1}s", self.elapsed_secs(key))),
        ));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, key: &str, _fraction: f64, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<24}  {}  {}",
            paint(RED, "✗"),
            key,
            paint(RED, &msg),
            paint(DIM, &format!("{:.1}s", self.elapsed_secs(key))),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, file: usize, error: &str) {
        self.bar
            .println(format!("  {} file {:<19}  {}", paint(RED, "✗"), file, paint(RED, error)));
    }

    fn on_batch_complete(&self, total_units: usize, success_count: usize) {
        let failed = total_units.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} units extracted successfully",
                paint(GREEN, "✔"),
                paint(BOLD, &success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} units extracted  ({} failed)",
                if failed == total_units {
                    paint(RED, "✘")
                } else {
                    paint(CYAN, "⚠")
                },
                paint(BOLD, &success_count.to_string()),
                total_units,
                paint(RED, &failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Every field of every page, compiled JSON on stdout
  fin2json 1099-INT.pdf W-2.pdf

  # Mixed batch to a file
  fin2json 1099-DIV.pdf brokerage.xlsx -o extracted_data.json

  # Tax-summary schema from the first page of a projection
  fin2json --task summary projection.pdf -o summary.json

  # Review pages side by side with their JSON
  fin2json --report-dir review/ K-1.pdf -o k1.json

  # Use a specific model
  fin2json --provider anthropic --model claude-sonnet-4-20250514 W-2.pdf

OUTPUT KEYS:
  pdf_page_<n>               page n of a PDF
  pdf_file_<f>_page_<n>      page n of the f-th file, for every PDF after the first
  excel_file_<f>             the f-th file of the batch, a spreadsheet
  A failed unit keeps its key with a null value.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium when it is not on the library path
"#;

/// Extract structured JSON from tax PDFs and spreadsheets using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "fin2json",
    version,
    about = "Extract structured JSON from tax PDFs and spreadsheets using Vision LLMs",
    long_about = "Extract every field from tax and financial documents (PDF pages or \
spreadsheets, local files or URLs) into one JSON document using Vision Language Models. \
Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF or spreadsheet paths, or HTTP/HTTPS URLs, in batch order.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Write compiled JSON to this file instead of stdout.
    #[arg(short, long, env = "FIN2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// Extraction task: full (every field) or summary (fixed tax-summary schema).
    #[arg(long, env = "FIN2JSON_TASK", value_enum, default_value = "full")]
    task: TaskArg,

    /// Only extract page 1 of each PDF (default for --task summary).
    #[arg(long, env = "FIN2JSON_FIRST_PAGE_ONLY", conflicts_with = "all_pages")]
    first_page_only: bool,

    /// Extract every page of each PDF (default for --task full).
    #[arg(long, env = "FIN2JSON_ALL_PAGES")]
    all_pages: bool,

    /// Directory for a review report: page PNGs, per-unit JSON, index.html.
    #[arg(long, env = "FIN2JSON_REPORT_DIR")]
    report_dir: Option<PathBuf>,

    /// LLM model ID (default: gpt-4o).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Units in flight at once. 1 = strictly sequential.
    #[arg(short, long, env = "FIN2JSON_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FIN2JSON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per unit.
    #[arg(long, env = "FIN2JSON_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Longest edge of a rendered page, in pixels.
    #[arg(long, env = "FIN2JSON_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Path to a text file replacing the task prompt for page images.
    #[arg(long, env = "FIN2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Parent directory for intermediate artifacts (default: system temp dir).
    #[arg(long, env = "FIN2JSON_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "FIN2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FIN2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FIN2JSON_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "FIN2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-unit LLM call timeout in seconds.
    #[arg(long, env = "FIN2JSON_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum TaskArg {
    Full,
    Summary,
}

impl From<TaskArg> for Task {
    fn from(v: TaskArg) -> Self {
        match v {
            TaskArg::Full => Task::FullFieldExtraction,
            TaskArg::Summary => Task::TaxSummary,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs would fight with the progress bar.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract_inputs(&cli.inputs, &config)
        .await
        .context("Extraction failed")?;

    if let Some(ref dir) = cli.report_dir {
        write_report(dir, &output)
            .await
            .with_context(|| format!("Failed to write report to {}", dir.display()))?;
    }

    match cli.output {
        Some(ref output_path) => {
            write_compiled(&output, output_path)
                .await
                .context("Failed to write compiled JSON")?;
        }
        None => {
            let json = output
                .compiled
                .to_json_pretty()
                .context("Failed to serialise output")?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .and_then(|_| handle.write_all(b"\n"))
                .context("Failed to write to stdout")?;
        }
    }

    if !cli.quiet {
        let stats = &output.stats;
        let target = cli
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdout".to_string());
        eprintln!(
            "{}  {}/{} units  {} document failures  {}ms  →  {}",
            if stats.failed_units == 0 && stats.failed_documents == 0 {
                paint(GREEN, "✔")
            } else {
                paint(CYAN, "⚠")
            },
            stats.succeeded_units,
            stats.total_units,
            stats.failed_documents,
            stats.total_duration_ms,
            paint(BOLD, &target),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            paint(DIM, &stats.total_input_tokens.to_string()),
            paint(DIM, &stats.total_output_tokens.to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .task(cli.task.clone().into())
        .concurrency(cli.concurrency)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_rendered_pixels(cli.max_pixels)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        // The report needs page images after the artifact directory is gone.
        .retain_page_images(cli.report_dir.is_some());

    if cli.first_page_only {
        builder = builder.first_page_only(true);
    } else if cli.all_pages {
        builder = builder.first_page_only(false);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Write `<key>.png`, `<key>.json` and an `index.html` pairing them.
async fn write_report(dir: &Path, output: &BatchOutput) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>fin2json report</title>\n\
         <style>body{font-family:sans-serif} .unit{display:flex;gap:1em;margin:1em 0;\
         border-top:1px solid #ccc;padding-top:1em} img{max-width:50%} \
         pre{white-space:pre-wrap} .err{color:#b00}</style></head><body>\n",
    );

    for unit in &output.units {
        let json_name = format!("{}.json", unit.key);
        tokio::fs::write(dir.join(&json_name), unit_json(unit)?).await?;

        html.push_str(&format!("<div class=\"unit\"><h3>{}</h3>", escape_html(&unit.key)));
        if let Some(ref png) = unit.image_png {
            let png_name = format!("{}.png", unit.key);
            tokio::fs::write(dir.join(&png_name), png).await?;
            html.push_str(&format!("<img src=\"{png_name}\" alt=\"{}\">", unit.key));
        }
        match (&unit.fields, &unit.error) {
            (Some(fields), _) => html.push_str(&format!(
                "<pre>{}</pre>",
                escape_html(&serde_json::to_string_pretty(fields)?)
            )),
            (None, Some(err)) => html.push_str(&format!(
                "<pre class=\"err\">{}: {}</pre>",
                unit.error_kind.as_deref().unwrap_or("Error"),
                escape_html(err)
            )),
            (None, None) => {}
        }
        html.push_str("</div>\n");
    }

    for failure in &output.document_failures {
        html.push_str(&format!(
            "<div class=\"unit\"><h3>file {} ({})</h3><pre class=\"err\">{}</pre></div>\n",
            failure.file,
            escape_html(&failure.name),
            escape_html(&failure.error.to_string())
        ));
    }
    html.push_str("</body></html>\n");

    tokio::fs::write(dir.join("index.html"), html).await?;
    Ok(())
}

fn unit_json(unit: &UnitReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(unit)?)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["fin2json", "a.pdf", "b.xlsx"]);
        assert_eq!(cli.inputs, vec!["a.pdf", "b.xlsx"]);
        assert_eq!(cli.concurrency, 1);
        assert!(matches!(cli.task, TaskArg::Full));
    }

    #[test]
    fn page_flags_conflict() {
        assert!(Cli::try_parse_from(["fin2json", "--first-page-only", "--all-pages", "a.pdf"]).is_err());
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(escape_html("<a & \"b\">"), "&lt;a &amp; &quot;b&quot;&gt;");
    }
}
