//! PSAT Analyzer - replay page captures and write cookie reports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use psat_analyzer::service::Progress;
use psat_analyzer::{
    AnalysisService, AnalyzerConfig, CookieSummary, KnowledgeBase, PageInput, SitemapMeta,
    SitemapReport, SourceType,
};

const DEFAULT_OUTPUT_DIR: &str = "~/.psat/reports";

#[derive(Parser)]
#[command(name = "psat-analyzer")]
#[command(about = "Cookie classification and blocking-reason analysis for page captures")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output JSON (for agent consumption)
    #[arg(long, global = true)]
    json: bool,

    /// Cookie database to use instead of the built-in one
    #[arg(long, global = true)]
    knowledge_base: Option<String>,

    /// Idle time after navigation settles before a page is finalized
    #[arg(long, global = true, default_value_t = 1500)]
    quiescence_ms: u64,

    /// Hard limit per page
    #[arg(long, global = true, default_value_t = 60)]
    page_timeout_secs: u64,

    /// URL-less frames nested deeper than this are reported as unknown
    #[arg(long, global = true, default_value_t = 8)]
    max_frame_depth: usize,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single page capture
    Page {
        /// Capture file
        capture: String,
        /// Report path (default: ~/.psat/reports/<host>.json)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Analyze many page captures as one sitemap run
    Sitemap {
        /// Capture files, in report order
        captures: Vec<String>,
        /// Also analyze every *.json capture in this directory
        #[arg(long)]
        dir: Option<String>,
        /// Site the URL list was built for
        #[arg(long)]
        site: Option<String>,
        /// Where the URL list came from
        #[arg(long, value_enum, default_value_t = SourceType::Sitemap)]
        source_type: SourceType,
        /// Pages analyzed in parallel
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,
        /// Report path (default: ~/.psat/reports/sitemap-<timestamp>.json)
        #[arg(short, long)]
        output: Option<String>,
        /// Rewrite the report after every completed page
        #[arg(long)]
        progressive: bool,
    },

    /// Look up a cookie in the knowledge base
    Lookup {
        /// Cookie name
        name: String,
        /// Cookie domain
        domain: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let kb = match &cli.knowledge_base {
        Some(path) => KnowledgeBase::load(&expand(path))
            .with_context(|| format!("Failed to load knowledge base {}", path))?,
        None => KnowledgeBase::builtin().context("Failed to load built-in knowledge base")?,
    };

    let mut config = AnalyzerConfig {
        quiescence: Duration::from_millis(cli.quiescence_ms),
        page_timeout: Duration::from_secs(cli.page_timeout_secs),
        max_frame_depth: cli.max_frame_depth,
        ..AnalyzerConfig::default()
    };
    if let Commands::Sitemap { concurrency, .. } = &cli.command {
        config.concurrency = *concurrency;
    }
    let service = AnalysisService::new(kb, config).context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight pages");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Page { capture, output } => {
            cmd_page(&service, &capture, output, cancel, cli.json).await
        }
        Commands::Sitemap {
            captures,
            dir,
            site,
            source_type,
            concurrency: _,
            output,
            progressive,
        } => {
            let inputs = collect_inputs(captures, dir.as_deref())?;
            let meta = SitemapMeta::new(source_type, site.unwrap_or_default());
            cmd_sitemap(&service, inputs, meta, output, progressive, cancel, cli.json).await
        }
        Commands::Lookup { name, domain } => cmd_lookup(&service, &name, &domain, cli.json),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "psat_analyzer=debug"
    } else {
        "psat_analyzer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

fn output_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".psat").join("reports"),
        None => expand(DEFAULT_OUTPUT_DIR),
    }
}

fn collect_inputs(captures: Vec<String>, dir: Option<&str>) -> Result<Vec<PageInput>> {
    let mut paths: Vec<PathBuf> = captures.iter().map(|c| expand(c)).collect();
    if let Some(dir) = dir {
        let dir = expand(dir);
        let mut found: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read capture directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        found.sort();
        paths.extend(found);
    }
    if paths.is_empty() {
        bail!("No captures given. Pass capture files or --dir");
    }
    Ok(paths.into_iter().map(PageInput::File).collect())
}

fn write_report(path: &Path, report: &SitemapReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    let json = serde_json::to_string_pretty(report)?;
    // Replace atomically; progressive readers may open the file at any time.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn print_summary(summary: &CookieSummary) {
    println!("Cookies:        {}", summary.total_cookies);
    println!("  First-party:  {}", summary.total_first_party_cookies);
    println!("  Third-party:  {}", summary.total_third_party_cookies);
    println!("  Analytics:    {}", summary.analytics_cookies);
    println!("  Marketing:    {}", summary.marketing_cookies);
    println!("  Functional:   {}", summary.functional_cookies);
    println!("  Other:        {}", summary.uncategorized_cookies);
    println!("With issues:    {}", summary.cookies_with_issues);
    println!("  Blocked:      {}", summary.blocked_cookies);
    println!("  Exempted:     {}", summary.exempted_cookies);
    println!("Orphaned:       {}", summary.orphaned_cookies);
}

async fn cmd_page(
    service: &AnalysisService,
    capture: &str,
    output: Option<String>,
    cancel: CancellationToken,
    json_output: bool,
) -> Result<()> {
    let path = expand(capture);
    let run = service
        .analyze_sitemap(
            vec![PageInput::File(path)],
            SitemapMeta::new(SourceType::Url, ""),
            cancel,
            |_| {},
        )
        .await;

    let mut report = run.report;
    if let Some(page) = report.json.first() {
        report.selected_site = page.page_url.clone();
    }
    let out = match output {
        Some(o) => expand(&o),
        None => {
            let host = report
                .json
                .first()
                .and_then(|p| url::Url::parse(&p.page_url).ok())
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| "page".to_string());
            output_dir().join(format!("{}.json", host))
        }
    };
    write_report(&out, &report)?;

    let summary = report.summary();
    if json_output {
        let line = serde_json::json!({
            "output": out.display().to_string(),
            "summary": summary,
            "erroredOutUrls": report.errored_out_urls,
            "note": report.json.first().and_then(|p| p.note.clone()),
        });
        println!("{}", line);
    } else {
        if let Some(page) = report.json.first() {
            println!("Page: {}", page.page_url);
            if let Some(note) = &page.note {
                println!("Note: {:?} - {}", note.status, note.reason);
            }
        }
        print_summary(&summary);
        println!("Report: {}", out.display());
    }
    Ok(())
}

async fn cmd_sitemap(
    service: &AnalysisService,
    inputs: Vec<PageInput>,
    meta: SitemapMeta,
    output: Option<String>,
    progressive: bool,
    cancel: CancellationToken,
    json_output: bool,
) -> Result<()> {
    let out = match output {
        Some(o) => expand(&o),
        None => output_dir().join(format!(
            "sitemap-{}.json",
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
        )),
    };

    let progress_out = out.clone();
    let run = service
        .analyze_sitemap(inputs, meta, cancel, |progress: &Progress<'_>| {
            tracing::info!(
                "[{}/{}] {}",
                progress.done,
                progress.total,
                progress.report.page_url
            );
            if progressive {
                if let Err(e) = write_report(&progress_out, &progress.accumulator.snapshot()) {
                    tracing::warn!("Progressive write failed: {:#}", e);
                }
            }
        })
        .await;

    write_report(&out, &run.report)?;

    let summary = run.report.summary();
    if json_output {
        let line = serde_json::json!({
            "output": out.display().to_string(),
            "pages": run.report.json.len(),
            "skipped": run.skipped,
            "cancelled": run.cancelled,
            "summary": summary,
            "erroredOutUrls": run.report.errored_out_urls,
        });
        println!("{}", line);
    } else {
        println!("Pages:          {}", run.report.json.len());
        if run.skipped > 0 {
            println!("Skipped:        {}", run.skipped);
        }
        for errored in &run.report.errored_out_urls {
            println!("Errored:        {} ({})", errored.url, errored.error_code);
        }
        print_summary(&summary);
        println!("Report: {}", out.display());
    }
    Ok(())
}

fn cmd_lookup(service: &AnalysisService, name: &str, domain: &str, json_output: bool) -> Result<()> {
    let annotation = service.lookup(name, domain);
    if json_output {
        println!("{}", serde_json::to_string(&annotation)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&annotation)?);
    }
    Ok(())
}
