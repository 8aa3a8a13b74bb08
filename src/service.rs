//! AnalysisService: runs page sessions against a shared knowledge base.
//!
//! Pages are analyzed with bounded parallelism. A page that fails becomes an
//! error-flagged report; it never stops the run.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::capture::PageCapture;
use crate::config::AnalyzerConfig;
use crate::engine::knowledge::{AnalyticsAnnotation, KnowledgeBase, KnowledgeBaseMatcher};
use crate::engine::report::{SitemapAccumulator, SitemapMeta};
use crate::engine::session::{spawn_page_session, PageSignal};
use crate::engine::{PageAnalyzer, PageDiagnostics, PageOutcome};
use crate::error::AnalyzerError;
use crate::models::{PageReport, SitemapReport};

/// One page to analyze.
#[derive(Debug, Clone)]
pub enum PageInput {
    Capture(PageCapture),
    File(PathBuf),
}

impl PageInput {
    fn label(&self) -> String {
        match self {
            PageInput::Capture(capture) => capture.page_url.clone(),
            PageInput::File(path) => path.display().to_string(),
        }
    }
}

/// Progress after one page of a sitemap run completes.
#[derive(Debug)]
pub struct Progress<'a> {
    pub done: usize,
    pub total: usize,
    pub report: &'a PageReport,
    pub accumulator: &'a SitemapAccumulator,
}

/// Result of a sitemap run.
#[derive(Debug)]
pub struct SitemapRun {
    pub report: SitemapReport,
    pub diagnostics: Vec<PageDiagnostics>,
    /// Pages never started because the run was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
}

/// Cookie analysis service.
#[derive(Debug, Clone)]
pub struct AnalysisService {
    kb: Arc<KnowledgeBase>,
    matcher: KnowledgeBaseMatcher,
    config: AnalyzerConfig,
}

impl AnalysisService {
    pub fn new(kb: KnowledgeBase, config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        config.validate()?;
        let kb = Arc::new(kb);
        tracing::info!(
            "Knowledge base v{} loaded ({} entries)",
            kb.version(),
            kb.len()
        );
        Ok(Self {
            matcher: KnowledgeBaseMatcher::new(Arc::clone(&kb)),
            kb,
            config,
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn lookup(&self, name: &str, domain: &str) -> AnalyticsAnnotation {
        self.matcher.lookup(name, domain)
    }

    /// Replay one capture through a page session.
    pub async fn analyze_page(&self, capture: PageCapture, cancel: &CancellationToken) -> PageOutcome {
        let PageCapture {
            page_url,
            frames,
            events,
            navigation_settled,
            navigation_error,
            technology_data,
            library_matches,
        } = capture;

        let analyzer = match PageAnalyzer::new(page_url.clone(), Arc::clone(&self.kb), &self.config) {
            Ok(analyzer) => analyzer,
            Err(e) => {
                tracing::warn!("Skipping page {}: {}", page_url, e);
                return error_outcome(PageReport::error(page_url, e.to_string(), e.code()));
            }
        };

        let handle = spawn_page_session(analyzer, &self.config, cancel.clone());
        let mut signals = Vec::with_capacity(events.len() + 3);
        signals.push(PageSignal::Frames(frames));
        signals.push(PageSignal::Passthrough {
            technology_data,
            library_matches,
        });
        signals.extend(events.into_iter().map(PageSignal::Event));
        if let Some(reason) = navigation_error {
            signals.push(PageSignal::NavigationFailed(reason));
        } else if navigation_settled {
            signals.push(PageSignal::NavigationSettled);
        }

        let total = signals.len();
        for (sent, signal) in signals.into_iter().enumerate() {
            if !handle.send(signal).await {
                tracing::warn!(
                    "Session for {} ended with {} of {} signal(s) undelivered",
                    page_url,
                    total - sent,
                    total
                );
                break;
            }
        }

        match handle.finish().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Page session for {} failed: {}", page_url, e);
                error_outcome(PageReport::error(page_url, e.to_string(), "SESSION_PANIC"))
            }
        }
    }

    async fn analyze_input(&self, input: PageInput, cancel: &CancellationToken) -> PageOutcome {
        match input {
            PageInput::Capture(capture) => self.analyze_page(capture, cancel).await,
            PageInput::File(path) => match PageCapture::load(&path).await {
                Ok(capture) => self.analyze_page(capture, cancel).await,
                Err(e) => {
                    tracing::warn!("{}", e);
                    error_outcome(PageReport::error(
                        path.display().to_string(),
                        e.to_string(),
                        e.code(),
                    ))
                }
            },
        }
    }

    /// Analyze many pages with at most `concurrency` in flight.
    ///
    /// Reports are accumulated in input order. On cancellation in-flight pages
    /// finalize as partial and pages not yet started are skipped.
    pub async fn analyze_sitemap<F>(
        &self,
        inputs: Vec<PageInput>,
        meta: SitemapMeta,
        cancel: CancellationToken,
        mut on_progress: F,
    ) -> SitemapRun
    where
        F: FnMut(&Progress<'_>),
    {
        let total = inputs.len();
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(
            "Run {}: analyzing {} page(s) with concurrency {}",
            run_id,
            total,
            self.config.concurrency
        );

        let accumulator = SitemapAccumulator::new(meta);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = FuturesUnordered::new();
        let mut diagnostics = Vec::with_capacity(total);
        let mut done = 0;

        let mut queue = inputs.into_iter().enumerate();
        let mut next = queue.next();
        let mut skipped = 0;

        while let Some((index, input)) = next.take() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    skipped = 1 + queue.len();
                    break;
                }
                Some((finished, label, joined)) = tasks.next(), if !tasks.is_empty() => {
                    let outcome = joined_outcome(label, joined);
                    done += 1;
                    diagnostics.push(outcome.diagnostics);
                    accumulator.push(finished, outcome.report.clone());
                    on_progress(&Progress { done, total, report: &outcome.report, accumulator: &accumulator });
                    // Still waiting for a permit for this input.
                    next = Some((index, input));
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!("Worker pool closed, skipping remaining pages");
                            skipped = 1 + queue.len();
                            break;
                        }
                    };
                    let service = self.clone();
                    let task_cancel = cancel.clone();
                    let label = input.label();
                    let handle = tokio::spawn(async move {
                        let _permit = permit;
                        service.analyze_input(input, &task_cancel).await
                    });
                    tasks.push(async move { (index, label, handle.await) });
                    next = queue.next();
                }
            }
        }

        while let Some((index, label, joined)) = tasks.next().await {
            let outcome = joined_outcome(label, joined);
            done += 1;
            diagnostics.push(outcome.diagnostics);
            accumulator.push(index, outcome.report.clone());
            on_progress(&Progress {
                done,
                total,
                report: &outcome.report,
                accumulator: &accumulator,
            });
        }

        if skipped > 0 {
            tracing::warn!("Run {}: cancelled, {} page(s) not started", run_id, skipped);
        }
        let report = accumulator.into_report();
        tracing::info!(
            "Run {}: {} page(s) analyzed, {} errored",
            run_id,
            report.json.len(),
            report.errored_out_urls.len()
        );

        SitemapRun {
            report,
            diagnostics,
            skipped,
            cancelled: cancel.is_cancelled(),
        }
    }
}

fn error_outcome(report: PageReport) -> PageOutcome {
    PageOutcome {
        report,
        diagnostics: PageDiagnostics::default(),
    }
}

fn joined_outcome(label: String, joined: Result<PageOutcome, tokio::task::JoinError>) -> PageOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Page task for {} failed: {}", label, e);
            error_outcome(PageReport::error(label, e.to_string(), "SESSION_PANIC"))
        }
    }
}
