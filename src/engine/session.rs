//! Page session actor.
//!
//! One tokio task owns a page's [`PageAnalyzer`] and receives driver signals
//! over a channel, so every merge into the page's cookie store is serialized.
//! The session ends when navigation has settled and the page has been quiet
//! for the quiescence period, when the driver closes the channel, on the hard
//! page timeout, or on cancellation.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::AnalyzerConfig;
use crate::engine::events::FrameSnapshot;
use crate::engine::{PageAnalyzer, PageOutcome};
use crate::models::PageNote;

const SIGNAL_BUFFER: usize = 256;

/// What the browser driver tells a page session.
#[derive(Debug, Clone)]
pub enum PageSignal {
    Frames(Vec<FrameSnapshot>),
    Event(Value),
    /// Load finished and any banner interaction is done.
    NavigationSettled,
    NavigationFailed(String),
    Passthrough {
        technology_data: Value,
        library_matches: Value,
    },
}

/// Driver-side handle to a running page session.
#[derive(Debug)]
pub struct PageHandle {
    tx: mpsc::Sender<PageSignal>,
    join: JoinHandle<PageOutcome>,
}

impl PageHandle {
    /// Send a signal. Returns `false` once the session has finalized.
    pub async fn send(&self, signal: PageSignal) -> bool {
        self.tx.send(signal).await.is_ok()
    }

    /// Close the channel and wait for the report.
    pub async fn finish(self) -> Result<PageOutcome, JoinError> {
        drop(self.tx);
        self.join.await
    }
}

/// Spawn the session task for one page.
pub fn spawn_page_session(
    analyzer: PageAnalyzer,
    config: &AnalyzerConfig,
    cancel: CancellationToken,
) -> PageHandle {
    let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
    let span = tracing::info_span!("page", url = %analyzer.page_url());
    let join = tokio::spawn(
        run_session(analyzer, rx, config.quiescence, config.page_timeout, cancel)
            .instrument(span),
    );
    PageHandle { tx, join }
}

async fn run_session(
    mut analyzer: PageAnalyzer,
    mut rx: mpsc::Receiver<PageSignal>,
    quiescence: Duration,
    page_timeout: Duration,
    cancel: CancellationToken,
) -> PageOutcome {
    let deadline = sleep(page_timeout);
    tokio::pin!(deadline);
    let idle = sleep(quiescence);
    tokio::pin!(idle);
    let mut settled = false;

    let note = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::info!("Cancelled while analyzing {}", analyzer.page_url());
                break Some(PageNote::partial("cancelled"));
            }
            _ = &mut deadline => {
                tracing::warn!("Hard timeout ({:?}) reached for {}", page_timeout, analyzer.page_url());
                break Some(PageNote::partial("hard timeout"));
            }
            signal = rx.recv() => {
                match signal {
                    Some(PageSignal::Event(raw)) => analyzer.ingest_value(raw),
                    Some(PageSignal::Frames(frames)) => analyzer.declare_frames(&frames),
                    Some(PageSignal::NavigationSettled) => settled = true,
                    Some(PageSignal::NavigationFailed(reason)) => {
                        tracing::warn!("Navigation failed for {}: {}", analyzer.page_url(), reason);
                        break Some(PageNote::partial(format!("navigation failed: {}", reason)));
                    }
                    Some(PageSignal::Passthrough { technology_data, library_matches }) => {
                        analyzer.set_passthrough(technology_data, library_matches);
                    }
                    None if settled => break None,
                    None => break Some(PageNote::partial("navigation did not settle")),
                }
                idle.as_mut().reset(Instant::now() + quiescence);
            }
            _ = &mut idle, if settled => {
                tracing::debug!("{} quiet for {:?}, finalizing", analyzer.page_url(), quiescence);
                break None;
            }
        }
    };

    // Anything the driver queued before we stopped listening is past the
    // page's end: frames go through the sealed registry, the rest is dropped.
    analyzer.seal();
    rx.close();
    while let Ok(signal) = rx.try_recv() {
        match signal {
            PageSignal::Frames(frames) => analyzer.declare_frames(&frames),
            PageSignal::Event(raw) => analyzer.ingest_late(raw),
            _ => {}
        }
    }

    analyzer.finalize(note)
}
