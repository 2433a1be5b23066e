//! Progress events for model downloads and the sinks that receive them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

/// Default minimum spacing between throttled progress events.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// One progress update: a fraction in `[0, 1]` and a human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub progress: f64,
    pub message: String,
}

/// Receiver of progress events. Events arrive in emission order.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: DownloadProgress);
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn emit(&self, event: DownloadProgress) {
        (**self).emit(event)
    }
}

impl ProgressSink for tokio::sync::mpsc::UnboundedSender<DownloadProgress> {
    fn emit(&self, event: DownloadProgress) {
        // The receiver going away means nobody is listening anymore.
        let _ = self.send(event);
    }
}

/// Sink backed by a closure.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    fn emit(&self, event: DownloadProgress) {
        (self.0)(event)
    }
}

/// Sink that tags events with a request id before forwarding them to a
/// channel of outbound messages.
pub struct ChannelSink<M> {
    tx: tokio::sync::mpsc::UnboundedSender<M>,
    wrap: Box<dyn Fn(DownloadProgress) -> M + Send + Sync>,
}

impl<M: Send> ChannelSink<M> {
    pub fn new(
        tx: tokio::sync::mpsc::UnboundedSender<M>,
        wrap: impl Fn(DownloadProgress) -> M + Send + Sync + 'static,
    ) -> Self {
        Self {
            tx,
            wrap: Box::new(wrap),
        }
    }
}

impl<M: Send> ProgressSink for ChannelSink<M> {
    fn emit(&self, event: DownloadProgress) {
        let _ = self.tx.send((self.wrap)(event));
    }
}

/// Shapes raw progress into what callers see: fractions never go backwards,
/// identical consecutive events are dropped, and throttled updates are
/// spaced at least `interval` apart.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    last: Option<DownloadProgress>,
    last_emit: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self::with_interval(sink, PROGRESS_INTERVAL)
    }

    pub fn with_interval(sink: Arc<dyn ProgressSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            last: None,
            last_emit: None,
        }
    }

    /// Emit immediately (phase changes, completion).
    pub fn report(&mut self, progress: f64, message: impl Into<String>) {
        self.emit(progress, message.into());
    }

    /// Emit unless the previous event went out less than `interval` ago.
    pub fn report_throttled(&mut self, progress: f64, message: impl FnOnce() -> String) {
        if let Some(at) = self.last_emit {
            if at.elapsed() < self.interval {
                return;
            }
        }
        self.emit(progress, message());
    }

    fn emit(&mut self, progress: f64, message: String) {
        let mut progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if let Some(last) = &self.last {
            progress = progress.max(last.progress);
            if progress == last.progress && message == last.message {
                return;
            }
        }

        let event = DownloadProgress { progress, message };
        debug!("Download progress: {:.3} {}", event.progress, event.message);
        self.last = Some(event.clone());
        self.last_emit = Some(Instant::now());
        self.sink.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_sink() -> (Arc<dyn ProgressSink>, Arc<Mutex<Vec<DownloadProgress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let sink: Arc<dyn ProgressSink> =
            Arc::new(FnSink(move |e: DownloadProgress| captured.lock().push(e)));
        (sink, events)
    }

    #[test]
    fn fractions_never_go_backwards() {
        let (sink, events) = recording_sink();
        let mut reporter = ProgressReporter::with_interval(sink, Duration::ZERO);

        reporter.report(0.0, "Fetching model info...");
        reporter.report(0.5, "Downloading... 1.0/2.0 GB");
        reporter.report(0.25, "Downloading... 0.5/2.0 GB");
        reporter.report(1.0, "Download complete");

        let progress: Vec<f64> = events.lock().iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![0.0, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn duplicates_are_coalesced() {
        let (sink, events) = recording_sink();
        let mut reporter = ProgressReporter::with_interval(sink, Duration::ZERO);

        reporter.report(0.1, "Downloading... 0.1/1.0 GB");
        reporter.report(0.1, "Downloading... 0.1/1.0 GB");
        reporter.report(0.1, "Downloading... 0.1/1.0 GB");

        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn throttled_reports_are_spaced() {
        let (sink, events) = recording_sink();
        let mut reporter = ProgressReporter::with_interval(sink, Duration::from_secs(3600));

        reporter.report(0.0, "Fetching model info...");
        for i in 1..50 {
            reporter.report_throttled(i as f64 / 100.0, || format!("step {}", i));
        }
        reporter.report(1.0, "Download complete");

        let messages: Vec<String> = events.lock().iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["Fetching model info...", "Download complete"]);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let (sink, events) = recording_sink();
        let mut reporter = ProgressReporter::with_interval(sink, Duration::ZERO);

        reporter.report(-3.0, "a");
        reporter.report(f64::NAN, "b");
        reporter.report(7.0, "c");

        let progress: Vec<f64> = events.lock().iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![0.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn channel_sink_preserves_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx, |e: DownloadProgress| (7u64, e));

        for i in 0..5 {
            sink.emit(DownloadProgress {
                progress: i as f64 / 10.0,
                message: format!("{}", i),
            });
        }
        drop(sink);

        let mut seen = Vec::new();
        while let Some((id, event)) = rx.recv().await {
            assert_eq!(id, 7);
            seen.push(event.message);
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
    }
}
