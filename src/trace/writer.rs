use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use super::record::{TraceEvent, TraceLevel, TraceRecord};
use super::sink::{Sink, SinkError};

const FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Minimal capability a producer needs to hand trace events to something that will
/// eventually ship them. [`crate::lease::LeaseManager`] depends on this trait, not on
/// [`BufferedTraceWriter`] directly, so the two subsystems never grow a cyclic dependency.
pub trait TraceSink: Send + Sync {
    fn trace(&self, event: TraceEvent);
}

/// Accepts trace events from any number of producers, filters them, buffers them in memory,
/// and flushes batches to a pluggable [`Sink`] on a fixed 1s cadence (and on [`dispose`](
/// Self::dispose)).
pub struct BufferedTraceWriter {
    level: TraceLevel,
    system_traces_enabled: bool,
    sink: Arc<dyn Sink>,
    buffer: SyncMutex<Vec<TraceRecord>>,
    /// Serializes flush invocations: held for the full swap-then-sink-write critical
    /// section so two flushes of the same writer can never run concurrently.
    flush_lock: AsyncMutex<()>,
    disposed: AtomicBool,
    abort_handle: SyncMutex<Option<AbortHandle>>,
    /// Stamped onto events that don't carry their own `function_name` — set by
    /// [`crate::trace::factory::TraceWriterFactory`] when it builds a writer scoped to one
    /// function.
    default_function_name: Option<String>,
}

impl BufferedTraceWriter {
    pub fn new(level: TraceLevel, system_traces_enabled: bool, sink: Arc<dyn Sink>) -> Arc<Self> {
        Self::with_default_function_name(level, system_traces_enabled, sink, None)
    }

    pub fn with_default_function_name(
        level: TraceLevel,
        system_traces_enabled: bool,
        sink: Arc<dyn Sink>,
        default_function_name: Option<String>,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            level,
            system_traces_enabled,
            sink,
            buffer: SyncMutex::new(Vec::new()),
            flush_lock: AsyncMutex::new(()),
            disposed: AtomicBool::new(false),
            abort_handle: SyncMutex::new(None),
            default_function_name,
        });
        this.clone().start_flush_timer();
        this
    }

    fn start_flush_timer(self: Arc<Self>) {
        let (abort_handle, abort_reg) = AbortHandle::new_pair();
        *self.abort_handle.lock() = Some(abort_handle);
        tokio::spawn(Abortable::new(
            async move {
                let mut interval = tokio::time::interval(FLUSH_INTERVAL);
                loop {
                    interval.tick().await;
                    if let Err(e) = self.flush().await {
                        log::warn!("periodic trace flush failed: {e}");
                    }
                }
            },
            abort_reg,
        ));
    }

    /// Appends one [`TraceRecord`] per message line. Events past the configured level or
    /// system-trace policy are silently discarded. Synchronous so producers never need to
    /// `.await` to log.
    pub fn trace(&self, event: TraceEvent) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if !self.system_traces_enabled && event.is_system_trace() {
            return;
        }
        if self.level.excludes(event.level) {
            return;
        }

        let mut lines = Vec::with_capacity(2);
        lines.push(event.message.trim().to_string());
        if let Some(exception) = &event.exception {
            lines.push(exception.render_line().trim().to_string());
        }

        let now = Utc::now();
        let function_name = event
            .function_name
            .clone()
            .or_else(|| self.default_function_name.clone());
        let records = lines.into_iter().map(|message| TraceRecord {
            timestamp: now,
            level: event.level,
            message,
            function_name: function_name.clone(),
        });

        self.buffer.lock().extend(records);
    }

    /// Swaps the buffer for an empty one and flushes the snapshot to the sink. A no-op if
    /// the buffer was empty at either check.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let _serialize = self.flush_lock.lock().await;
        let batch = {
            let mut guard = self.buffer.lock();
            if guard.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *guard)
        };
        if batch.is_empty() {
            return Ok(());
        }
        self.sink.flush_batch(batch).await
    }

    /// Stops the flush timer, performs one final flush, and marks the writer disposed.
    /// Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.abort_handle.lock().take() {
            handle.abort();
        }
        if let Err(e) = self.flush().await {
            log::warn!("final trace flush on dispose failed: {e}");
        }
    }
}

impl TraceSink for BufferedTraceWriter {
    fn trace(&self, event: TraceEvent) {
        BufferedTraceWriter::trace(self, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::record::{ExceptionKind, PropertyValue, TraceException};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    struct CapturingSink {
        batches: SyncMutex<Vec<Vec<TraceRecord>>>,
        calls: AtomicUsize,
    }

    impl CapturingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: SyncMutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Sink for CapturingSink {
        async fn flush_batch(&self, records: Vec<TraceRecord>) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().push(records);
            Ok(())
        }
    }

    #[tokio::test]
    async fn filters_by_level() {
        let sink = CapturingSink::new();
        let writer = BufferedTraceWriter::new(TraceLevel::Info, true, sink.clone());
        writer.trace(TraceEvent::new(TraceLevel::Verbose, "too quiet to keep"));
        writer.trace(TraceEvent::new(TraceLevel::Error, "kept"));
        writer.flush().await.unwrap();

        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].level, TraceLevel::Error);
        assert_eq!(batches[0][0].message, "kept");
    }

    #[tokio::test]
    async fn filters_system_traces_when_disabled() {
        let sink = CapturingSink::new();
        let writer = BufferedTraceWriter::new(TraceLevel::Verbose, false, sink.clone());
        writer.trace(
            TraceEvent::new(TraceLevel::Info, "internal")
                .with_property("isSystemTrace", PropertyValue::Bool(true)),
        );
        writer.trace(TraceEvent::new(TraceLevel::Info, "user visible"));
        writer.flush().await.unwrap();

        let batches = sink.batches.lock();
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].message, "user visible");
    }

    #[tokio::test]
    async fn exception_collapses_to_innermost_for_function_invocation() {
        let sink = CapturingSink::new();
        let writer = BufferedTraceWriter::new(TraceLevel::Verbose, true, sink.clone());
        let inner = TraceException::new(ExceptionKind::Other, "division by zero");
        let outer = TraceException::new(ExceptionKind::FunctionInvocation, "script failed")
            .with_inner(inner);
        writer.trace(TraceEvent::new(TraceLevel::Error, "invocation failed").with_exception(outer));
        writer.flush().await.unwrap();

        let batches = sink.batches.lock();
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][1].message, "division by zero");
    }

    #[tokio::test]
    async fn flush_is_noop_when_buffer_empty() {
        let sink = CapturingSink::new();
        let writer = BufferedTraceWriter::new(TraceLevel::Verbose, true, sink.clone());
        writer.flush().await.unwrap();
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_timer_flushes_on_cadence() {
        let sink = CapturingSink::new();
        let writer = BufferedTraceWriter::new(TraceLevel::Verbose, true, sink.clone());

        writer.trace(TraceEvent::new(TraceLevel::Info, "a"));
        writer.trace(TraceEvent::new(TraceLevel::Info, "b"));
        writer.trace(TraceEvent::new(TraceLevel::Info, "c"));

        tokio::time::advance(StdDuration::from_millis(1100)).await;
        tokio::task::yield_now().await;

        {
            let batches = sink.batches.lock();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 3);
        }

        writer.trace(TraceEvent::new(TraceLevel::Info, "d"));
        writer.trace(TraceEvent::new(TraceLevel::Info, "e"));

        tokio::time::advance(StdDuration::from_millis(1000)).await;
        tokio::task::yield_now().await;

        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 2);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_flushes_final_batch() {
        let sink = CapturingSink::new();
        let writer = BufferedTraceWriter::new(TraceLevel::Verbose, true, sink.clone());
        writer.trace(TraceEvent::new(TraceLevel::Info, "last one"));
        writer.dispose().await;
        writer.dispose().await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }
}
