use super::record::TraceRecord;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("{sink}: {source}")]
    Transient {
        sink: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{sink}: {message}")]
    Other { sink: &'static str, message: String },
}

/// A concrete destination for a batch of [`TraceRecord`]s. Implementors own nothing about
/// ordering across batches — only within one call, in insertion order.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn flush_batch(&self, records: Vec<TraceRecord>) -> Result<(), SinkError>;
}

/// Accepts and discards every batch. Used by [`crate::trace::factory::TraceWriterFactory`]
/// when neither SQL nor file logging is configured.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait::async_trait]
impl Sink for NullSink {
    async fn flush_batch(&self, _records: Vec<TraceRecord>) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Fans a batch out to an ordered list of sinks. A failure in one sink is surfaced but does
/// not stop the others from being attempted.
pub struct CompositeSink {
    sinks: Vec<std::sync::Arc<dyn Sink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait::async_trait]
impl Sink for CompositeSink {
    async fn flush_batch(&self, records: Vec<TraceRecord>) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.flush_batch(records.clone()).await {
                log::warn!("composite sink member failed: {e}");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
