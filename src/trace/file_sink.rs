use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use super::record::{TraceLevel, TraceRecord};
use super::sink::{Sink, SinkError};

const SINK_NAME: &str = "FileSink";

/// Appends records to `{root_log_path}/Function/{function_name}/`, one daily-rotated,
/// UTF-8 text file per function. Records below `min_level` are dropped before they ever
/// reach the file.
pub struct FileSink {
    root_log_path: PathBuf,
    min_level: TraceLevel,
    appenders: Mutex<HashMap<String, Arc<Mutex<RollingFileAppender>>>>,
}

impl FileSink {
    pub fn new(root_log_path: impl Into<PathBuf>, min_level: TraceLevel) -> Self {
        Self {
            root_log_path: root_log_path.into(),
            min_level,
            appenders: Mutex::new(HashMap::new()),
        }
    }

    fn function_dir(&self, function_name: &str) -> PathBuf {
        self.root_log_path.join("Function").join(function_name)
    }

    fn appender_for(&self, function_name: &str) -> Arc<Mutex<RollingFileAppender>> {
        let mut appenders = self.appenders.lock();
        if let Some(existing) = appenders.get(function_name) {
            return existing.clone();
        }
        let appender = RollingFileAppender::new(
            Rotation::DAILY,
            self.function_dir(function_name),
            "function",
        );
        let appender = Arc::new(Mutex::new(appender));
        appenders.insert(function_name.to_string(), appender.clone());
        appender
    }
}

fn format_line(record: &TraceRecord) -> String {
    format!(
        "{} [{:?}] {}\n",
        record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        record.level,
        record.message
    )
}

#[async_trait::async_trait]
impl Sink for FileSink {
    async fn flush_batch(&self, records: Vec<TraceRecord>) -> Result<(), SinkError> {
        let mut by_function: HashMap<String, Vec<TraceRecord>> = HashMap::new();
        for record in records {
            if self.min_level.excludes(record.level) {
                continue;
            }
            let key = record
                .function_name
                .clone()
                .unwrap_or_else(|| "Host".to_string());
            by_function.entry(key).or_default().push(record);
        }
        if by_function.is_empty() {
            return Ok(());
        }

        for (function_name, records) in by_function {
            let appender = self.appender_for(&function_name);
            let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                let mut appender = appender.lock();
                for record in &records {
                    appender.write_all(format_line(record).as_bytes())?;
                }
                appender.flush()
            })
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(SinkError::Transient {
                        sink: SINK_NAME,
                        source: Box::new(e),
                    })
                }
                Err(join_err) => {
                    return Err(SinkError::Other {
                        sink: SINK_NAME,
                        message: join_err.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}
