use std::path::PathBuf;
use std::sync::Arc;

use super::error::Error;
use super::file_sink::FileSink;
use super::record::TraceLevel;
use super::sink::{CompositeSink, NullSink, Sink};
use super::sql_sink::SqlSink;
use super::writer::BufferedTraceWriter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileLoggingMode {
    Always,
    DebugOnly,
    Never,
}

/// Already-resolved settings the factory needs. The caller is responsible for reading the
/// standalone-mode environment variable and resolving the `SqlTracer` connection string —
/// no process-global lookups happen inside this crate.
#[derive(Clone, Debug)]
pub struct ScriptHostConfig {
    pub standalone: bool,
    pub sql_tracer_connection_string: Option<String>,
    pub site_name: String,
    pub instance_id: String,
    pub file_logging_mode: FileLoggingMode,
    pub root_log_path: PathBuf,
    pub console_level: TraceLevel,
}

pub struct TraceWriterFactory;

impl TraceWriterFactory {
    /// Builds the sink configuration appropriate for `function_name` and wraps it in a
    /// [`BufferedTraceWriter`] scoped to that function. If any
    /// component fails to construct, everything already built is dropped (ordinary Rust
    /// ownership does this for us — no sink in this crate holds a resource that needs an
    /// explicit async teardown before its constructor has returned) before the error
    /// propagates.
    pub fn create(
        function_name: &str,
        config: &ScriptHostConfig,
    ) -> Result<Arc<BufferedTraceWriter>, Error> {
        let sink: Arc<dyn Sink> = if config.standalone {
            let connection_string = config.sql_tracer_connection_string.as_deref().ok_or_else(|| {
                Error::SinkConstruction(
                    "standalone mode requires a resolvable SqlTracer connection string".into(),
                )
            })?;
            let sql = SqlSink::new(connection_string, &config.site_name, &config.instance_id)?;
            let file = FileSink::new(config.root_log_path.clone(), config.console_level);
            Arc::new(CompositeSink::new(vec![Arc::new(sql), Arc::new(file)]))
        } else if config.file_logging_mode != FileLoggingMode::Never {
            Arc::new(FileSink::new(config.root_log_path.clone(), config.console_level))
        } else {
            Arc::new(NullSink)
        };

        Ok(BufferedTraceWriter::with_default_function_name(
            config.console_level,
            true,
            sink,
            Some(function_name.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ScriptHostConfig {
        ScriptHostConfig {
            standalone: false,
            sql_tracer_connection_string: None,
            site_name: "mysite".into(),
            instance_id: "instance-1".into(),
            file_logging_mode: FileLoggingMode::Always,
            root_log_path: std::env::temp_dir(),
            console_level: TraceLevel::Info,
        }
    }

    #[tokio::test]
    async fn file_logging_mode_never_yields_null_sink_equivalent_writer() {
        let mut config = base_config();
        config.file_logging_mode = FileLoggingMode::Never;
        let writer = TraceWriterFactory::create("MyFunction", &config).unwrap();
        writer.trace(crate::trace::record::TraceEvent::new(
            TraceLevel::Error,
            "should be silently accepted",
        ));
    }

    #[tokio::test]
    async fn standalone_without_connection_string_fails() {
        let mut config = base_config();
        config.standalone = true;
        config.sql_tracer_connection_string = None;
        let result = TraceWriterFactory::create("MyFunction", &config);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn standalone_with_connection_string_builds_composite() {
        let mut config = base_config();
        config.standalone = true;
        config.sql_tracer_connection_string = Some("postgres://localhost/db".into());
        let result = TraceWriterFactory::create("MyFunction", &config);
        assert!(result.is_ok());
    }
}
