mod error;
mod factory;
mod file_sink;
mod record;
mod sink;
mod sql_sink;
mod writer;

pub use error::Error;
pub use factory::{FileLoggingMode, ScriptHostConfig, TraceWriterFactory};
pub use file_sink::FileSink;
pub use record::{ExceptionKind, PropertyValue, TraceEvent, TraceException, TraceLevel, TraceRecord};
pub use sink::{CompositeSink, NullSink, Sink, SinkError};
pub use sql_sink::SqlSink;
pub use writer::{BufferedTraceWriter, TraceSink};
