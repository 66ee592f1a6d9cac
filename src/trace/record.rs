use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl TraceLevel {
    /// Verbosity rank matching the host's own `TraceLevel` numbering (Error is least
    /// detailed, Verbose is most): used so that "is this event within the configured
    /// minimum level" reads as a single integer comparison at the filtering call site.
    fn verbosity_rank(self) -> u8 {
        match self {
            TraceLevel::Error => 1,
            TraceLevel::Warning => 2,
            TraceLevel::Info => 3,
            TraceLevel::Verbose => 4,
        }
    }

    /// `true` when `self` (the writer's configured minimum level) is too coarse to admit
    /// `event_level` — i.e. `event_level` is more detailed than what's configured.
    pub fn excludes(self, event_level: TraceLevel) -> bool {
        self.verbosity_rank() < event_level.verbosity_rank()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionKind {
    FunctionInvocation,
    Aggregate,
    Other,
}

/// Structured stand-in for the host's exception object: shaped so that
/// [`TraceEvent`] can walk to the innermost cause the way the original does for
/// script-invocation failures.
#[derive(Clone, Debug)]
pub struct TraceException {
    pub kind: ExceptionKind,
    pub message: String,
    pub stack: Option<String>,
    pub inner: Option<Box<TraceException>>,
}

impl TraceException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
            inner: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_inner(mut self, inner: TraceException) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    fn innermost(&self) -> &TraceException {
        let mut cur = self;
        while let Some(inner) = &cur.inner {
            cur = inner;
        }
        cur
    }

    /// One extra line to append alongside the event message: script-invocation and aggregate
    /// exceptions collapse to the innermost cause's message; anything else renders as a
    /// multi-line stack + message block.
    pub fn render_line(&self) -> String {
        match self.kind {
            ExceptionKind::FunctionInvocation | ExceptionKind::Aggregate => {
                self.innermost().message.clone()
            }
            ExceptionKind::Other => match &self.stack {
                Some(stack) => format!("{stack}\n{}", self.message),
                None => self.message.clone(),
            },
        }
    }
}

/// Producer-facing input to [`crate::trace::writer::BufferedTraceWriter::trace`].
#[derive(Clone, Debug)]
pub struct TraceEvent {
    pub level: TraceLevel,
    pub message: String,
    pub exception: Option<TraceException>,
    pub properties: HashMap<String, PropertyValue>,
    pub function_name: Option<String>,
}

impl TraceEvent {
    pub fn new(level: TraceLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            exception: None,
            properties: HashMap::new(),
            function_name: None,
        }
    }

    pub fn is_system_trace(&self) -> bool {
        self.properties
            .get("isSystemTrace")
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_exception(mut self, exception: TraceException) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_function_name(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = Some(function_name.into());
        self
    }
}

/// Immutable record produced by [`TraceEvent`] filtering; one per message line. Consumed only
/// by sinks.
#[derive(Clone, Debug)]
pub struct TraceRecord {
    pub timestamp: DateTime<Utc>,
    pub level: TraceLevel,
    pub message: String,
    pub function_name: Option<String>,
}
