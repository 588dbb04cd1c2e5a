//! Logger builder

use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{Config, Format, Writer};
use crate::error::{LogError, LogResult};

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Guard that keeps the logger's root span entered.
///
/// Hold it for the lifetime of `main`.
#[derive(Debug)]
pub struct LoggerGuard {
    _root_span: Option<tracing::span::EnteredSpan>,
}

impl LoggerGuard {
    pub(crate) fn noop() -> Self {
        Self { _root_span: None }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Parse the filter without installing anything.
    pub fn filter(&self) -> LogResult<EnvFilter> {
        EnvFilter::try_new(&self.config.level).map_err(|e| LogError::Filter {
            filter: self.config.level.clone(),
            message: e.to_string(),
        })
    }

    /// Build and install the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns error if the filter string cannot be parsed or a global
    /// subscriber is already installed.
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = self.filter()?;
        let layer = self.fmt_layer().with_filter(filter);

        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .map_err(|e| LogError::Init(e.to_string()))?;

        let root_span = self
            .config
            .service
            .as_deref()
            .map(|service| tracing::info_span!("app", service).entered());

        Ok(LoggerGuard {
            _root_span: root_span,
        })
    }

    fn writer(&self) -> BoxMakeWriter {
        match self.config.writer {
            Writer::Stderr => BoxMakeWriter::new(std::io::stderr),
            Writer::Stdout => BoxMakeWriter::new(std::io::stdout),
        }
    }

    fn fmt_layer(&self) -> BoxedLayer {
        let display = &self.config.display;
        let base = fmt::layer()
            .with_writer(self.writer())
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source)
            .with_thread_names(display.thread_names);

        match (self.config.format, display.time) {
            (Format::Pretty, true) => base.pretty().with_ansi(display.colors).boxed(),
            (Format::Pretty, false) => base.pretty().without_time().with_ansi(display.colors).boxed(),
            (Format::Compact, true) => base.compact().with_ansi(display.colors).boxed(),
            (Format::Compact, false) => base.compact().without_time().with_ansi(display.colors).boxed(),
            (Format::Json, true) => base
                .json()
                .flatten_event(display.flatten)
                .with_current_span(true)
                .with_ansi(false)
                .boxed(),
            (Format::Json, false) => base
                .json()
                .without_time()
                .flatten_event(display.flatten)
                .with_current_span(true)
                .with_ansi(false)
                .boxed(),
        }
    }
}
