//! Shared tracing configuration for the Tessera workspace.
//!
//! Executables, integration tests, and supporting tools install their
//! `tracing` subscriber through this crate, so builder logic lives in one
//! place and the logging surface stays consistent across binaries.

use std::env;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for the formatter layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingOutput {
    /// Multi-line, ANSI-colored output for local development
    Pretty,
    /// Single-line output for CI logs
    Compact,
    /// Machine-readable JSON lines
    Json,
}

/// Configuration describing how the shared subscriber should behave
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Optional directives (e.g. `tessera_exec=debug,info`); falls back to
    /// `RUST_LOG` and finally to [`TracingConfig::default_directive`]
    pub directives: Option<String>,
    /// Directive used when neither `directives` nor `RUST_LOG` parse
    pub default_directive: String,
    /// Whether event targets (module paths) appear in output
    pub include_targets: bool,
    /// ANSI formatting; disable for CI logs that strip color codes
    pub ansi: bool,
    /// Span lifecycle events to emit
    pub span_events: FmtSpan,
    pub output: TracingOutput,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, ANSI-enabled output tuned for local development
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".into(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
        }
    }

    /// Compact output without color, for CI
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Compact,
            ..Self::for_local()
        }
    }

    /// Verbose launch diagnostics: raises the default level to `debug`,
    /// which includes per-launch dependency dumps
    pub fn verbose() -> Self {
        Self {
            default_directive: "debug".into(),
            ..Self::for_local()
        }
    }

    fn filter(&self) -> EnvFilter {
        if let Some(directives) = &self.directives {
            if let Ok(f) = EnvFilter::try_new(directives) {
                return f;
            }
        }
        if let Ok(rust_log) = env::var("RUST_LOG") {
            if let Ok(f) = EnvFilter::try_new(rust_log) {
                return f;
            }
        }
        EnvFilter::new(&self.default_directive)
    }

    /// Install the subscriber process-wide
    ///
    /// Safe to call more than once; later calls are no-ops (the first
    /// subscriber wins), which keeps test binaries from fighting.
    pub fn install(&self) {
        let builder = fmt()
            .with_env_filter(self.filter())
            .with_target(self.include_targets)
            .with_ansi(self.ansi)
            .with_span_events(self.span_events.clone());
        let result = match self.output {
            TracingOutput::Pretty => builder.pretty().try_init(),
            TracingOutput::Compact => builder.compact().try_init(),
            TracingOutput::Json => builder.json().try_init(),
        };
        if result.is_err() {
            tracing::trace!("tracing subscriber already installed");
        }
    }
}

/// Install the default subscriber, honoring `TESSERA_VERBOSE`
pub fn init() {
    let verbose = matches!(
        env::var("TESSERA_VERBOSE").as_deref(),
        Ok("1") | Ok("true") | Ok("yes") | Ok("on")
    );
    if verbose {
        TracingConfig::verbose().install();
    } else {
        TracingConfig::default().install();
    }
}
