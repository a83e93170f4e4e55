//! This module contains functionality to initialise tracing Subscribers for
//! console output and for exporting logs and traces to a HEC endpoint or a
//! SQL table.
//!
//! To get started, see [`Tracing`].

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::{
    Resource, logs::SdkLoggerProvider, propagation::TraceContextPropagator,
    trace::SdkTracerProvider,
};
use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::{Directive, ParseError},
    layer::SubscriberExt,
};
use url::Url;

use crate::{
    export::{
        EXPORT_TARGET, HecError, HecLogExporter, HecOptions, HecSpanExporter, SqlExportError,
        SqlLogExporter,
    },
    tracing::settings::*,
};

pub mod settings;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Targets which are never fed into an exporter, because exporting would emit
/// new events of these targets.
const EXPORTER_QUIET_TARGETS: [&str; 6] =
    [EXPORT_TARGET, "h2", "hyper", "hyper_util", "reqwest", "sqlx"];

/// Errors which can be encountered when initialising [`Tracing`].
#[derive(Debug, Snafu)]
pub enum Error {
    /// Indicates that [`Tracing`] failed to create the HEC log exporter.
    #[snafu(display("unable to create HEC log exporter"))]
    CreateHecLogExporter {
        #[allow(missing_docs)]
        source: HecError,
    },

    /// Indicates that [`Tracing`] failed to create the HEC trace exporter.
    #[snafu(display("unable to create HEC trace exporter"))]
    CreateHecTraceExporter {
        #[allow(missing_docs)]
        source: HecError,
    },

    /// Indicates that [`Tracing`] failed to create the SQL log exporter.
    #[snafu(display("unable to create SQL log exporter"))]
    CreateSqlLogExporter {
        #[allow(missing_docs)]
        source: SqlExportError,
    },

    /// Indicates that a filter directive for an exporter could not be parsed.
    #[snafu(display("unable to silence target {target:?} for exporters"))]
    ParseQuietDirective {
        #[allow(missing_docs)]
        source: ParseError,
        #[allow(missing_docs)]
        target: &'static str,
    },

    /// Indicates that [`Tracing`] failed to set the global default subscriber.
    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber {
        #[allow(missing_docs)]
        source: SetGlobalDefaultError,
    },
}

/// Easily initialize a set of pre-configured [`Subscriber`][1] layers.
///
/// # Usage
///
/// ## Tracing Guard
///
/// The configured subscribers are active as long as the tracing guard returned by [`Tracing::init`]
/// is in scope and not dropped. Dropping it shuts down the exporters, which flushes all pending
/// batches. Hold onto the guard as long as telemetry is required.
///
/// <div class="warning">
/// Name the guard variable appropriately, do not just use <code>let _ =</code>, as that will drop
/// immediately.
/// </div>
///
/// The exporters run their I/O on the tokio runtime which is current during [`Tracing::init`].
/// That runtime needs to be able to make progress while the guard is dropped, so use a
/// multi-threaded runtime.
///
/// ```
/// # use hec_telemetry::tracing::{Tracing, Error};
/// #[tokio::main]
/// async fn main() -> Result<(), Error> {
///     let _tracing_guard = Tracing::builder() // < Scope starts here
///         .service_name("test")               // |
///         .build()                            // |
///         .init()?;                           // |
///                                             // |
///     tracing::info!("log a message");        // |
///     Ok(())                                  // < Scope ends here, guard is dropped
/// }
/// ```
///
/// ## Pre-configured Tracing Instance
///
/// There are two different styles to configure a [`Tracing`] instance: Using an opinionated pre-
/// configured instance or a fully customizable builder. [`Tracing::pre_configured`] lists details
/// about environment variables, filter levels and defaults used.
///
/// ```no_run
/// use hec_telemetry::tracing::{Tracing, TelemetryOptions, Error};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Error> {
///     let options = TelemetryOptions {
///         hec_endpoint: Some("https://hec.example.com:8088/services/collector".parse().unwrap()),
///         hec_token: Some("00000000-0000-0000-0000-000000000000".to_owned()),
///         hec_log_exporter_enabled: true,
///         ..Default::default()
///     };
///
///     let _tracing_guard = Tracing::pre_configured("orders", options).init()?;
///
///     tracing::info!("log a message");
///
///     Ok(())
/// }
/// ```
///
/// Also see the documentation for [`TelemetryOptions`] which details how it can be used as CLI
/// arguments via [`clap`].
///
/// ## Builders
///
/// Subscribers are configured either with tuples (environment variable, default level and either
/// an enabled flag or the exporter target) or with the [`Settings::builder`] for more control.
///
/// ```no_run
/// use hec_telemetry::{
///     export::HecOptions,
///     tracing::{Tracing, Error, settings::{Format, Settings}},
/// };
/// use tracing_subscriber::filter::LevelFilter;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Error> {
///     let hec = HecOptions::builder(
///         "https://hec.example.com:8088/services/collector".parse().unwrap(),
///         "00000000-0000-0000-0000-000000000000",
///     )
///     .with_index("orders")
///     .build();
///
///     let _tracing_guard = Tracing::builder()
///         .service_name("orders")
///         .with_console_output(
///             Settings::builder()
///                 .with_environment_variable("CONSOLE_LOG")
///                 .with_default_level(LevelFilter::INFO)
///                 .console_log_settings_builder()
///                 .with_log_format(Format::Json)
///                 .build(),
///         )
///         .with_hec_log_exporter(("HEC_LOG", LevelFilter::DEBUG, hec.clone()))
///         .with_hec_trace_exporter(("HEC_TRACE", LevelFilter::INFO, hec))
///         .with_sql_log_exporter(
///             Settings::builder()
///                 .with_environment_variable("SQL_LOG")
///                 .with_default_level(LevelFilter::WARN)
///                 .sql_log_settings_builder("sqlite://logs.db")
///                 .build(),
///         )
///         .build()
///         .init()?;
///
///     tracing::info!("log a message");
///
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables and CLI Arguments
///
/// ### Console logs
///
/// - `CONSOLE_LOG_DISABLED` (`--console-log-disabled`): Disables console logs when set to `true`.
/// - `CONSOLE_LOG_LEVEL`: Set the log level for the console logs.
///
/// ### HEC endpoint
///
/// - `HEC_ENDPOINT` (`--hec-endpoint`): The URL events are POSTed to.
/// - `HEC_TOKEN` (`--hec-token`): The token sent in the `Authorization` header.
/// - `HEC_INDEX` (`--hec-index`): The destination index, defaults to `main`.
/// - `HEC_SOURCE` (`--hec-source`): The destination source, defaults to `hec-telemetry`.
///
/// ### HEC logs
///
/// - `HEC_LOG_EXPORTER_ENABLED` (`--hec-log-exporter-enabled`): Enable exporting logs.
/// - `HEC_LOG_EXPORTER_LEVEL`: Set the log level for exported logs.
///
/// ### HEC traces
///
/// - `HEC_TRACE_EXPORTER_ENABLED` (`--hec-trace-exporter-enabled`): Enable exporting traces.
/// - `HEC_TRACE_EXPORTER_LEVEL`: Set the level for exported spans.
///
/// ### SQL logs
///
/// - `SQL_LOG_CONNECTION_STRING` (`--sql-log-connection-string`): Enable writing logs into the
///   `Logs` table of this database.
/// - `SQL_LOG_EXPORTER_LEVEL`: Set the log level for logs written to the database.
///
/// # Additional Configuration
///
/// The batch processors are configured through the variables defined in the opentelemetry crates:
///
/// - `OTEL_BLRP_MAX_QUEUE_SIZE`, `OTEL_BLRP_SCHEDULE_DELAY`, `OTEL_BLRP_MAX_EXPORT_BATCH_SIZE`
///   for logs
/// - `OTEL_BSP_MAX_QUEUE_SIZE`, `OTEL_BSP_SCHEDULE_DELAY`, `OTEL_BSP_MAX_EXPORT_BATCH_SIZE`
///   for spans
///
/// [1]: tracing::Subscriber
pub struct Tracing {
    service_name: &'static str,
    console_log_settings: ConsoleLogSettings,
    hec_log_settings: HecLogSettings,
    hec_trace_settings: HecTraceSettings,
    sql_log_settings: SqlLogSettings,

    logger_providers: Vec<SdkLoggerProvider>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Tracing {
    /// The environment variable used to set the console log level filter.
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";
    /// The environment variable used to set the HEC log level filter.
    pub const HEC_LOG_EXPORTER_LEVEL: &str = "HEC_LOG_EXPORTER_LEVEL";
    /// The environment variable used to set the HEC trace level filter.
    pub const HEC_TRACE_EXPORTER_LEVEL: &str = "HEC_TRACE_EXPORTER_LEVEL";
    /// The environment variable used to set the SQL log level filter.
    pub const SQL_LOG_EXPORTER_LEVEL: &str = "SQL_LOG_EXPORTER_LEVEL";

    /// Creates and returns a [`TracingBuilder`].
    pub fn builder() -> TracingBuilder<builder_state::PreServiceName> {
        TracingBuilder::default()
    }

    /// Creates an returns a pre-configured [`Tracing`] instance which can be initialized by
    /// calling [`Tracing::init()`].
    ///
    /// Also see [this section](#environment-variables-and-cli-arguments) in the docs for all full
    /// list of environment variables and CLI arguments used by the pre-configured instance.
    ///
    /// ### Default Levels
    ///
    /// - Console logs: INFO
    /// - HEC logs: INFO
    /// - HEC traces: INFO
    /// - SQL logs: INFO
    ///
    /// The HEC exporters are only enabled if both an endpoint and a token are given.
    pub fn pre_configured(service_name: &'static str, options: TelemetryOptions) -> Self {
        let hec_options = options.hec_options();
        let TelemetryOptions {
            console_log_disabled,
            hec_log_exporter_enabled,
            hec_trace_exporter_enabled,
            sql_log_connection_string,
            ..
        } = options;

        Self::builder()
            .service_name(service_name)
            .with_console_output((
                Self::CONSOLE_LOG_LEVEL,
                LevelFilter::INFO,
                !console_log_disabled,
            ))
            .with_hec_log_exporter(
                hec_options
                    .clone()
                    .filter(|_| hec_log_exporter_enabled)
                    .map(|hec| (Self::HEC_LOG_EXPORTER_LEVEL, LevelFilter::INFO, hec)),
            )
            .with_hec_trace_exporter(
                hec_options
                    .filter(|_| hec_trace_exporter_enabled)
                    .map(|hec| (Self::HEC_TRACE_EXPORTER_LEVEL, LevelFilter::INFO, hec)),
            )
            .with_sql_log_exporter(
                sql_log_connection_string.map(|connection_string| {
                    (Self::SQL_LOG_EXPORTER_LEVEL, LevelFilter::INFO, connection_string)
                }),
            )
            .build()
    }

    /// Initialize the configured tracing subscribers, returning a guard that
    /// will shutdown the subscribers when dropped.
    ///
    /// Must be called from within a tokio runtime if any exporter is enabled.
    ///
    /// <div class="warning">
    /// Name the guard variable appropriately, do not just use <code>let _ =</code>, as that will drop
    /// immediately.
    /// </div>
    pub fn init(mut self) -> Result<Tracing> {
        let layers = self.layers()?;

        if !layers.is_empty() {
            // Add the layers to the tracing_subscriber Registry (console,
            // HEC logs, HEC traces, SQL logs)
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        // IMPORTANT: we must return self, otherwise Drop will be called and uninitialise tracing
        Ok(self)
    }

    /// Creates one layer per enabled subscriber and keeps the providers
    /// backing them.
    fn layers(&mut self) -> Result<Vec<Box<dyn Layer<Registry> + Sync + Send>>> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Sync + Send>> = Vec::new();

        if let ConsoleLogSettings::Enabled {
            common_settings,
            log_format,
        } = &self.console_log_settings
        {
            let env_filter_layer = env_filter_builder(
                common_settings.environment_variable,
                common_settings.default_level,
            );

            let console_output_layer = match log_format {
                Format::Plain => tracing_subscriber::fmt::layer()
                    .with_filter(env_filter_layer)
                    .boxed(),
                Format::Json => tracing_subscriber::fmt::layer()
                    .json()
                    .with_filter(env_filter_layer)
                    .boxed(),
            };
            layers.push(console_output_layer);
        }

        if let HecLogSettings::Enabled {
            common_settings,
            options,
        } = &self.hec_log_settings
        {
            let log_exporter =
                HecLogExporter::new(options.clone()).context(CreateHecLogExporterSnafu)?;

            let logger_provider = SdkLoggerProvider::builder()
                .with_batch_exporter(log_exporter)
                .with_resource(self.resource())
                .build();

            // Convert `tracing::Event` to OpenTelemetry logs
            layers.push(
                OpenTelemetryTracingBridge::new(&logger_provider)
                    .with_filter(exporter_filter(common_settings)?)
                    .boxed(),
            );
            self.logger_providers.push(logger_provider);
        }

        if let SqlLogSettings::Enabled {
            common_settings,
            connection_string,
        } = &self.sql_log_settings
        {
            let log_exporter = SqlLogExporter::new(connection_string.clone())
                .context(CreateSqlLogExporterSnafu)?;

            let logger_provider = SdkLoggerProvider::builder()
                .with_batch_exporter(log_exporter)
                .with_resource(self.resource())
                .build();

            layers.push(
                OpenTelemetryTracingBridge::new(&logger_provider)
                    .with_filter(exporter_filter(common_settings)?)
                    .boxed(),
            );
            self.logger_providers.push(logger_provider);
        }

        if let HecTraceSettings::Enabled {
            common_settings,
            options,
        } = &self.hec_trace_settings
        {
            let trace_exporter =
                HecSpanExporter::new(options.clone()).context(CreateHecTraceExporterSnafu)?;

            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(trace_exporter)
                .with_resource(self.resource())
                .build();

            let tracer = tracer_provider.tracer(self.service_name);

            layers.push(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer)
                    .with_filter(exporter_filter(common_settings)?)
                    .boxed(),
            );
            self.tracer_provider = Some(tracer_provider);

            // Read by the CaptureLayer to continue traces of incoming requests.
            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        }

        Ok(layers)
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name)
            .build()
    }
}

impl Drop for Tracing {
    fn drop(&mut self) {
        tracing::debug!(
            opentelemetry.tracing.enabled = self.hec_trace_settings.is_enabled(),
            opentelemetry.logger.enabled = !self.logger_providers.is_empty(),
            "shutting down opentelemetry providers"
        );

        if let Some(tracer_provider) = &self.tracer_provider {
            if let Err(error) = tracer_provider.shutdown() {
                tracing::error!(%error, "unable to shutdown TracerProvider")
            }
        }

        for logger_provider in &self.logger_providers {
            if let Err(error) = logger_provider.shutdown() {
                tracing::error!(%error, "unable to shutdown LoggerProvider");
            }
        }
    }
}

/// This trait is only used for the typestate builder and cannot be implemented
/// outside of this crate.
///
/// The only reason it has pub visibility is because it needs to be at least as
/// visible as the types that use it.
#[doc(hidden)]
pub trait BuilderState: private::Sealed {}

/// This private module holds the [`Sealed`][1] trait that is used by the
/// [`BuilderState`], so that it cannot be implemented outside of this crate.
///
/// [1]: private::Sealed
#[doc(hidden)]
mod private {
    use super::*;

    pub trait Sealed {}

    impl Sealed for builder_state::PreServiceName {}
    impl Sealed for builder_state::Config {}
}

/// This module holds the possible states that the builder is in.
///
/// Each state will implement [`BuilderState`] (with no methods), and the
/// Builder struct ([`TracingBuilder`]) itself will be implemented with
/// each state as a generic parameter.
#[doc(hidden)]
mod builder_state {
    /// The initial state, before the service name is set.
    #[derive(Default)]
    pub struct PreServiceName;

    /// The state that allows you to configure the supported [`Subscriber`][1]
    /// [`Layer`][2].
    ///
    /// [1]: tracing::Subscriber
    /// [2]: tracing_subscriber::layer::Layer
    #[derive(Default)]
    pub struct Config;
}

#[doc(hidden)]
impl BuilderState for builder_state::PreServiceName {}

#[doc(hidden)]
impl BuilderState for builder_state::Config {}

/// Makes it easy to build a valid [`Tracing`] instance.
#[derive(Default)]
pub struct TracingBuilder<S: BuilderState> {
    service_name: &'static str,
    console_log_settings: ConsoleLogSettings,
    hec_log_settings: HecLogSettings,
    hec_trace_settings: HecTraceSettings,
    sql_log_settings: SqlLogSettings,

    /// Allow the generic to be used (needed for impls).
    _marker: std::marker::PhantomData<S>,
}

impl TracingBuilder<builder_state::PreServiceName> {
    /// Set the service name used as `service.name` resource of exported
    /// telemetry.
    pub fn service_name(self, service_name: &'static str) -> TracingBuilder<builder_state::Config> {
        TracingBuilder {
            service_name,
            ..Default::default()
        }
    }
}

impl TracingBuilder<builder_state::Config> {
    /// Enable the console output tracing subscriber and set the default
    /// [`LevelFilter`] which is overridable through the given environment
    /// variable.
    pub fn with_console_output(self, console_log_settings: impl Into<ConsoleLogSettings>) -> Self {
        Self {
            console_log_settings: console_log_settings.into(),
            ..self
        }
    }

    /// Enable exporting log events to a HEC endpoint and set the default
    /// [`LevelFilter`] which is overridable through the given environment
    /// variable.
    pub fn with_hec_log_exporter(self, hec_log_settings: impl Into<HecLogSettings>) -> Self {
        Self {
            hec_log_settings: hec_log_settings.into(),
            ..self
        }
    }

    /// Enable exporting spans to a HEC endpoint and set the default
    /// [`LevelFilter`] which is overridable through the given environment
    /// variable.
    pub fn with_hec_trace_exporter(self, hec_trace_settings: impl Into<HecTraceSettings>) -> Self {
        Self {
            hec_trace_settings: hec_trace_settings.into(),
            ..self
        }
    }

    /// Enable writing log events into a SQL table and set the default
    /// [`LevelFilter`] which is overridable through the given environment
    /// variable.
    pub fn with_sql_log_exporter(self, sql_log_settings: impl Into<SqlLogSettings>) -> Self {
        Self {
            sql_log_settings: sql_log_settings.into(),
            ..self
        }
    }

    /// Consumes self and returns a valid [`Tracing`] instance.
    ///
    /// Once built, you can call [`Tracing::init`] to enable the configured
    /// tracing subscribers.
    pub fn build(self) -> Tracing {
        Tracing {
            service_name: self.service_name,
            console_log_settings: self.console_log_settings,
            hec_log_settings: self.hec_log_settings,
            hec_trace_settings: self.hec_trace_settings,
            sql_log_settings: self.sql_log_settings,
            logger_providers: Vec::new(),
            tracer_provider: None,
        }
    }
}

/// Create an [`EnvFilter`] configured with the given environment variable and default [`Directive`].
fn env_filter_builder(env_var: &str, default_directive: impl Into<Directive>) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(env_var)
        .with_default_directive(default_directive.into())
        .from_env_lossy()
}

/// Create the [`EnvFilter`] of an exporting layer, which additionally turns
/// off all [`EXPORTER_QUIET_TARGETS`].
fn exporter_filter(settings: &Settings) -> Result<EnvFilter> {
    EXPORTER_QUIET_TARGETS.into_iter().try_fold(
        env_filter_builder(settings.environment_variable, settings.default_level),
        |filter, target| {
            let directive: Directive = format!("{target}=off")
                .parse()
                .context(ParseQuietDirectiveSnafu { target })?;

            Ok(filter.add_directive(directive))
        },
    )
}

/// Contains options which can be passed to [`Tracing::pre_configured()`].
///
/// Additionally, this struct can be used as CLI arguments. This functionality is only available
/// if the feature `clap` is enabled.
///
#[cfg_attr(
    feature = "clap",
    doc = r#"
```
# use hec_telemetry::tracing::TelemetryOptions;
use clap::Parser;

#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    port: u16,

    #[clap(flatten)]
    telemetry_arguments: TelemetryOptions,
}
```
"#
)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub console_log_disabled: bool,

    /// The URL of the HTTP Event Collector events are sent to.
    #[cfg_attr(feature = "clap", arg(long, env, value_name = "URL"))]
    pub hec_endpoint: Option<Url>,

    /// The token used to authenticate against the HTTP Event Collector.
    #[cfg_attr(feature = "clap", arg(long, env, hide_env_values = true))]
    pub hec_token: Option<String>,

    /// The destination index of exported events.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub hec_index: Option<String>,

    /// The destination source of exported events.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub hec_source: Option<String>,

    /// Enable exporting logs to the HTTP Event Collector.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, requires_all = ["hec_endpoint", "hec_token"])
    )]
    pub hec_log_exporter_enabled: bool,

    /// Enable exporting traces to the HTTP Event Collector.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, requires_all = ["hec_endpoint", "hec_token"])
    )]
    pub hec_trace_exporter_enabled: bool,

    /// Enable writing logs into the `Logs` table of the database at CONNECTION_STRING.
    #[cfg_attr(feature = "clap", arg(long, env, value_name = "CONNECTION_STRING"))]
    pub sql_log_connection_string: Option<String>,
}

impl TelemetryOptions {
    /// Returns the HEC endpoint configuration, if both endpoint and token are
    /// set.
    pub fn hec_options(&self) -> Option<HecOptions> {
        let (Some(endpoint), Some(token)) = (&self.hec_endpoint, &self.hec_token) else {
            return None;
        };

        let mut builder = HecOptions::builder(endpoint.clone(), token.clone());
        if let Some(index) = &self.hec_index {
            builder = builder.with_index(index.clone());
        }
        if let Some(source) = &self.hec_source {
            builder = builder.with_source(source.clone());
        }

        Some(builder.build())
    }
}
