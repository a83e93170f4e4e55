//! Subscriber settings.

use tracing::level_filters::LevelFilter;

use crate::export::HecOptions;

pub mod console_log;
pub use console_log::*;

pub mod hec_log;
pub use hec_log::*;

pub mod hec_trace;
pub use hec_trace::*;

pub mod sql_log;
pub use sql_log::*;

/// Indicate whether a type is enabled or disabled.
pub trait SettingsToggle {
    /// Whether the settings are enabled or not.
    fn is_enabled(&self) -> bool;

    /// The opposite of [SettingsToggle::is_enabled] as a helper.
    fn is_disabled(&self) -> bool {
        !self.is_enabled()
    }
}

/// General settings that apply to any subscriber.
#[derive(Debug, PartialEq, Eq)]
pub struct Settings {
    /// The environment variable used to set the [`LevelFilter`].
    ///
    /// When the environment variable is set, it will override what is set by
    /// [`Self::default_level`].
    pub environment_variable: &'static str,

    /// The [`LevelFilter`] to fallback to if [`Self::environment_variable`] has
    /// not been set.
    pub default_level: LevelFilter,
}

impl Settings {
    /// Builder methods to override defaults.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }
}

impl Default for Settings {
    fn default() -> Self {
        SettingsBuilder::default().build()
    }
}

/// For building [`Settings`].
pub struct SettingsBuilder {
    environment_variable: &'static str,
    default_level: LevelFilter,
}

impl SettingsBuilder {
    /// The environment variable used when none is set explicitly.
    pub const DEFAULT_ENVIRONMENT_VARIABLE: &str = "RUST_LOG";

    /// Set the environment variable used for overriding the [`Settings::default_level`].
    ///
    /// Defaults to [`Self::DEFAULT_ENVIRONMENT_VARIABLE`].
    pub fn with_environment_variable(mut self, name: &'static str) -> Self {
        self.environment_variable = name;
        self
    }

    /// Set the default [`LevelFilter`].
    ///
    /// Defaults to [`LevelFilter::OFF`].
    pub fn with_default_level(mut self, level: impl Into<LevelFilter>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Set specific [`ConsoleLogSettings`].
    pub fn console_log_settings_builder(self) -> ConsoleLogSettingsBuilder {
        self.into()
    }

    /// Set specific [`HecLogSettings`] for exporting logs to `options`.
    pub fn hec_log_settings_builder(self, options: HecOptions) -> HecLogSettingsBuilder {
        HecLogSettingsBuilder {
            common_settings: self.build(),
            options,
        }
    }

    /// Set specific [`HecTraceSettings`] for exporting spans to `options`.
    pub fn hec_trace_settings_builder(self, options: HecOptions) -> HecTraceSettingsBuilder {
        HecTraceSettingsBuilder {
            common_settings: self.build(),
            options,
        }
    }

    /// Set specific [`SqlLogSettings`] for writing logs into the database at
    /// `connection_string`.
    pub fn sql_log_settings_builder(
        self,
        connection_string: impl Into<String>,
    ) -> SqlLogSettingsBuilder {
        SqlLogSettingsBuilder {
            common_settings: self.build(),
            connection_string: connection_string.into(),
        }
    }

    /// Consumes self and returns the common [`Settings`].
    pub fn build(self) -> Settings {
        Settings {
            environment_variable: self.environment_variable,
            default_level: self.default_level,
        }
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self {
            environment_variable: Self::DEFAULT_ENVIRONMENT_VARIABLE,
            default_level: LevelFilter::OFF,
        }
    }
}
