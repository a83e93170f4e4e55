//! SQL Log Subscriber Settings.

use tracing::level_filters::LevelFilter;

use super::{Settings, SettingsToggle};

/// Configure specific settings for the SQL log subscriber.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum SqlLogSettings {
    /// SQL log subscriber disabled.
    #[default]
    Disabled,

    /// SQL log subscriber enabled.
    Enabled {
        /// Common subscriber settings that apply to the SQL log subscriber.
        common_settings: Settings,

        /// Connection string of the database holding the `Logs` table.
        connection_string: String,
    },
}

impl SettingsToggle for SqlLogSettings {
    fn is_enabled(&self) -> bool {
        match self {
            SqlLogSettings::Disabled => false,
            SqlLogSettings::Enabled { .. } => true,
        }
    }
}

/// For building [`SqlLogSettings`].
///
/// <div class="warning">
/// Do not use directly, instead use the [`Settings::builder`] associated function.
/// </div>
pub struct SqlLogSettingsBuilder {
    pub(crate) common_settings: Settings,
    pub(crate) connection_string: String,
}

impl SqlLogSettingsBuilder {
    /// Consumes self and returns a valid [`SqlLogSettings`] instance.
    pub fn build(self) -> SqlLogSettings {
        SqlLogSettings::Enabled {
            common_settings: self.common_settings,
            connection_string: self.connection_string,
        }
    }
}

impl<T> From<Option<T>> for SqlLogSettings
where
    T: Into<SqlLogSettings>,
{
    fn from(settings: Option<T>) -> Self {
        match settings {
            Some(settings) => settings.into(),
            None => SqlLogSettings::default(),
        }
    }
}

impl From<(&'static str, LevelFilter, String)> for SqlLogSettings {
    fn from(value: (&'static str, LevelFilter, String)) -> Self {
        Self::Enabled {
            common_settings: Settings {
                environment_variable: value.0,
                default_level: value.1,
            },
            connection_string: value.2,
        }
    }
}
