//! HEC Log Subscriber Settings.

use tracing::level_filters::LevelFilter;

use super::{Settings, SettingsToggle};
use crate::export::HecOptions;

/// Configure specific settings for the HEC log subscriber.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum HecLogSettings {
    /// HEC log subscriber disabled.
    #[default]
    Disabled,

    /// HEC log subscriber enabled.
    Enabled {
        /// Common subscriber settings that apply to the HEC log subscriber.
        common_settings: Settings,

        /// The endpoint log events are sent to.
        options: HecOptions,
    },
}

impl SettingsToggle for HecLogSettings {
    fn is_enabled(&self) -> bool {
        match self {
            HecLogSettings::Disabled => false,
            HecLogSettings::Enabled { .. } => true,
        }
    }
}

/// For building [`HecLogSettings`].
///
/// <div class="warning">
/// Do not use directly, instead use the [`Settings::builder`] associated function.
/// </div>
pub struct HecLogSettingsBuilder {
    pub(crate) common_settings: Settings,
    pub(crate) options: HecOptions,
}

impl HecLogSettingsBuilder {
    /// Consumes self and returns a valid [`HecLogSettings`] instance.
    pub fn build(self) -> HecLogSettings {
        HecLogSettings::Enabled {
            common_settings: self.common_settings,
            options: self.options,
        }
    }
}

impl<T> From<Option<T>> for HecLogSettings
where
    T: Into<HecLogSettings>,
{
    fn from(settings: Option<T>) -> Self {
        match settings {
            Some(settings) => settings.into(),
            None => HecLogSettings::default(),
        }
    }
}

impl From<(&'static str, LevelFilter, HecOptions)> for HecLogSettings {
    fn from(value: (&'static str, LevelFilter, HecOptions)) -> Self {
        Self::Enabled {
            common_settings: Settings {
                environment_variable: value.0,
                default_level: value.1,
            },
            options: value.2,
        }
    }
}
