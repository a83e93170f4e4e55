//! HEC Trace Subscriber Settings.

use tracing::level_filters::LevelFilter;

use super::{Settings, SettingsToggle};
use crate::export::HecOptions;

#[derive(Debug, Default, PartialEq, Eq)]
pub enum HecTraceSettings {
    #[default]
    Disabled,

    Enabled {
        common_settings: Settings,

        /// The endpoint finished spans are sent to.
        options: HecOptions,
    },
}

impl SettingsToggle for HecTraceSettings {
    fn is_enabled(&self) -> bool {
        match self {
            HecTraceSettings::Disabled => false,
            HecTraceSettings::Enabled { .. } => true,
        }
    }
}

pub struct HecTraceSettingsBuilder {
    pub(crate) common_settings: Settings,
    pub(crate) options: HecOptions,
}

impl HecTraceSettingsBuilder {
    pub fn build(self) -> HecTraceSettings {
        HecTraceSettings::Enabled {
            common_settings: self.common_settings,
            options: self.options,
        }
    }
}

impl<T> From<Option<T>> for HecTraceSettings
where
    T: Into<HecTraceSettings>,
{
    fn from(settings: Option<T>) -> Self {
        match settings {
            Some(settings) => settings.into(),
            None => HecTraceSettings::default(),
        }
    }
}

impl From<(&'static str, LevelFilter, HecOptions)> for HecTraceSettings {
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
