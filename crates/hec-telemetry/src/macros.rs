/// Emits a [`tracing`] event at a level only known at runtime.
///
/// The level of a [`tracing`] callsite is part of its static metadata, which
/// is why every level needs its own macro invocation.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {{
        let level: ::tracing::Level = $level;
        if level == ::tracing::Level::ERROR {
            ::tracing::error!($($arg)+);
        } else if level == ::tracing::Level::WARN {
            ::tracing::warn!($($arg)+);
        } else if level == ::tracing::Level::INFO {
            ::tracing::info!($($arg)+);
        } else if level == ::tracing::Level::DEBUG {
            ::tracing::debug!($($arg)+);
        } else {
            ::tracing::trace!($($arg)+);
        }
    }};
}

/// Creates a [`CallSite`][crate::CallSite] for the current source file and
/// line.
///
/// The component is derived from the file name without its extension, the
/// operation has to be supplied explicitly.
///
/// ```
/// use hec_telemetry::call_site;
///
/// let call_site = call_site!("load_forecast");
/// assert_eq!(call_site.operation(), "load_forecast");
/// ```
#[macro_export]
macro_rules! call_site {
    ($operation:expr) => {
        $crate::CallSite::from_path(file!(), $operation).with_line(line!())
    };
}
