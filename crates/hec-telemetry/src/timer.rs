//! A keyed registry of running execution timers.
//!
//! Instrumented code calls [`ExecutionTimer::start`] when it begins a unit of
//! work and [`ExecutionTimer::stop`] when it is done. The stop call emits a
//! log record carrying the elapsed time. Mismatched calls never fail, they
//! degrade to WARN records.
//!
//! ```
//! use hec_telemetry::{CallSite, ExecutionTimer};
//!
//! let timer = ExecutionTimer::new();
//! let call_site = CallSite::new("ForecastService", "load");
//!
//! timer.start(&call_site, "loading forecast");
//! // ... do the work ...
//! let elapsed = timer.stop(&call_site, "loaded forecast");
//!
//! assert!(elapsed.is_some());
//! assert!(timer.is_empty());
//! ```
use std::{
    fmt,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::Level;

use crate::{CallSite, CorrelationId};

/// Identifies one running timer.
///
/// The key consists of the component and operation of a [`CallSite`] and its
/// optional instance discriminator.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TimerKey {
    component: String,
    operation: String,
    instance: Option<String>,
}

impl TimerKey {
    /// Returns `true` if the concatenated text of `self` contains the
    /// concatenated text of `other`.
    fn contains(&self, other: &Self) -> bool {
        self.to_string().contains(&other.to_string())
    }
}

impl From<&CallSite> for TimerKey {
    fn from(call_site: &CallSite) -> Self {
        Self {
            component: call_site.component().to_owned(),
            operation: call_site.operation().to_owned(),
            instance: call_site.instance().map(ToOwned::to_owned),
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.component, self.operation)?;

        if let Some(instance) = &self.instance {
            f.write_str(instance)?;
        }

        Ok(())
    }
}

/// Controls how a call site is matched against running timers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "PascalCase")]
pub enum KeyMatching {
    /// A timer matches if its key is equal to the key of the call site.
    #[default]
    Exact,

    /// A timer matches if the text of its key contains the text of the call
    /// site key.
    ///
    /// This reproduces the behaviour of earlier releases of the pipeline. It
    /// lets unrelated keys collide: a timer for `ServiceGetAll` is found when
    /// looking up `ServiceGet`. Only use it when log output has to stay
    /// compatible.
    Contains,
}

/// The outcome of [`ExecutionTimer::start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerStart {
    /// A new timer was started.
    Started,

    /// A matching timer was already running. Nothing changed.
    AlreadyRunning,
}

/// A registry of running timers, keyed by [`TimerKey`].
///
/// The registry is safe to share between tasks (for example inside an
/// [`Arc`][std::sync::Arc] or as axum state). It is backed by a sharded
/// concurrent map, so unrelated keys do not contend on a single lock.
///
/// Timers which are started but never stopped stay in the registry until it
/// is dropped or [`ExecutionTimer::clear`] is called.
#[derive(Debug)]
pub struct ExecutionTimer {
    timers: DashMap<TimerKey, Instant>,
    matching: KeyMatching,
    level: Level,
}

impl Default for ExecutionTimer {
    fn default() -> Self {
        Self {
            timers: DashMap::new(),
            matching: KeyMatching::default(),
            level: Level::INFO,
        }
    }
}

impl ExecutionTimer {
    /// Creates an empty registry using exact key matching which logs at
    /// INFO level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how call sites are matched against running timers.
    pub fn with_key_matching(mut self, matching: KeyMatching) -> Self {
        self.matching = matching;
        self
    }

    /// Sets the level of the `Started` and `Completed` records. Misuse is
    /// always reported at WARN level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Starts a timer for `call_site`.
    ///
    /// If a matching timer is already running, a WARN record is emitted and
    /// the running timer is left untouched.
    pub fn start(&self, call_site: &CallSite, message: &str) -> TimerStart {
        let key = TimerKey::from(call_site);

        let started = match self.matching {
            KeyMatching::Exact => match self.timers.entry(key) {
                Entry::Occupied(_) => false,
                Entry::Vacant(entry) => {
                    entry.insert(Instant::now());
                    true
                }
            },
            KeyMatching::Contains => {
                if self.find_containing(&key).is_some() {
                    false
                } else {
                    self.timers.insert(key, Instant::now());
                    true
                }
            }
        };

        let operation = call_site.operation();
        let component = call_site.component();
        let correlation_id = call_site.correlation_id().map(CorrelationId::as_str);

        if !started {
            tracing::warn!(
                classname = component,
                methodname = operation,
                correlation_id,
                "Execution timer for {operation} in {component} was already started."
            );
            return TimerStart::AlreadyRunning;
        }

        event_at!(
            self.level,
            classname = component,
            methodname = operation,
            correlation_id,
            "Started {operation} in {component}: {message}"
        );

        TimerStart::Started
    }

    /// Stops the timer for `call_site` and returns the elapsed time.
    ///
    /// Returns [`None`] and emits a WARN record if no matching timer is
    /// running.
    pub fn stop(&self, call_site: &CallSite, message: &str) -> Option<Duration> {
        let key = TimerKey::from(call_site);

        let removed = match self.matching {
            KeyMatching::Exact => self.timers.remove(&key),
            KeyMatching::Contains => self
                .find_containing(&key)
                .and_then(|found| self.timers.remove(&found)),
        };

        let operation = call_site.operation();
        let component = call_site.component();
        let correlation_id = call_site.correlation_id().map(CorrelationId::as_str);

        let Some((_, started_at)) = removed else {
            tracing::warn!(
                classname = component,
                methodname = operation,
                correlation_id,
                "No execution timer found for {operation} in {component}. Call start first."
            );
            return None;
        };

        let elapsed = started_at.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        event_at!(
            self.level,
            classname = component,
            methodname = operation,
            correlation_id,
            elapsed_ms,
            "Completed {operation} in {component}: {message} | Execution Time: {elapsed_ms} ms"
        );

        Some(elapsed)
    }

    /// Returns `true` if a timer matching `call_site` is running.
    pub fn is_running(&self, call_site: &CallSite) -> bool {
        let key = TimerKey::from(call_site);

        match self.matching {
            KeyMatching::Exact => self.timers.contains_key(&key),
            KeyMatching::Contains => self.find_containing(&key).is_some(),
        }
    }

    /// Returns the number of running timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Returns `true` if no timer is running.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Discards all running timers without emitting any records.
    pub fn clear(&self) {
        self.timers.clear();
    }

    // The key is cloned out of the map, because removing an entry while
    // holding a reference into the same shard deadlocks.
    fn find_containing(&self, key: &TimerKey) -> Option<TimerKey> {
        self.timers
            .iter()
            .find(|entry| entry.key().contains(key))
            .map(|entry| entry.key().clone())
    }
}

#[cfg(test)]
mod test {
    use std::{str::FromStr, sync::Arc};

    use rstest::rstest;

    use super::*;
    use crate::test_util::CapturedEvents;

    #[test]
    fn start_then_stop_completes_once() {
        let events = CapturedEvents::default();
        let timer = ExecutionTimer::new();
        let call_site = CallSite::new("ForecastService", "load");

        let elapsed = events.scoped(|| {
            assert_eq!(timer.start(&call_site, "begin"), TimerStart::Started);
            timer.stop(&call_site, "end")
        });

        assert!(elapsed.is_some());
        assert!(timer.is_empty());

        let completed: Vec<_> = events
            .events()
            .into_iter()
            .filter(|event| event.message().starts_with("Completed"))
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].level, Level::INFO);
        assert!(completed[0].field("elapsed_ms").parse::<u64>().is_ok());
        assert!(events.at_level(Level::WARN).is_empty());
    }

    #[test]
    fn records_carry_correlation_id() {
        let events = CapturedEvents::default();
        let timer = ExecutionTimer::new();
        let call_site =
            CallSite::new("ForecastService", "load").with_correlation_id(CorrelationId::new("req-7"));

        events.scoped(|| {
            timer.start(&call_site, "begin");
            timer.stop(&call_site, "end");
        });

        let recorded = events.events();
        assert_eq!(recorded.len(), 2);
        assert!(
            recorded
                .iter()
                .all(|event| event.field("correlation_id") == "req-7")
        );
    }

    #[test]
    fn duplicate_start_warns_and_keeps_one_entry() {
        let events = CapturedEvents::default();
        let timer = ExecutionTimer::new();
        let call_site = CallSite::new("ForecastService", "load");

        events.scoped(|| {
            timer.start(&call_site, "first");
            assert_eq!(
                timer.start(&call_site, "second"),
                TimerStart::AlreadyRunning
            );
        });

        assert_eq!(timer.len(), 1);

        let warnings = events.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].message(),
            "Execution timer for load in ForecastService was already started."
        );
    }

    #[test]
    fn stop_without_start_warns() {
        let events = CapturedEvents::default();
        let timer = ExecutionTimer::new();
        let call_site = CallSite::new("ForecastService", "load");

        let elapsed = events.scoped(|| timer.stop(&call_site, "end"));

        assert!(elapsed.is_none());
        assert!(timer.is_empty());

        let warnings = events.single();
        assert_eq!(warnings.level, Level::WARN);
        assert_eq!(
            warnings.message(),
            "No execution timer found for load in ForecastService. Call start first."
        );
    }

    #[test]
    fn same_operation_in_different_components_times_independently() {
        let timer = ExecutionTimer::new();
        let a = CallSite::new("A", "run");
        let b = CallSite::new("B", "run");

        assert_eq!(timer.start(&a, ""), TimerStart::Started);
        assert_eq!(timer.start(&b, ""), TimerStart::Started);
        assert_eq!(timer.len(), 2);

        assert!(timer.stop(&a, "").is_some());
        assert!(timer.is_running(&b));
    }

    #[test]
    fn instances_separate_concurrent_invocations() {
        let timer = ExecutionTimer::new();
        let first = CallSite::new("A", "run").with_instance("request-1");
        let second = CallSite::new("A", "run").with_instance("request-2");

        assert_eq!(timer.start(&first, ""), TimerStart::Started);
        assert_eq!(timer.start(&second, ""), TimerStart::Started);

        assert!(timer.stop(&first, "").is_some());
        assert!(timer.is_running(&second));
    }

    #[rstest]
    #[case(KeyMatching::Exact, TimerStart::Started)]
    #[case(KeyMatching::Contains, TimerStart::AlreadyRunning)]
    fn prefix_keys_collide_only_when_matching_contains(
        #[case] matching: KeyMatching,
        #[case] expected: TimerStart,
    ) {
        let timer = ExecutionTimer::new().with_key_matching(matching);

        timer.start(&CallSite::new("Service", "GetAll"), "");

        assert_eq!(
            timer.start(&CallSite::new("Service", "Get"), ""),
            expected
        );
    }

    #[test]
    fn contains_matching_stops_containing_key() {
        let timer = ExecutionTimer::new().with_key_matching(KeyMatching::Contains);

        timer.start(&CallSite::new("Service", "GetAll"), "");

        assert!(timer.stop(&CallSite::new("Service", "Get"), "").is_some());
        assert!(timer.is_empty());
    }

    #[test]
    fn configured_level_is_used() {
        let events = CapturedEvents::default();
        let timer = ExecutionTimer::new().with_level(Level::DEBUG);
        let call_site = CallSite::new("A", "run");

        events.scoped(|| {
            timer.start(&call_site, "");
            timer.stop(&call_site, "");
        });

        assert_eq!(events.at_level(Level::DEBUG).len(), 2);
    }

    #[test]
    fn parses_key_matching() {
        assert_eq!(
            KeyMatching::from_str("Contains").unwrap(),
            KeyMatching::Contains
        );
        assert_eq!(KeyMatching::Exact.to_string(), "Exact");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_keys_all_complete() {
        let timer = Arc::new(ExecutionTimer::new());

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let timer = Arc::clone(&timer);
                tokio::spawn(async move {
                    let call_site = CallSite::new("Worker", "run").with_instance(i.to_string());
                    assert_eq!(timer.start(&call_site, ""), TimerStart::Started);
                    tokio::task::yield_now().await;
                    timer.stop(&call_site, "")
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }

        assert!(timer.is_empty());
    }
}
