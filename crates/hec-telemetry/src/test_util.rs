//! Shared helpers for unit tests: an event capturing subscriber layer and an
//! in-process stand-in for the HEC backend.
use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::post,
};
use tokio::net::TcpListener;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{
    Layer, Registry,
    layer::{Context, SubscriberExt},
};
use url::Url;

/// One [`Event`] recorded by [`CapturedEvents`].
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> &str {
        self.fields
            .get(name)
            .map(String::as_str)
            .unwrap_or_else(|| panic!("event has no field named {name:?}: {self:?}"))
    }

    pub fn message(&self) -> &str {
        self.field("message")
    }
}

/// A [`Layer`] which records every event emitted by this crate.
#[derive(Clone, Default)]
pub struct CapturedEvents(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedEvents {
    /// Runs `f` with a subscriber recording into `self`.
    pub fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::subscriber::with_default(Registry::default().with(self.clone()), f)
    }

    /// Installs the recording subscriber for the current thread until the
    /// guard is dropped. Use with current-thread runtimes only.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(Registry::default().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.fields.get("message").is_some_and(|m| m == message))
            .collect()
    }

    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level)
            .collect()
    }

    pub fn single(&self) -> CapturedEvent {
        let events = self.events();
        assert_eq!(events.len(), 1, "expected exactly one event: {events:#?}");
        events[0].clone()
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !event.metadata().target().starts_with("hec_telemetry") {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: visitor.0,
        });
    }
}

#[derive(Default)]
struct FieldVisitor(BTreeMap<String, String>);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_owned(), value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_owned(), format!("{value:?}"));
    }
}

/// A request received by the [`Collector`].
#[derive(Clone, Debug)]
pub struct CollectedRequest {
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

type Collected = Arc<Mutex<Vec<CollectedRequest>>>;

/// An HTTP server accepting HEC requests on an ephemeral port.
pub struct Collector {
    addr: SocketAddr,
    requests: Collected,
}

impl Collector {
    pub const PATH: &str = "/services/collector";

    /// Starts a collector which answers every request with `status`.
    pub async fn start(status: StatusCode) -> Self {
        let requests = Collected::default();
        let router = Router::new()
            .route(Self::PATH, post(collect))
            .with_state((requests.clone(), status));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Self { addr, requests }
    }

    pub fn endpoint(&self) -> Url {
        format!("http://{}{}", self.addr, Self::PATH).parse().unwrap()
    }

    pub fn requests(&self) -> Vec<CollectedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn collect(
    State((requests, status)): State<(Collected, StatusCode)>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);

    requests
        .lock()
        .unwrap()
        .push(CollectedRequest { authorization, body });

    status
}

/// Returns an endpoint on which nothing is listening.
pub async fn unreachable_endpoint() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    format!("http://{addr}{}", Collector::PATH).parse().unwrap()
}

/// Returns an endpoint which accepts connections but never answers.
pub async fn silent_endpoint() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    format!("http://{addr}{}", Collector::PATH).parse().unwrap()
}
