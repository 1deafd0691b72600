//! HTTP implementation of the dataset transport.
//!
//! Loads are `GET url[?params=<json>]` answered with a rowset document;
//! saves are `POST url` with the JSON change set, answered with a save
//! result. Requests run on a tokio runtime and their completions are
//! queued on a channel that the dataset's owner drains on its own thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use horizon_rowset::{
    LoadRequest, Nav, RequestId, RowsetDoc, SaveRequest, SaveResult, Transport, TransportError,
    TransportEvent,
};
use horizon_rowset_core::targets;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use url::Url;

use crate::error::{NetError, Result, transport_error};

/// Outcome of one request, before decoding into a typed body.
type Completion = std::result::Result<JsonValue, TransportError>;

/// Configuration of an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Whole-request timeout.
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub user_agent: Option<String>,
    /// Base for relative rowset URLs.
    pub base_url: Option<Url>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: Some(format!("HorizonRowset/{} (Rust)", env!("CARGO_PKG_VERSION"))),
            base_url: None,
        }
    }
}

/// Builder for an [`HttpTransport`].
#[derive(Debug, Default)]
pub struct HttpTransportBuilder {
    config: HttpTransportConfig,
    runtime: Option<Handle>,
}

impl HttpTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Disable the request timeout.
    pub fn no_timeout(mut self) -> Self {
        self.config.timeout = None;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Resolve relative rowset URLs against `base`.
    pub fn base_url(mut self, base: &str) -> Result<Self> {
        self.config.base_url = Some(Url::parse(base)?);
        Ok(self)
    }

    /// Run requests on `runtime` instead of the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the transport.
    ///
    /// Fails with [`NetError::NoRuntime`] if no runtime was set and the
    /// caller is not inside one.
    pub fn build(self) -> Result<HttpTransport> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| NetError::NoRuntime)?,
        };
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build()?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Ok(HttpTransport {
            client,
            config: self.config,
            runtime,
            events_tx,
            events_rx,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

/// A [`Transport`] speaking JSON over HTTP.
///
/// ```ignore
/// let transport = Arc::new(HttpTransport::builder().build()?);
/// let mut nav = Nav::new(NavConfig::default().with_url("https://example.com/rowsets/orders"))
///     .with_transport(transport.clone());
/// nav.reload()?;
///
/// // later, on the thread that owns `nav`
/// transport.deliver(&mut nav);
/// ```
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
    runtime: Handle,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    tasks: Arc<Mutex<HashMap<RequestId, AbortHandle>>>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    /// Completion events, in arrival order.
    pub fn events(&self) -> &Receiver<TransportEvent> {
        &self.events_rx
    }

    /// Number of requests still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Feed every queued completion into `nav`. Returns the number of
    /// events delivered.
    ///
    /// Meant for a transport serving a single dataset; a shared transport
    /// should route [`HttpTransport::events`] itself.
    pub fn deliver(&self, nav: &mut Nav) -> usize {
        let mut count = 0;
        for event in self.events_rx.try_iter() {
            nav.handle_transport_event(event);
            count += 1;
        }
        count
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        match &self.config.base_url {
            Some(base) => Ok(base.join(url)?),
            None => Ok(Url::parse(url)?),
        }
    }

    fn load_url(&self, request: &LoadRequest) -> Result<Url> {
        let mut url = self.resolve(&request.url)?;
        if let Some(params) = &request.params {
            let json = serde_json::to_string(params)?;
            url.query_pairs_mut().append_pair("params", &json);
        }
        Ok(url)
    }

    /// Spawn a request task. The task's abort handle is registered before
    /// the task can finish and unregister itself.
    fn spawn<F>(&self, id: RequestId, request: F, wrap: fn(RequestId, Completion) -> TransportEvent)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        let tasks = self.tasks.clone();
        let mut registry = self.tasks.lock();
        let handle = self.runtime.spawn(async move {
            let result = request.await;
            tasks.lock().remove(&id);
            if let Err(err) = &result {
                tracing::debug!(target: targets::TRANSPORT, id = id.get(), %err, "request failed");
            }
            if tx.send(wrap(id, result)).is_err() {
                tracing::debug!(target: targets::TRANSPORT, id = id.get(), "transport dropped, event discarded");
            }
        });
        registry.insert(id, handle.abort_handle());
    }

    fn fail_now(&self, id: RequestId, event: TransportEvent, err: &NetError) {
        tracing::warn!(target: targets::TRANSPORT, id = id.get(), %err, "request not sent");
        let _ = self.events_tx.send(event);
    }
}

/// Send a prepared request and decode its JSON body.
async fn fetch_json(request: reqwest::RequestBuilder) -> Completion {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match body.trim() {
            "" => status.canonical_reason().unwrap_or_default().to_string(),
            text => text.to_string(),
        };
        return Err(TransportError::http(status.as_u16(), message));
    }
    response.json::<JsonValue>().await.map_err(transport_error)
}

fn loaded(id: RequestId, result: Completion) -> TransportEvent {
    let result = result.and_then(|json| {
        serde_json::from_value::<RowsetDoc>(json).map_err(|err| TransportError::decode(err.to_string()))
    });
    TransportEvent::Loaded { id, result }
}

fn saved(id: RequestId, result: Completion) -> TransportEvent {
    let result = result.and_then(|json| {
        serde_json::from_value::<SaveResult>(json).map_err(|err| TransportError::decode(err.to_string()))
    });
    TransportEvent::Saved { id, result }
}

impl Transport for HttpTransport {
    fn load(&self, id: RequestId, request: LoadRequest) {
        let url = match self.load_url(&request) {
            Ok(url) => url,
            Err(err) => {
                let event = loaded(id, Err(TransportError::network(err.to_string())));
                return self.fail_now(id, event, &err);
            }
        };
        tracing::debug!(target: targets::TRANSPORT, id = id.get(), %url, "GET rowset");
        let builder = self.client.get(url).header(reqwest::header::ACCEPT, "application/json");
        self.spawn(id, fetch_json(builder), loaded);
    }

    fn save(&self, id: RequestId, request: SaveRequest) {
        let url = match self.resolve(&request.url) {
            Ok(url) => url,
            Err(err) => {
                let event = saved(id, Err(TransportError::network(err.to_string())));
                return self.fail_now(id, event, &err);
            }
        };
        tracing::debug!(
            target: targets::TRANSPORT,
            id = id.get(),
            %url,
            rows = request.changes.rows.len(),
            "POST changes"
        );
        let builder = self.client.post(url).json(&request.changes);
        self.spawn(id, fetch_json(builder), saved);
    }

    fn abort(&self, id: RequestId) {
        if let Some(handle) = self.tasks.lock().remove(&id) {
            handle.abort();
            tracing::debug!(target: targets::TRANSPORT, id = id.get(), "request aborted");
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
    }
}
