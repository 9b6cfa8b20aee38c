//! Per-server protocol client
//!
//! One `ServerClient` owns one transport session. A background router task
//! matches incoming responses to waiting callers by request id, so any
//! number of invocation tasks can have requests in flight without touching
//! the transport directly.

use super::error::WireError;
use super::transport::Transport;
use super::types::{
    CallResult, ClientInfo, HandshakeParams, HandshakeResult, ServerInfo, ToolDescriptor,
};
use super::wire::{
    PROTOCOL_VERSION, RequestId, RpcFault, WireMessage, WireNotification, WireRequest,
    WireResponse, methods,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default per-request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Commands from the client to its background router
enum RouterCommand {
    /// Register a pending request awaiting a response
    RegisterRequest {
        id: String,
        sender: oneshot::Sender<WireResponse>,
    },
    /// Stop the router
    Shutdown,
}

/// Background task: route incoming responses to their pending requests.
///
/// The select is biased so registrations are always processed before the
/// responses that could answer them. When the incoming channel closes the
/// session is gone: every pending request is failed so no caller hangs.
async fn response_router(
    mut incoming: mpsc::Receiver<WireMessage>,
    mut commands: mpsc::Receiver<RouterCommand>,
    running: Arc<AtomicBool>,
) {
    let mut pending: HashMap<String, oneshot::Sender<WireResponse>> = HashMap::new();

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => {
                match cmd {
                    Some(RouterCommand::RegisterRequest { id, sender }) => {
                        pending.insert(id, sender);
                    }
                    Some(RouterCommand::Shutdown) | None => {
                        debug!("response router shutting down");
                        break;
                    }
                }
            }
            message = incoming.recv() => {
                match message {
                    Some(WireMessage::Response(response)) => {
                        let id = response.id.to_string();
                        if let Some(sender) = pending.remove(&id) {
                            if sender.send(response).is_err() {
                                warn!(id = %id, "caller gone before response arrived");
                            }
                        } else {
                            warn!(id = %id, "response for unknown request");
                        }
                    }
                    Some(WireMessage::Notification(notification)) => {
                        debug!(method = %notification.method, "server notification");
                    }
                    Some(WireMessage::Request(request)) => {
                        // Server-initiated requests are not part of this protocol profile
                        warn!(method = %request.method, "ignoring server-initiated request");
                    }
                    None => {
                        if running.load(Ordering::SeqCst) {
                            warn!("transport stream closed");
                        }
                        for (id, sender) in pending.drain() {
                            let _ = sender.send(WireResponse::fault(
                                RequestId::String(id),
                                RpcFault::new(-32000, "connection lost"),
                            ));
                        }
                        break;
                    }
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);
}

/// Client for one external tool server
pub struct ServerClient {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    server_info: RwLock<Option<ServerInfo>>,
    request_id: AtomicU64,
    command_tx: mpsc::Sender<RouterCommand>,
    initialized: RwLock<bool>,
    running: Arc<AtomicBool>,
    request_timeout: Duration,
    router_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl ServerClient {
    /// Create a client over an open transport with the default timeout
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_timeout(transport, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout
    pub fn with_timeout(mut transport: Box<dyn Transport>, request_timeout: Duration) -> Self {
        let incoming = transport.take_receiver().unwrap_or_else(|| {
            // a transport without a receive stream is unusable; hand the
            // router an already-closed channel so requests fail fast
            let (tx, rx) = mpsc::channel(1);
            drop(tx);
            rx
        });

        let (command_tx, command_rx) = mpsc::channel(100);
        let running = Arc::new(AtomicBool::new(true));
        let router_handle = tokio::spawn(response_router(
            incoming,
            command_rx,
            Arc::clone(&running),
        ));

        Self {
            transport: Arc::new(Mutex::new(transport)),
            server_info: RwLock::new(None),
            request_id: AtomicU64::new(1),
            command_tx,
            initialized: RwLock::new(false),
            running,
            request_timeout,
            router_handle: StdMutex::new(Some(router_handle)),
        }
    }

    /// Perform the handshake: `initialize` request plus the acknowledging
    /// notification.
    pub async fn initialize(&self) -> Result<ServerInfo, WireError> {
        if *self.initialized.read().await {
            return Err(WireError::AlreadyInitialized);
        }

        let params = HandshakeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: HashMap::new(),
            client_info: ClientInfo::default(),
        };

        let result: HandshakeResult = self.call(methods::INITIALIZE, Some(json!(params))).await?;

        *self.server_info.write().await = Some(result.server_info.clone());
        *self.initialized.write().await = true;

        self.notify(methods::INITIALIZED, None).await?;

        Ok(result.server_info)
    }

    /// Server identity from the handshake
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().await.clone()
    }

    /// Discover the tools the server currently offers
    pub async fn list_capabilities(&self) -> Result<Vec<ToolDescriptor>, WireError> {
        self.ensure_initialized().await?;

        let result: Value = self.call(methods::TOOLS_LIST, None).await?;
        let tools: Vec<ToolDescriptor> =
            serde_json::from_value(result["tools"].clone()).unwrap_or_default();
        Ok(tools)
    }

    /// Invoke a tool by its unqualified name
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<CallResult, WireError> {
        self.ensure_initialized().await?;

        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        self.call(methods::TOOLS_CALL, Some(params)).await
    }

    /// Liveness probe
    pub async fn ping(&self) -> Result<(), WireError> {
        let _: Value = self.call(methods::PING, None).await?;
        Ok(())
    }

    /// Whether the session is still considered live
    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Close the session: stop the router, close the transport, and wait
    /// for the router task to finish.
    pub async fn close(&self) -> Result<(), WireError> {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.command_tx.send(RouterCommand::Shutdown).await;

        {
            let mut transport = self.transport.lock().await;
            transport.close().await?;
        }

        let handle = {
            let mut guard = self
                .router_handle
                .lock()
                .map_err(|_| WireError::protocol("router handle lock poisoned"))?;
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        *self.initialized.write().await = false;
        Ok(())
    }

    /// Send a request and wait for its response, bounded by the request
    /// timeout.
    async fn call<T>(&self, method: &str, params: Option<Value>) -> Result<T, WireError>
    where
        T: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let id_str = id.to_string();

        let mut request = WireRequest::new(id, method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(RouterCommand::RegisterRequest {
                id: id_str,
                sender: response_tx,
            })
            .await
            .map_err(|_| WireError::connection("router gone, cannot register request"))?;

        {
            let mut transport = self.transport.lock().await;
            transport.send(WireMessage::Request(request)).await?;
        }

        let response = timeout(self.request_timeout, response_rx)
            .await
            .map_err(|_| WireError::Timeout(self.request_timeout.as_secs()))?
            .map_err(|_| WireError::connection("response channel closed"))?;

        match response.into_result() {
            Ok(value) => serde_json::from_value(value).map_err(WireError::from),
            Err(fault) => Err(WireError::server(fault.code, fault.message)),
        }
    }

    /// Send a one-way notification
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), WireError> {
        let mut notification = WireNotification::new(method);
        notification.params = params;

        let mut transport = self.transport.lock().await;
        transport
            .send(WireMessage::Notification(notification))
            .await
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        match i64::try_from(id) {
            Ok(n) => RequestId::Number(n),
            Err(_) => RequestId::String(format!("req-{}", id)),
        }
    }

    async fn ensure_initialized(&self) -> Result<(), WireError> {
        if !*self.initialized.read().await {
            return Err(WireError::NotInitialized);
        }
        Ok(())
    }
}

impl Drop for ServerClient {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.router_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
