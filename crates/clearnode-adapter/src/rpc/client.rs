/*
[INPUT]:  Outbound calls from the session manager, inbound frames from dispatch
[OUTPUT]: Resolved/rejected pending calls and method-keyed pushes
[POS]:    RPC layer - pending call registry and dispatch
[UPDATE]: When changing correlation, id generation or subscriber delivery
*/

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::auth::SessionSigner;
use crate::error::{ClearnodeError, Result};
use crate::rpc::{Method, RpcRequest, RpcResponse};
use crate::ws::WsTransport;

const UNRECOGNIZED_LOG_LIMIT: usize = 3;
const MALFORMED_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static UNRECOGNIZED_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static MALFORMED_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

struct PendingCall {
    expected: Method,
    reply: oneshot::Sender<Result<RpcResponse>>,
}

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<u64, PendingCall>,
    closed: bool,
}

/// Signs outbound requests and routes inbound frames back to their callers
pub struct RpcClient {
    transport: WsTransport,
    signer: Arc<SessionSigner>,
    next_id: AtomicU64,
    pending: Mutex<PendingCalls>,
    subscribers: Mutex<HashMap<Method, Vec<mpsc::UnboundedSender<RpcResponse>>>>,
}

impl RpcClient {
    pub fn new(transport: WsTransport, signer: Arc<SessionSigner>) -> Self {
        Self {
            transport,
            signer,
            next_id: AtomicU64::new(now_millis()),
            pending: Mutex::new(PendingCalls::default()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Session signer used for every request
    pub fn signer(&self) -> &SessionSigner {
        &self.signer
    }

    pub fn transport(&self) -> &WsTransport {
        &self.transport
    }

    /// Unsigned request with a fresh id and the current timestamp
    pub fn next_request(&self, method: Method, params: Value) -> RpcRequest {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        RpcRequest::new(request_id, method, params, now_millis())
    }

    /// Sign with the session key, send, and wait for the correlated response.
    ///
    /// There is no timeout here; callers apply their own deadline.
    pub async fn call(&self, method: Method, params: Value) -> Result<RpcResponse> {
        let mut request = self.next_request(method, params);
        request.sign_with(&self.signer)?;
        self.call_signed(request).await
    }

    /// Send an already signed request and wait for its response
    pub async fn call_signed(&self, request: RpcRequest) -> Result<RpcResponse> {
        let request_id = request.request_id;
        let (reply, response) = oneshot::channel();

        {
            let mut pending = self.lock_pending();
            if pending.closed {
                return Err(ClearnodeError::NotConnected);
            }
            if pending.calls.contains_key(&request_id) {
                return Err(ClearnodeError::InvalidResponse(format!(
                    "request id {request_id} already in flight"
                )));
            }
            pending.calls.insert(
                request_id,
                PendingCall {
                    expected: request.method,
                    reply,
                },
            );
        }

        if let Err(err) = self.transport.send(request.to_frame()).await {
            self.lock_pending().calls.remove(&request_id);
            return Err(err);
        }
        debug!(request_id, method = %request.method, "rpc call sent");

        response.await.unwrap_or(Err(ClearnodeError::ConnectionLost))
    }

    /// Fire-and-forget signed message
    pub async fn notify(&self, method: Method, params: Value) -> Result<()> {
        let mut request = self.next_request(method, params);
        request.sign_with(&self.signer)?;
        self.send_request(&request).await
    }

    /// Send a request as-is without registering it
    pub async fn send_request(&self, request: &RpcRequest) -> Result<()> {
        self.transport.send(request.to_frame()).await?;
        debug!(request_id = request.request_id, method = %request.method, "rpc message sent");
        Ok(())
    }

    /// Receive every unsolicited frame tagged `method`
    pub fn subscribe(&self, method: Method) -> mpsc::UnboundedReceiver<RpcResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_subscribers().entry(method).or_default().push(tx);
        rx
    }

    /// Route one inbound frame
    pub fn dispatch(&self, response: RpcResponse) {
        let method = response.method();
        let pending = self.lock_pending().calls.remove(&response.request_id);

        if let Some(call) = pending {
            let result = match method {
                Some(method) if method == call.expected => Ok(response),
                Some(Method::Error) => Err(ClearnodeError::Node(response.error_message())),
                _ => Err(ClearnodeError::InvalidResponse(format!(
                    "expected {} response, got {}",
                    call.expected, response.method
                ))),
            };
            if call.reply.send(result).is_err() {
                debug!("late response dropped, caller no longer waiting");
            }
            return;
        }

        match method {
            Some(method) => self.publish(method, response),
            None => log_unrecognized_once(&response),
        }
    }

    /// Reject every in-flight call; later calls fail with `NotConnected`
    pub fn fail_all(&self) {
        let drained: Vec<PendingCall> = {
            let mut pending = self.lock_pending();
            pending.closed = true;
            pending.calls.drain().map(|(_, call)| call).collect()
        };

        if !drained.is_empty() {
            info!(count = drained.len(), "rejecting pending calls, connection lost");
        }
        for call in drained {
            let _ = call.reply.send(Err(ClearnodeError::ConnectionLost));
        }
        self.lock_subscribers().clear();
    }

    /// Number of calls awaiting a response
    pub fn pending_count(&self) -> usize {
        self.lock_pending().calls.len()
    }

    fn publish(&self, method: Method, response: RpcResponse) {
        let mut subscribers = self.lock_subscribers();
        match subscribers.get_mut(&method) {
            Some(list) if !list.is_empty() => {
                list.retain(|tx| tx.send(response.clone()).is_ok());
            }
            _ => debug!(%method, request_id = response.request_id, "no subscriber for push"),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_subscribers(
        &self,
    ) -> MutexGuard<'_, HashMap<Method, Vec<mpsc::UnboundedSender<RpcResponse>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("signer", &self.signer)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn log_unrecognized_once(response: &RpcResponse) {
    let count = UNRECOGNIZED_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < UNRECOGNIZED_LOG_LIMIT {
        warn!(
            sample_index = count + 1,
            sample_limit = UNRECOGNIZED_LOG_LIMIT,
            method = %response.method,
            request_id = response.request_id,
            "ws frame method unrecognized, discarded"
        );
    }
}

/// Log a frame that failed to parse; the frame is dropped
pub(crate) fn log_malformed_frame(err: &ClearnodeError, raw: &str) {
    let count = MALFORMED_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < MALFORMED_LOG_LIMIT {
        warn!(
            sample_index = count + 1,
            sample_limit = MALFORMED_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws frame parse failed, discarded"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(message = %preview, "ws frame parse failed");
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
