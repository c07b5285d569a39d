/*
[INPUT]:  RPC client of a live connection and a ping interval
[OUTPUT]: Periodic signed ping notifications; transport close on silent death
[POS]:    Liveness layer - background prober owned by the session manager
[UPDATE]: When changing ping cadence or dead-connection handling
*/

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::{Method, RpcClient};

/// Background ping task for one connection
#[derive(Debug)]
pub struct Heartbeat {
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start pinging every `period`, first ping one period from now
    pub fn spawn(rpc: Arc<RpcClient>, period: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !rpc.transport().is_open() {
                            warn!("ws not open on heartbeat, closing transport for reconnect");
                            rpc.transport().close();
                            break;
                        }
                        match rpc.notify(Method::Ping, json!([])).await {
                            Ok(()) => debug!("heartbeat ping sent"),
                            Err(err) => warn!(error = %err, "heartbeat ping failed"),
                        }
                    }
                }
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the task to stop without waiting
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
