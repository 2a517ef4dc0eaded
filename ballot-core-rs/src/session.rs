//! Client session against one partition
//!
//! A session binds a primitive to a partition connection and owns the
//! header store, the keep-alive task and the background listener tasks.
//! Closing it cancels every background task through a shared shutdown
//! signal and resolves all pending stream waits as cancelled.

use crate::config::ElectionConfig;
use crate::error::{ElectionError, Result, RpcError};
use crate::header::HeaderStore;
use crate::service::{
    CloseSessionRequest, ElectionService, KeepAliveRequest, OpenSessionRequest,
};
use crate::types::{PrimitiveName, SessionId};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Resolve once `shutdown` is raised or its sender is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Open session bound to one partition connection
pub struct Session {
    name: PrimitiveName,
    service: Arc<dyn ElectionService>,
    headers: Arc<HeaderStore>,
    request_timeout: Duration,
    event_buffer: usize,
    task_shutdown_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Open a session for `name` and start its keep-alive task.
    ///
    /// If the open request times out the server may still have created the
    /// session. Nothing closes it from here; the server expires it once
    /// `session_timeout` passes without a keep-alive.
    pub async fn open(
        name: PrimitiveName,
        service: Arc<dyn ElectionService>,
        config: &ElectionConfig,
    ) -> Result<Self> {
        let request = OpenSessionRequest {
            name: name.clone(),
            timeout: config.session_timeout,
        };
        let response = match timeout(config.request_timeout, service.open_session(request)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Open session for {} timed out after {:?}; any session created by the server expires after {:?}",
                    name, config.request_timeout, config.session_timeout
                );
                return Err(ElectionError::Timeout(config.request_timeout));
            }
        };

        let headers = Arc::new(HeaderStore::new(&response.header));
        let (shutdown_tx, _) = watch::channel(false);

        let session = Self {
            name,
            service,
            headers,
            request_timeout: config.request_timeout,
            event_buffer: config.event_buffer,
            task_shutdown_timeout: config.listener_shutdown_timeout,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        };

        let keep_alive = session.spawn_keep_alive(config.keep_alive_interval());
        session.track(keep_alive);

        info!("Session {} opened for {}", session.id(), session.name);
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.headers.session_id()
    }

    pub fn name(&self) -> &PrimitiveName {
        &self.name
    }

    pub fn headers(&self) -> &Arc<HeaderStore> {
        &self.headers
    }

    pub fn service(&self) -> &Arc<dyn ElectionService> {
        &self.service
    }

    /// Stream buffer requested when subscribing to events
    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    pub fn is_closed(&self) -> bool {
        self.headers.is_closed()
    }

    /// Receiver raised when the session closes
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run one request, bounded by the request timeout and the session lifetime
    pub async fn call<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RpcError>>,
    {
        let mut shutdown = self.shutdown_signal();
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => Err(ElectionError::SessionClosed(self.id())),
            result = timeout(self.request_timeout, request) => match result {
                Ok(response) => Ok(response?),
                Err(_) => Err(ElectionError::Timeout(self.request_timeout)),
            },
        }
    }

    /// Keep a background task so `close` can wait for it
    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn spawn_keep_alive(&self, period: Duration) -> JoinHandle<()> {
        let service = self.service.clone();
        let headers = self.headers.clone();
        let request_timeout = self.request_timeout;
        let mut shutdown = self.shutdown_signal();

        tokio::spawn(async move {
            let session_id = headers.session_id();
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {}
                }

                let Ok(header) = headers.current_header() else {
                    break;
                };

                let request = service.keep_alive(KeepAliveRequest { header });
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    result = timeout(request_timeout, request) => match result {
                        Ok(Ok(response)) => {
                            debug!("Session {}: keep-alive acknowledged", session_id);
                            headers.update_header(&response.header);
                        }
                        Ok(Err(e)) => warn!("Session {}: keep-alive failed: {}", session_id, e),
                        Err(_) => warn!(
                            "Session {}: keep-alive timed out after {:?}",
                            session_id, request_timeout
                        ),
                    },
                }
            }

            debug!("Session {}: keep-alive stopped", session_id);
        })
    }

    /// Close the session, keeping server-side primitive state
    pub async fn close(&self) -> Result<()> {
        self.shutdown(false).await
    }

    /// Close the session and remove the primitive's server-side state
    pub async fn delete(&self) -> Result<()> {
        self.shutdown(true).await
    }

    async fn shutdown(&self, delete: bool) -> Result<()> {
        let Some(header) = self.headers.close() else {
            debug!("Session {}: already closed", self.id());
            return Ok(());
        };

        self.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if timeout(self.task_shutdown_timeout, &mut task).await.is_err() {
                warn!(
                    "Session {}: background task did not stop within {:?}, aborting",
                    self.id(),
                    self.task_shutdown_timeout
                );
                task.abort();
            }
        }

        let request = CloseSessionRequest { header, delete };
        let result = match timeout(self.request_timeout, self.service.close_session(request)).await
        {
            Ok(result) => result.map(|_| ()).map_err(ElectionError::from),
            Err(_) => Err(ElectionError::Timeout(self.request_timeout)),
        };

        match &result {
            Ok(()) if delete => info!("Session {} closed, {} deleted", self.id(), self.name),
            Ok(()) => info!("Session {} closed", self.id()),
            Err(e) => warn!("Session {}: close request failed: {}", self.id(), e),
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.headers.close().is_some() {
            debug!("Session {} dropped without close", self.id());
        }
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryController;
    use crate::service::GetLeadershipRequest;

    fn config() -> ElectionConfig {
        ElectionConfig::new("session-test")
            .with_session_timeout(Duration::from_millis(100))
            .with_request_timeout(Duration::from_millis(500))
    }

    async fn open(controller: &Arc<MemoryController>) -> Session {
        let config = config();
        Session::open(config.name.clone(), controller.clone(), &config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_assigns_session_id() {
        let controller = Arc::new(MemoryController::new());
        let a = open(&controller).await;
        let b = open(&controller).await;

        assert_ne!(a.id(), b.id());
        assert!(controller.is_session_open(a.id()));
        assert_eq!(a.event_buffer(), config().event_buffer);
    }

    #[tokio::test]
    async fn test_open_timeout_leaves_server_session_to_expire() {
        let controller = Arc::new(
            MemoryController::new()
                .with_latency(Duration::from_millis(200), Duration::from_millis(200)),
        );
        let config = config().with_request_timeout(Duration::from_millis(20));

        let result = Session::open(config.name.clone(), controller.clone(), &config).await;
        assert!(matches!(result, Err(ElectionError::Timeout(_))));
        // Created before the reply was lost; reclaimed by the server's session timeout
        assert!(controller.is_session_open(1));
        assert_eq!(controller.keep_alives(1), 0);
    }

    #[tokio::test]
    async fn test_keep_alive_runs_until_close() {
        let controller = Arc::new(MemoryController::new());
        let session = open(&controller).await;

        tokio::time::sleep(Duration::from_millis(220)).await;
        assert!(controller.keep_alives(session.id()) >= 2);

        session.close().await.unwrap();
        let after_close = controller.keep_alives(session.id());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(controller.keep_alives(session.id()), after_close);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let controller = Arc::new(MemoryController::new());
        let session = open(&controller).await;

        session.close().await.unwrap();
        session.close().await.unwrap();
        session.delete().await.unwrap();
        assert!(!controller.is_session_open(session.id()));
    }

    #[tokio::test]
    async fn test_call_after_close_is_rejected() {
        let controller = Arc::new(MemoryController::new());
        let session = open(&controller).await;
        session.close().await.unwrap();

        assert!(matches!(
            session.headers().next_header(),
            Err(ElectionError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let controller = Arc::new(MemoryController::new());
        let config = config().with_request_timeout(Duration::from_millis(50));
        let session = Session::open(config.name.clone(), controller.clone(), &config)
            .await
            .unwrap();

        controller.set_latency(Duration::from_millis(300), Duration::from_millis(300));
        let header = session.headers().current_header().unwrap();
        let result = session
            .call(
                session
                    .service()
                    .get_leadership(GetLeadershipRequest { header }),
            )
            .await;
        assert!(matches!(result, Err(ElectionError::Timeout(_))));
    }
}
