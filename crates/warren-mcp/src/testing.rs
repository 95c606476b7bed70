//! Scripted transport for exercising sessions and the manager without real
//! processes or sockets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use warren_types::errors::GatewayError;
use warren_types::params::ServerParams;
use warren_types::rpc::JsonRpcMessage;
use warren_types::traits::{McpTransport, TransportFactory};

struct Inner {
    replies: StdMutex<VecDeque<JsonRpcMessage>>,
    sent: StdMutex<Vec<JsonRpcMessage>>,
    hanging: AtomicBool,
    connected: AtomicBool,
    resume: Notify,
}

/// A transport that replays a pre-programmed list of replies.
///
/// Cloning yields a handle onto the same state, so tests can keep one clone
/// for inspection after handing the other to a session.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<JsonRpcMessage>) -> Self {
        Self {
            inner: Arc::new(Inner {
                replies: StdMutex::new(replies.into()),
                sent: StdMutex::new(Vec::new()),
                hanging: AtomicBool::new(false),
                connected: AtomicBool::new(true),
                resume: Notify::new(),
            }),
        }
    }

    /// A transport whose `recv` never completes.
    pub fn hanging() -> Self {
        let transport = Self::new(Vec::new());
        transport.hang_on_recv();
        transport
    }

    /// Make subsequent `recv` calls park until [`resume_recv`].
    ///
    /// [`resume_recv`]: ScriptedTransport::resume_recv
    pub fn hang_on_recv(&self) {
        self.inner.hanging.store(true, Ordering::SeqCst);
    }

    /// Release parked `recv` calls.
    pub fn resume_recv(&self) {
        self.inner.hanging.store(false, Ordering::SeqCst);
        self.inner.resume.notify_waiters();
    }

    /// Everything sent through this transport, in order.
    pub fn sent(&self) -> Vec<JsonRpcMessage> {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Whether `close` has not yet been called.
    pub fn transport_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Append more scripted replies.
    pub fn push_replies(&self, replies: impl IntoIterator<Item = JsonRpcMessage>) {
        self.inner
            .replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(replies);
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), GatewayError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("scripted", "transport is closed"));
        }
        self.inner
            .sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Result<JsonRpcMessage, GatewayError> {
        while self.inner.hanging.load(Ordering::SeqCst) {
            self.inner.resume.notified().await;
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("scripted", "transport is closed"));
        }
        self.inner
            .replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .ok_or_else(|| GatewayError::connection("scripted", "script exhausted"))
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

/// A factory mapping server names to scripted transports.
///
/// Unknown names fail like an unreachable host, which is how manager tests
/// simulate broken catalog entries.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: StdMutex<std::collections::HashMap<String, VecDeque<ScriptedTransport>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport to hand out for `server`. Multiple queued
    /// transports serve successive connects (boot, then reload).
    pub fn script(&self, server: &str, transport: ScriptedTransport) {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(server.to_string())
            .or_default()
            .push_back(transport);
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn connect(
        &self,
        params: &ServerParams,
    ) -> Result<Box<dyn McpTransport>, GatewayError> {
        let transport = self
            .scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&params.name)
            .and_then(|queue| queue.pop_front());
        match transport {
            Some(t) => Ok(Box::new(t)),
            None => Err(GatewayError::connection(
                &params.name,
                "no scripted transport for this server",
            )),
        }
    }
}
