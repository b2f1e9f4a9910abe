use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nrpc_frame::DEFAULT_MAX_PAYLOAD;

use crate::auth::Authenticator;
use crate::dispatch::{Dispatcher, ServiceRegistry};

/// Default per-call timeout, also the sweep period.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(5000);
/// First reconnect delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
/// Reconnect delay ceiling.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(20000);

/// Per-connection behavior.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Calls older than this fail with `RPC_TIMEOUT`. Default: 5000 ms.
    pub call_timeout: Duration,
    /// Maximum frame body size accepted or sent. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Everything needed to build one [`crate::Peer`].
#[derive(Clone)]
pub struct PeerOptions {
    /// Label used in logs, usually the endpoint pair.
    pub name: String,
    pub authenticator: Arc<dyn Authenticator>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub config: PeerConfig,
}

impl PeerOptions {
    /// Options with a fresh in-memory service registry and default config.
    pub fn new(name: impl Into<String>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            name: name.into(),
            authenticator,
            dispatcher: Arc::new(ServiceRegistry::new()),
            config: PeerConfig::default(),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }
}

impl fmt::Debug for PeerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerOptions")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Options shared by every peer a server or client creates.
#[derive(Clone)]
pub struct EndpointOptions {
    pub authenticator: Arc<dyn Authenticator>,
    /// Fallback dispatcher shared by every peer. Services bound with
    /// [`crate::Peer::accept`] stay on their own connection and take
    /// precedence. `None` gives each peer its own empty registry.
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
    pub peer_config: PeerConfig,
}

impl EndpointOptions {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            dispatcher: None,
            peer_config: PeerConfig::default(),
        }
    }

    pub(crate) fn peer_options(&self, name: String) -> PeerOptions {
        let options = PeerOptions::new(name, Arc::clone(&self.authenticator))
            .with_config(self.peer_config.clone());
        match &self.dispatcher {
            Some(dispatcher) => options.with_dispatcher(Arc::clone(dispatcher)),
            None => options,
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerOptions {
    pub endpoint: EndpointOptions,
}

impl ServerOptions {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            endpoint: EndpointOptions::new(authenticator),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.endpoint.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_peer_config(mut self, config: PeerConfig) -> Self {
        self.endpoint.peer_config = config;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint.peer_config.call_timeout = timeout;
        self
    }
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientOptions {
    pub endpoint: EndpointOptions,
    /// Delay before the first reconnect. Default: 1000 ms.
    pub initial_backoff: Duration,
    /// Ceiling for the doubling reconnect delay. Default: 20000 ms.
    pub max_backoff: Duration,
}

impl ClientOptions {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            endpoint: EndpointOptions::new(authenticator),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.endpoint.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_peer_config(mut self, config: PeerConfig) -> Self {
        self.endpoint.peer_config = config;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint.peer_config.call_timeout = timeout;
        self
    }

    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }
}
