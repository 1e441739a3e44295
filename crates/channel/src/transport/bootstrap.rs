use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelId, ChannelState, CloseFuture, CloseGuard, CloseOutcome};
use crate::pipeline::{Pipeline, PipelineFactory};
use crate::protocol::{BoxError, ChannelError, TransportError};
use crate::transport::{ChannelConfig, EventLoopGroup, WeakGroup};

fn empty_pipeline() -> Result<Pipeline, BoxError> {
    Ok(Pipeline::new())
}

/// Binds listeners whose accepted connections become channels of an [`EventLoopGroup`].
///
/// ```no_run
/// use micro_channel::handler::make_handler;
/// use micro_channel::pipeline::Pipeline;
/// use micro_channel::protocol::BoxError;
/// use micro_channel::transport::{ChannelConfig, EventLoopConfig, EventLoopGroup, ServerBootstrap};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let group = EventLoopGroup::new(EventLoopConfig::default())?;
/// let server = ServerBootstrap::new(group)
///     .child_config(ChannelConfig::new().with_tcp_nodelay(true))
///     .child_pipeline(|| -> Result<Pipeline, BoxError> {
///         let mut pipeline = Pipeline::new();
///         pipeline.add_last("echo", make_handler(|ctx, msg| {
///             ctx.write(msg);
///             Ok(None)
///         }))?;
///         Ok(pipeline)
///     })
///     .bind("127.0.0.1:8080")?;
///
/// server.close().wait_blocking();
/// # Ok(())
/// # }
/// ```
pub struct ServerBootstrap {
    group: EventLoopGroup,
    child_config: ChannelConfig,
    child_pipeline: Arc<dyn PipelineFactory>,
}

impl ServerBootstrap {
    pub fn new(group: EventLoopGroup) -> Self {
        Self { group, child_config: ChannelConfig::default(), child_pipeline: Arc::new(empty_pipeline) }
    }

    /// Socket options applied to every accepted connection
    pub fn child_config(mut self, config: ChannelConfig) -> Self {
        self.child_config = config;
        self
    }

    /// Builds the pipeline of every accepted connection
    pub fn child_pipeline(mut self, factory: impl PipelineFactory) -> Self {
        self.child_pipeline = Arc::new(factory);
        self
    }

    /// Binds `address` and starts accepting on one of the group's workers.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Io`] if the address can't be bound
    /// - [`TransportError::Shutdown`] if the group is shutting down
    pub fn bind<A: ToSocketAddrs>(&self, address: A) -> Result<ServerChannel, TransportError> {
        if self.group.is_shutdown() {
            return Err(TransportError::Shutdown);
        }

        let listener = std::net::TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (channel, _outbound) = Channel::new(Pipeline::new(), Some(local_addr), None);
        let guard = CloseGuard::new(channel.clone());
        self.group.track_server(&channel);

        let acceptor = Acceptor {
            group: self.group.downgrade(),
            server: channel.clone(),
            child_config: self.child_config.clone(),
            child_pipeline: Arc::clone(&self.child_pipeline),
        };
        if let Err(e) = self.group.spawn(acceptor.run(guard, listener)) {
            self.group.untrack_server(channel.id());
            return Err(e);
        }

        Ok(ServerChannel { channel, local_addr })
    }
}

impl fmt::Debug for ServerBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBootstrap")
            .field("group", &self.group)
            .field("child_config", &self.child_config)
            .finish_non_exhaustive()
    }
}

struct Acceptor {
    group: WeakGroup,
    server: Channel,
    child_config: ChannelConfig,
    child_pipeline: Arc<dyn PipelineFactory>,
}

impl Acceptor {
    async fn run(self, guard: CloseGuard, listener: std::net::TcpListener) {
        let outcome = match TcpListener::from_std(listener) {
            Ok(_) if !self.server.mark_connected() => CloseOutcome::Clean,
            Ok(listener) => {
                info!(channel = %self.server.id(), address = ?self.server.local_addr(), "start listening");
                self.accept_loop(&listener).await;
                CloseOutcome::Clean
            }
            Err(e) => {
                error!(channel = %self.server.id(), cause = %e, "can't register listener with the event loop");
                CloseOutcome::failed(ChannelError::io(e))
            }
        };

        if let Some(group) = self.group.upgrade() {
            group.untrack_server(self.server.id());
        }
        guard.finish(outcome);
        info!(channel = %self.server.id(), "stop listening");
    }

    async fn accept_loop(&self, listener: &TcpListener) {
        let close_token = self.server.close_token().clone();
        loop {
            let (tcp_stream, peer_addr) = select! {
                biased;

                () = close_token.cancelled() => return,

                accepted = listener.accept() => match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            let Some(group) = self.group.upgrade() else {
                debug!(channel = %self.server.id(), "event loop group is gone");
                return;
            };

            let pipeline = match self.child_pipeline.new_pipeline() {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    warn!(peer = %peer_addr, cause = %e, "can't build child pipeline, drop connection");
                    continue;
                }
            };

            let registered = tcp_stream
                .into_std()
                .map_err(TransportError::io)
                .and_then(|stream| group.register(stream, pipeline, &self.child_config));
            match registered {
                Ok(child) => debug!(channel = %self.server.id(), child = %child.id(), peer = %peer_addr, "accepted"),
                Err(e) => warn!(peer = %peer_addr, cause = %e, "can't register accepted connection"),
            }
        }
    }
}

/// A bound listener.
///
/// Closing it stops accepting and releases the listening socket; channels accepted so
/// far stay open.
#[derive(Debug, Clone)]
pub struct ServerChannel {
    channel: Channel,
    local_addr: SocketAddr,
}

impl ServerChannel {
    pub fn id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Stops accepting. Idempotent, like [`Channel::close`].
    pub fn close(&self) -> CloseFuture {
        self.channel.close()
    }

    pub fn close_future(&self) -> CloseFuture {
        self.channel.close_future()
    }
}

/// Connects outgoing sockets and registers them with an [`EventLoopGroup`].
pub struct ClientBootstrap {
    group: EventLoopGroup,
    config: ChannelConfig,
    pipeline: Arc<dyn PipelineFactory>,
}

impl ClientBootstrap {
    pub fn new(group: EventLoopGroup) -> Self {
        Self { group, config: ChannelConfig::default(), pipeline: Arc::new(empty_pipeline) }
    }

    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pipeline(mut self, factory: impl PipelineFactory) -> Self {
        self.pipeline = Arc::new(factory);
        self
    }

    /// Connects to `address` and registers the connection.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Io`] if the connection can't be established
    /// - [`TransportError::Pipeline`] if the pipeline factory fails; the socket is closed again
    /// - [`TransportError::Shutdown`] if the group is shutting down
    pub async fn connect<A: tokio::net::ToSocketAddrs>(&self, address: A) -> Result<Channel, TransportError> {
        let tcp_stream = tokio::net::TcpStream::connect(address).await?;
        let pipeline = self.pipeline.new_pipeline().map_err(TransportError::pipeline)?;
        let stream = tcp_stream.into_std()?;
        self.group.register(stream, pipeline, &self.config)
    }
}

impl fmt::Debug for ClientBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBootstrap")
            .field("group", &self.group)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
