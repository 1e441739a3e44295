use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{Builder, JoinHandle};

use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use tokio::runtime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelId, CloseGuard};
use crate::connection::drive;
use crate::pipeline::Pipeline;
use crate::protocol::TransportError;
use crate::transport::{ChannelConfig, EventLoopConfig};

type Task = BoxFuture<'static, ()>;

enum WorkerMessage {
    Spawn(Task),
    Terminate,
}

/// A fixed set of single-threaded event loops.
///
/// Each channel is assigned round-robin to one worker at registration and stays there
/// for its whole life, so all events of a channel run on one thread, one at a time.
///
/// Cloning the group is cheap; the workers stop once [`shutdown_gracefully`](Self::shutdown_gracefully)
/// ran or the last clone is dropped. Workers that stop drop their remaining tasks, which
/// still settles every channel's close signal.
#[derive(Clone)]
pub struct EventLoopGroup {
    inner: Arc<GroupInner>,
}

/// A group reference that does not keep the workers alive.
#[derive(Clone)]
pub(crate) struct WeakGroup {
    inner: Weak<GroupInner>,
}

impl WeakGroup {
    pub(crate) fn upgrade(&self) -> Option<EventLoopGroup> {
        self.inner.upgrade().map(|inner| EventLoopGroup { inner })
    }
}

struct GroupInner {
    config: EventLoopConfig,
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    channels: Mutex<HashMap<ChannelId, Channel>>,
    servers: Mutex<HashMap<ChannelId, Channel>>,
    shutdown: AtomicBool,
}

impl EventLoopGroup {
    /// Starts `config.workers()` worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Runtime`] if a worker runtime or thread can't be created.
    /// Workers started before the failure are stopped again.
    pub fn new(config: EventLoopConfig) -> Result<Self, TransportError> {
        let mut workers = Vec::with_capacity(config.workers());
        for id in 0..config.workers() {
            // dropping the workers collected so far terminates them
            workers.push(Worker::start(id)?);
        }

        info!(workers = workers.len(), close_timeout = ?config.close_timeout(), "event loop group started");
        let inner = GroupInner {
            config,
            workers,
            next_worker: AtomicUsize::new(0),
            channels: Mutex::new(HashMap::new()),
            servers: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.inner.config
    }

    pub fn workers(&self) -> usize {
        self.inner.workers.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Snapshot of the channels currently registered with the group
    pub fn channels(&self) -> Vec<Channel> {
        self.inner.channels.lock().values().cloned().collect()
    }

    /// Registers a connected socket: applies the socket options, wraps it into a new
    /// [`Channel`] driven by `pipeline`, and starts it on the next worker.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Shutdown`] once the group is shutting down
    /// - [`TransportError::Io`] if the socket options can't be applied
    pub fn register(
        &self,
        stream: TcpStream,
        pipeline: Pipeline,
        config: &ChannelConfig,
    ) -> Result<Channel, TransportError> {
        if self.is_shutdown() {
            return Err(TransportError::Shutdown);
        }

        config.apply(&stream)?;
        stream.set_nonblocking(true)?;
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();

        let (channel, outbound) = Channel::new(pipeline, local_addr, peer_addr);
        let id = channel.id();
        self.inner.channels.lock().insert(id, channel.clone());

        let guard = CloseGuard::new(channel.clone());
        let group = self.downgrade();
        let read_capacity = config.read_buffer_capacity();
        let task = {
            let channel = channel.clone();
            async move {
                drive(channel, guard, stream, outbound, read_capacity).await;
                if let Some(group) = group.upgrade() {
                    group.inner.channels.lock().remove(&id);
                }
            }
        };

        if let Err(e) = self.spawn(task) {
            // the rejected task was dropped with its guard, so the channel is settled already
            self.inner.channels.lock().remove(&id);
            return Err(e);
        }

        debug!(channel = %id, peer = ?peer_addr, "channel registered");
        Ok(channel)
    }

    /// Closes every server and channel, waits for each close within the configured
    /// bound, then stops and joins the workers.
    ///
    /// Must be awaited on a tokio runtime other than one of this group's workers.
    ///
    /// # Errors
    ///
    /// Returns the first [`TransportError::CloseTimeout`] if a close missed the bound;
    /// the remaining closes are still awaited and the workers are still stopped.
    pub async fn shutdown_gracefully(&self) -> Result<(), TransportError> {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            debug!("event loop group is already shutting down");
        }

        let bound = self.inner.config.close_timeout();
        let servers: Vec<Channel> = self.inner.servers.lock().drain().map(|(_, server)| server).collect();
        let channels: Vec<Channel> = self.inner.channels.lock().drain().map(|(_, channel)| channel).collect();
        info!(servers = servers.len(), channels = channels.len(), "shutdown event loop group");

        let closes = servers.iter().chain(channels.iter()).map(|channel| {
            let close = channel.close();
            async move { close.wait_timeout(bound).await }
        });

        let mut first_error = None;
        for result in join_all(closes).await {
            if let Err(e) = result {
                error!(cause = %e, "channel close exceeded its bound");
                first_error.get_or_insert(e);
            }
        }

        self.inner.terminate();
        let handles: Vec<JoinHandle<()>> = self.inner.workers.iter().filter_map(Worker::take_thread).collect();
        tokio::task::spawn_blocking(move || {
            for handle in handles {
                let name = handle.thread().name().map(ToOwned::to_owned);
                if handle.join().is_err() {
                    error!(worker = ?name, "event loop worker panicked");
                }
            }
        })
        .await
        .map_err(TransportError::runtime)?;

        info!("event loop group stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Runs `task` on the next worker, round-robin.
    pub(crate) fn spawn<F>(&self, task: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let index = self.inner.next_worker.fetch_add(1, Ordering::Relaxed) % self.inner.workers.len();
        self.inner.workers[index]
            .sender
            .send(WorkerMessage::Spawn(Box::pin(task)))
            .map_err(|_closed| TransportError::Shutdown)
    }

    pub(crate) fn downgrade(&self) -> WeakGroup {
        WeakGroup { inner: Arc::downgrade(&self.inner) }
    }

    pub(crate) fn track_server(&self, server: &Channel) {
        self.inner.servers.lock().insert(server.id(), server.clone());
    }

    pub(crate) fn untrack_server(&self, id: ChannelId) {
        self.inner.servers.lock().remove(&id);
    }
}

impl fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("workers", &self.inner.workers.len())
            .field("channels", &self.inner.channels.lock().len())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl GroupInner {
    fn terminate(&self) {
        for worker in &self.workers {
            let _ = worker.sender.send(WorkerMessage::Terminate);
        }
    }
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        // no join here: the last reference may be dropped on a worker thread
        self.terminate();
    }
}

struct Worker {
    sender: mpsc::UnboundedSender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn start(id: usize) -> Result<Self, TransportError> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name(format!("event-loop-worker-{id}"))
            .build()
            .map_err(TransportError::runtime)?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<WorkerMessage>();

        let thread = Builder::new()
            .name(format!("event-loop-worker-{id}"))
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(message) = receiver.recv().await {
                        match message {
                            WorkerMessage::Spawn(task) => {
                                tokio::spawn(task);
                            }
                            WorkerMessage::Terminate => break,
                        }
                    }
                });
                // dropping the runtime drops the tasks still alive on it
                drop(runtime);
                debug!(worker = id, "event loop worker stopped");
            })
            .map_err(TransportError::runtime)?;

        Ok(Self { sender, thread: Mutex::new(Some(thread)) })
    }

    fn take_thread(&self) -> Option<JoinHandle<()>> {
        let handle = self.thread.lock().take()?;
        if handle.thread().id() == std::thread::current().id() {
            warn!("event loop worker can't join itself");
            return None;
        }
        Some(handle)
    }
}
