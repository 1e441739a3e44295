use std::io;
use std::net::TcpStream;
use std::num::NonZeroUsize;
use std::time::Duration;

use socket2::SockRef;

const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Settings of an [`EventLoopGroup`](super::EventLoopGroup).
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    workers: usize,
    close_timeout: Duration,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(DEFAULT_WORKERS);
        Self { workers, close_timeout: DEFAULT_CLOSE_TIMEOUT }
    }
}

impl EventLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of worker threads, at least one
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Upper bound for a single channel close during a graceful shutdown
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }
}

/// Per-connection socket options and read buffering.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    read_buffer_capacity: usize,
    receive_buffer_size: Option<usize>,
    send_buffer_size: Option<usize>,
    tcp_nodelay: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
            receive_buffer_size: None,
            send_buffer_size: None,
            tcp_nodelay: false,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity.max(1);
        self
    }

    /// `SO_RCVBUF`; the kernel default is kept when unset
    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = Some(size);
        self
    }

    /// `SO_SNDBUF`; the kernel default is kept when unset
    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn read_buffer_capacity(&self) -> usize {
        self.read_buffer_capacity
    }

    pub fn receive_buffer_size(&self) -> Option<usize> {
        self.receive_buffer_size
    }

    pub fn send_buffer_size(&self) -> Option<usize> {
        self.send_buffer_size
    }

    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    /// Applies the socket options to a freshly accepted or connected stream.
    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        let sock = SockRef::from(stream);
        if let Some(size) = self.receive_buffer_size {
            sock.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.send_buffer_size {
            sock.set_send_buffer_size(size)?;
        }
        stream.set_nodelay(self.tcp_nodelay)
    }
}
