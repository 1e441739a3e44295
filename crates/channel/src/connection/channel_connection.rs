use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{Channel, CloseGuard, CloseOutcome};
use crate::pipeline::{Dispatch, Pipeline};
use crate::protocol::{ChannelError, Message};

/// Drives one socket through its channel's pipeline.
///
/// `ChannelConnection` owns both socket halves:
/// - inbound bytes are read in chunks and fired through the pipeline
/// - outbound buffers that leave the pipeline head are written and flushed
/// - messages queued with [`Channel::write`] enter the outbound chain at its tail
///
/// The halves are dropped as soon as [`process`](ChannelConnection::process) returns,
/// which releases the socket before the channel's close signal is settled.
pub(crate) struct ChannelConnection<R, W> {
    framed_read: FramedRead<R, BytesCodec>,
    framed_write: FramedWrite<W, BytesCodec>,
}

impl<R, W> ChannelConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, read_capacity: usize) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, BytesCodec::new(), read_capacity),
            framed_write: FramedWrite::new(writer, BytesCodec::new()),
        }
    }

    pub async fn process(
        mut self,
        channel: &Channel,
        outbound: &mut mpsc::UnboundedReceiver<Message>,
    ) -> Result<(), ChannelError> {
        let dispatch = channel.with_pipeline(Pipeline::fire_active);
        if self.complete(channel, dispatch).await? {
            return Ok(());
        }

        let close_token = channel.close_token().clone();
        loop {
            let dispatch = select! {
                // a requested close wins over pending traffic
                biased;

                () = close_token.cancelled() => {
                    debug!(channel = %channel.id(), "stop reading, channel is closing");
                    return Ok(());
                }

                Some(msg) = outbound.recv() => {
                    channel.with_pipeline(|pipeline| pipeline.fire_write(msg))
                }

                frame = self.framed_read.next() => match frame {
                    Some(Ok(bytes)) => {
                        trace!(channel = %channel.id(), len = bytes.len(), "read bytes");
                        channel.with_pipeline(|pipeline| pipeline.fire_read(bytes))
                    }
                    Some(Err(e)) => {
                        error!(channel = %channel.id(), cause = %e, "can't read from socket");
                        let mut dispatch = channel.with_pipeline(|pipeline| pipeline.fire_error(ChannelError::io(e)));
                        return match dispatch.take_errors().into_iter().next() {
                            Some(error) => Err(error),
                            None => Ok(()),
                        };
                    }
                    None => {
                        info!(channel = %channel.id(), "peer closed the connection");
                        return Ok(());
                    }
                },
            };

            if self.complete(channel, dispatch).await? {
                debug!(channel = %channel.id(), "a handler asked to close the channel");
                return Ok(());
            }
        }
    }

    /// Writes what left the pipeline head and reports whether a close was requested.
    ///
    /// A close requested while the socket is not accepting more bytes abandons the
    /// pending writes.
    async fn complete(&mut self, channel: &Channel, mut dispatch: Dispatch) -> Result<bool, ChannelError> {
        for msg in dispatch.take_inbound() {
            debug!(channel = %channel.id(), message = ?msg, "discard message that reached the pipeline tail");
        }

        let outbound = dispatch.take_outbound();
        if !outbound.is_empty() {
            let close_token = channel.close_token().clone();
            select! {
                biased;

                written = self.write_out(channel, outbound) => written?,

                () = close_token.cancelled() => {
                    debug!(channel = %channel.id(), "abandon pending writes, channel is closing");
                    return Ok(true);
                }
            }
        }

        Ok(dispatch.close_requested())
    }

    async fn write_out(&mut self, channel: &Channel, outbound: Vec<Message>) -> Result<(), ChannelError> {
        for msg in outbound {
            match msg {
                Message::Buffer(buf) => self.framed_write.feed(buf.freeze()).await.map_err(ChannelError::io)?,
                Message::Object(_) => {
                    warn!(channel = %channel.id(), "drop outbound object that no handler encoded into bytes");
                }
            }
        }
        // feed only buffers, one flush per dispatch
        SinkExt::<Bytes>::flush(&mut self.framed_write).await.map_err(ChannelError::io)
    }
}

/// Runs a registered channel until it closes, then releases everything it owns.
///
/// Order on the way out: socket halves dropped, `inactive` fired, pipeline torn down,
/// state CLOSED, close signal settled.
pub(crate) async fn drive(
    channel: Channel,
    guard: CloseGuard,
    stream: std::net::TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    read_capacity: usize,
) {
    let outcome = match TcpStream::from_std(stream) {
        Ok(_) if !channel.mark_connected() => {
            debug!(channel = %channel.id(), "closed before the socket was connected");
            CloseOutcome::Clean
        }
        Ok(stream) => {
            let (reader, writer) = stream.into_split();
            let connection = ChannelConnection::new(reader, writer, read_capacity);
            match connection.process(&channel, &mut outbound).await {
                Ok(()) => CloseOutcome::Clean,
                Err(e) => {
                    error!(channel = %channel.id(), cause = %e, "channel failed, connection shutdown");
                    CloseOutcome::failed(e)
                }
            }
        }
        Err(e) => {
            error!(channel = %channel.id(), cause = %e, "can't register socket with the event loop");
            CloseOutcome::failed(ChannelError::io(e))
        }
    };

    channel.begin_close();
    outbound.close();

    let dispatch = channel.with_pipeline(Pipeline::fire_inactive);
    if !dispatch.outbound().is_empty() {
        debug!(channel = %channel.id(), count = dispatch.outbound().len(), "discard writes issued after the socket was released");
    }

    guard.finish(outcome);
    info!(channel = %channel.id(), "finished process, connection shutdown");
}
