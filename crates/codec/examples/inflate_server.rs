//! Listens on 127.0.0.1:8080 and logs the inflated size of every zlib stream a client sends.
//!
//! ```text
//! printf 'hello' | pigz -z | nc 127.0.0.1 8080
//! ```

use std::sync::Arc;

use micro_channel::codec::DecoderHandler;
use micro_channel::handler::{Handler, HandlerContext};
use micro_channel::pipeline::Pipeline;
use micro_channel::protocol::{BoxError, ChannelError, Message};
use micro_channel::transport::{ChannelConfig, EventLoopConfig, EventLoopGroup, ServerBootstrap};
use micro_codec::ZlibDecoder;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

struct InflatedLogger {
    decoder: Arc<ZlibDecoder>,
    received: usize,
}

impl Handler for InflatedLogger {
    fn on_read(&mut self, ctx: &mut HandlerContext<'_>, msg: Message) -> Result<Option<Message>, BoxError> {
        if let Some(buf) = msg.as_buffer() {
            self.received += buf.len();
            info!(handler = ctx.name(), len = buf.len(), total = self.received, "inflated chunk");
        }
        if self.decoder.is_closed() {
            info!(total = self.received, "compressed stream finished");
            ctx.write(&b"ok\n"[..]);
            ctx.close();
        }
        Ok(None)
    }

    fn on_error(&mut self, ctx: &mut HandlerContext<'_>, error: ChannelError) -> Option<ChannelError> {
        warn!(cause = %error, "closing channel");
        ctx.close();
        None
    }
}

fn inflate_pipeline() -> Result<Pipeline, BoxError> {
    let decoder = Arc::new(ZlibDecoder::new());
    let mut pipeline = Pipeline::new();
    pipeline.add_last("inflater", DecoderHandler::new(Arc::clone(&decoder)))?;
    pipeline.add_last("logger", InflatedLogger { decoder, received: 0 })?;
    Ok(pipeline)
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let group = match EventLoopGroup::new(EventLoopConfig::default()) {
        Ok(group) => group,
        Err(e) => {
            error!(cause = %e, "can't start event loop group");
            return;
        }
    };

    let server = match ServerBootstrap::new(group.clone())
        .child_config(ChannelConfig::new().with_tcp_nodelay(true))
        .child_pipeline(inflate_pipeline)
        .bind("127.0.0.1:8080")
    {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };
    info!(address = %server.local_addr(), "start listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(cause = %e, "can't listen for ctrl-c");
    }
    if let Err(e) = group.shutdown_gracefully().await {
        error!(cause = %e, "shutdown exceeded its bound");
    }
}
