use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use micro_channel::codec::DecoderHandler;
use micro_channel::handler::{Handler, HandlerContext, make_handler};
use micro_channel::pipeline::Pipeline;
use micro_channel::protocol::{BoxError, ChannelError, Message};
use micro_channel::transport::{EventLoopConfig, EventLoopGroup, ServerBootstrap};
use micro_codec::{CompressionError, ZlibDecoder};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Records every buffer and every failure that reaches it.
struct Sink {
    bytes: Vec<u8>,
    errors: Vec<String>,
}

impl Handler for Sink {
    fn on_read(&mut self, _ctx: &mut HandlerContext<'_>, msg: Message) -> Result<Option<Message>, BoxError> {
        if let Some(buf) = msg.as_buffer() {
            self.bytes.extend_from_slice(buf);
        }
        Ok(None)
    }

    fn on_error(&mut self, ctx: &mut HandlerContext<'_>, error: ChannelError) -> Option<ChannelError> {
        self.errors.push(error.to_string());
        ctx.close();
        None
    }
}

#[test]
fn test_corrupt_stream_becomes_channel_failure() {
    let mut compressed = zlib(b"hello pipeline");
    let last = compressed.len() - 1;
    compressed[last] ^= 0xff;

    let decoder = Arc::new(ZlibDecoder::new());
    let mut pipeline = Pipeline::new();
    pipeline.add_last("inflater", DecoderHandler::new(Arc::clone(&decoder))).unwrap();
    pipeline.add_last("sink", Sink { bytes: Vec::new(), errors: Vec::new() }).unwrap();

    let dispatch = pipeline.fire_read(BytesMut::from(&compressed[..]));

    assert!(dispatch.errors().is_empty());
    assert!(dispatch.close_requested());
    assert!(decoder.has_failed());

    // a failed decoder drops whatever bytes still arrive
    let mut dispatch = pipeline.fire_read(BytesMut::from(&zlib(b"more")[..]));
    assert!(dispatch.take_inbound().is_empty());
    assert!(dispatch.errors().is_empty());
}

#[test]
fn test_corrupt_block_header_becomes_channel_failure() {
    let mut compressed = zlib(b"hello pipeline, hello pipeline, hello pipeline");
    // reserved block type in the first deflate block
    compressed[2] |= 0b110;

    let decoder = Arc::new(ZlibDecoder::new());
    let mut pipeline = Pipeline::new();
    pipeline.add_last("inflater", DecoderHandler::new(Arc::clone(&decoder))).unwrap();

    let dispatch = pipeline.fire_read(BytesMut::from(&compressed[..]));

    assert!(dispatch.inbound().is_empty());
    match &dispatch.errors()[0] {
        ChannelError::Handler { source, .. } => {
            let error = source.downcast_ref::<CompressionError>().unwrap();
            assert!(matches!(error, CompressionError::Decompression { .. }));
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(decoder.has_failed());
}

#[test]
fn test_unhandled_decompression_failure_reported() {
    let decoder = Arc::new(ZlibDecoder::new());
    let mut pipeline = Pipeline::new();
    pipeline.add_last("inflater", DecoderHandler::new(Arc::clone(&decoder))).unwrap();

    let dispatch = pipeline.fire_read(BytesMut::from(&b"definitely not zlib"[..]));

    let error = &dispatch.errors()[0];
    assert_eq!(error.handler_name(), Some("inflater"));
    match error {
        ChannelError::Handler { source, .. } => assert!(source.downcast_ref::<CompressionError>().is_some()),
        other => panic!("unexpected error {other}"),
    }

    pipeline.teardown();
    assert_eq!(decoder.total_in(), 0);
}

#[test]
fn test_teardown_releases_engine() {
    let decoder = Arc::new(ZlibDecoder::new());
    let mut pipeline = Pipeline::new();
    pipeline.add_last("inflater", DecoderHandler::new(Arc::clone(&decoder))).unwrap();

    let compressed = zlib(b"half");
    let dispatch = pipeline.fire_read(BytesMut::from(&compressed[..2]));
    assert!(dispatch.inbound().is_empty());
    assert_eq!(decoder.total_in(), 2);

    pipeline.teardown();
    assert_eq!(decoder.total_in(), 0);
    assert!(!decoder.is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_inflate_over_socket() {
    let data: Vec<u8> = b"0123456789abcdef".iter().copied().cycle().take(256 * 1024).collect();
    let compressed = zlib(&data);

    let group = EventLoopGroup::new(EventLoopConfig::new().with_workers(2)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (decoders_tx, mut decoders_rx) = mpsc::unbounded_channel::<Arc<ZlibDecoder>>();

    let server = ServerBootstrap::new(group.clone())
        .child_pipeline(move || -> Result<Pipeline, BoxError> {
            let decoder = Arc::new(ZlibDecoder::new());
            let _ = decoders_tx.send(Arc::clone(&decoder));

            let tx = tx.clone();
            let mut pipeline = Pipeline::new();
            pipeline.add_last("inflater", DecoderHandler::new(decoder))?;
            pipeline.add_last(
                "collect",
                make_handler(move |_ctx, msg| {
                    if let Some(buf) = msg.into_buffer() {
                        let _ = tx.send(buf.to_vec());
                    }
                    Ok(None)
                }),
            )?;
            Ok(pipeline)
        })
        .bind("127.0.0.1:0")
        .unwrap();

    let mut client = tokio::net::TcpStream::connect(server.local_addr()).await.unwrap();
    for chunk in compressed.chunks(997) {
        client.write_all(chunk).await.unwrap();
    }
    client.flush().await.unwrap();

    let mut inflated = Vec::with_capacity(data.len());
    while inflated.len() < data.len() {
        let chunk = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        inflated.extend_from_slice(&chunk);
    }
    assert_eq!(inflated, data);

    let decoder = decoders_rx.recv().await.unwrap();
    assert!(decoder.is_closed());

    drop(client);
    group.shutdown_gracefully().await.unwrap();
}
