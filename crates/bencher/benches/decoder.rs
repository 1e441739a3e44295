use std::hint::black_box;
use std::sync::Arc;

use bencher::{TestCase, TestPayload};
use bytes::BytesMut;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use micro_channel::codec::{DecoderHandler, MessageDecoder};
use micro_channel::pipeline::Pipeline;
use micro_channel::protocol::Message;
use micro_codec::ZlibDecoder;

fn create_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::small("small_text", TestPayload::repeated(b"hello micro-channel ", 256)),
        TestCase::normal("repeated_64k", TestPayload::repeated(b"0123456789abcdef", 64 * 1024)),
        TestCase::normal("noise_64k", TestPayload::noise(64 * 1024)),
        TestCase::large("repeated_4m", TestPayload::repeated(b"abcd", 4 * 1024 * 1024)),
    ]
}

fn benchmark_zlib_decoder(criterion: &mut Criterion) {
    let test_cases = create_test_cases();
    let mut group = criterion.benchmark_group("zlib_decoder");

    for case in test_cases {
        group.throughput(Throughput::Bytes(case.payload().plain().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(case.name()), &case, |b, case| {
            b.iter_batched(
                || (ZlibDecoder::new(), BytesMut::from(case.payload().compressed())),
                |(decoder, compressed)| {
                    let inflated = decoder.decode(Message::Buffer(compressed)).expect("input should be a valid zlib stream");
                    black_box(inflated);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn benchmark_chunked_pipeline(criterion: &mut Criterion) {
    let payload = TestPayload::repeated(b"0123456789abcdef", 256 * 1024);
    let mut group = criterion.benchmark_group("inflate_pipeline");
    group.throughput(Throughput::Bytes(payload.plain().len() as u64));

    for chunk_size in [512_usize, 8 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &chunk_size| {
            b.iter_batched_ref(
                || {
                    let mut pipeline = Pipeline::new();
                    let decoder = Arc::new(ZlibDecoder::new());
                    pipeline.add_last("inflater", DecoderHandler::new(decoder)).expect("empty pipeline");
                    pipeline
                },
                |pipeline| {
                    for chunk in payload.compressed().chunks(chunk_size) {
                        black_box(pipeline.fire_read(BytesMut::from(chunk)));
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(decoder, benchmark_zlib_decoder, benchmark_chunked_pipeline);
criterion_main!(decoder);
