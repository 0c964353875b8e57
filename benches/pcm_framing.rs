use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use voicecall::audio::pcm::{decode_pcm, encode_blob};
use voicecall::transport::protocol::{ClientMessage, parse_server_message};

/// A sine sweep of `len` samples in [-0.8, 0.8].
fn sweep(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| ((i as f32) * 0.013).sin() * 0.8)
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    // 256 samples is the default capture frame; 4096 is the largest buffer size
    for size in [256usize, 1024, 4096] {
        let samples = sweep(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &samples, |b, samples| {
            b.iter(|| encode_blob(black_box(samples)));
        });
    }
    group.finish();
}

fn bench_outbound_message(c: &mut Criterion) {
    let blob = encode_blob(&sweep(256));
    c.bench_function("realtime_input_json", |b| {
        b.iter(|| ClientMessage::audio(black_box(blob.clone())).to_json());
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_chunk");
    // Server chunks are typically 20-100ms at 24kHz
    for size in [480usize, 2400, 9600] {
        let data = encode_blob(&sweep(size)).data;
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| decode_pcm(black_box(data)));
        });
    }
    group.finish();
}

fn bench_parse_server_message(c: &mut Criterion) {
    let data = encode_blob(&sweep(2400)).data;
    let message = format!(
        r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
        data
    );
    c.bench_function("parse_server_audio", |b| {
        b.iter(|| parse_server_message(black_box(&message)));
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_outbound_message,
    bench_decode,
    bench_parse_server_message
);
criterion_main!(benches);
