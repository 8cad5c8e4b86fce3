use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use turnstream::{
    ArgumentAccumulator, ConversationState, FrameDecoder, FrameOutcome, TurnReducer, encode_event,
    parse_frame,
};

// A turn of `deltas` text deltas, encoded as wire frames
fn create_turn(deltas: usize) -> String {
    let mut wire = encode_event("response.created", &json!({"id": "resp_bench"}));
    for i in 0..deltas {
        wire.push_str(&encode_event(
            "response.output_text.delta",
            &json!({"item_id": "msg_1", "delta": format!("token{} ", i)}),
        ));
    }
    wire.push_str(&encode_event("response.completed", &json!({})));
    wire.push_str(turnstream::DONE_FRAME);
    wire
}

// Arguments of roughly `size` bytes, split into `pieces` fragments
fn create_argument_fragments(size: usize, pieces: usize) -> (String, Vec<String>) {
    let notes: Vec<String> = (0..size / 24).map(|i| format!("note number {:>6}", i)).collect();
    let full = json!({"city": "New York", "days": [1, 2, 3], "notes": notes}).to_string();
    let step = (full.len() / pieces).max(1);
    let fragments = full
        .as_bytes()
        .chunks(step)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    (full, fragments)
}

// Benchmark: frame decoding with varying chunk sizes
fn bench_decode_by_chunk_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_by_chunk_size");
    let wire = create_turn(500);
    group.throughput(Throughput::Bytes(wire.len() as u64));

    for chunk in [1, 16, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &wire, |b, wire| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                let mut events = 0;
                for piece in wire.as_bytes().chunks(*chunk) {
                    for frame in decoder.push(black_box(piece)) {
                        if let FrameOutcome::Event(_) = parse_frame(&frame) {
                            events += 1;
                        }
                    }
                }
                events
            });
        });
    }

    group.finish();
}

// Benchmark: argument accumulation cost as arguments grow
fn bench_argument_accumulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("argument_accumulation");

    for size in [256, 4096, 32768].iter() {
        let (full, fragments) = create_argument_fragments(*size, 64);
        group.throughput(Throughput::Bytes(full.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &fragments, |b, fragments| {
            b.iter(|| {
                let mut acc = ArgumentAccumulator::new();
                for fragment in fragments {
                    black_box(acc.push("fc_1", fragment));
                }
                acc.finalize("fc_1", &full)
            });
        });
    }

    group.finish();
}

// Benchmark: full reduction of a decoded turn
fn bench_reduce_turn(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_turn");

    for deltas in [10, 100, 1000].iter() {
        let mut decoder = FrameDecoder::new();
        let events: Vec<_> = decoder
            .push(create_turn(*deltas).as_bytes())
            .iter()
            .filter_map(|frame| match parse_frame(frame) {
                FrameOutcome::Event(event) => Some(event),
                _ => None,
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(deltas), &events, |b, events| {
            b.iter(|| {
                let mut state = ConversationState::new();
                let mut reducer = TurnReducer::new();
                for event in events.iter().cloned() {
                    let _ = reducer.reduce(&mut state, event);
                }
                state
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_by_chunk_size,
    bench_argument_accumulation,
    bench_reduce_turn,
);
criterion_main!(benches);
