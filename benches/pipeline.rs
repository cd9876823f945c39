//! Benchmark for the scan-side pipeline.
//!
//! Feeds raw HCI event frames through the decoder and the binary log writer,
//! the same path the scan loop takes for every frame.

use bluetrax::scanner::frame::FrameAssembler;
use bluetrax::{Decoded, EventDecoder, FlushPolicy, RawFrame, RecordWriter, Timestamp};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const TS: Timestamp = Timestamp {
    seconds: 1_700_000_000,
    microseconds: 0,
};

/// Inquiry Result with RSSI parameters carrying `count` responses.
fn rssi_params(count: u8) -> Vec<u8> {
    let mut params = vec![count];
    for i in 0..count {
        params.extend_from_slice(&[i, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
        params.extend_from_slice(&[0x01, 0x00]);
        params.extend_from_slice(&[0x0C, 0x02, 0x5A]);
        params.extend_from_slice(&[0x34, 0x12]);
        params.push((-40i8 - i as i8) as u8);
    }
    params
}

fn write_frame(decoder: &EventDecoder, frame: &RawFrame, writer: &mut RecordWriter<Vec<u8>>) {
    if let Decoded::Records(records) = decoder.decode(frame).unwrap() {
        for record in &records {
            writer.append(record).unwrap();
        }
    }
}

/// Benchmark decode + write for frames of increasing response count
fn bench_decode_and_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_and_write");
    let decoder = EventDecoder::default();

    // 18 responses is the most that fits in one event
    for count in [1u8, 8, 18] {
        let frame = RawFrame::event_packet(0x22, &rssi_params(count), TS).unwrap();
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &frame, |b, frame| {
            b.iter(|| {
                let mut writer = RecordWriter::new(Vec::with_capacity(1024), FlushPolicy::PerPeriod);
                write_frame(&decoder, black_box(frame), &mut writer);
                black_box(writer.into_inner().unwrap())
            })
        });
    }

    group.finish();
}

/// Benchmark reassembly of a frame delivered in small chunks
fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    let frame = RawFrame::event_packet(0x22, &rssi_params(18), TS).unwrap();
    let bytes = frame.as_bytes().to_vec();

    for chunk in [16usize, 64, bytes.len()] {
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut assembler = FrameAssembler::default();
                let mut frames = 0;
                for part in bytes.chunks(chunk) {
                    assembler.push(part, TS);
                    frames += assembler.next_frame().into_iter().count();
                }
                black_box(frames)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode_and_write, bench_reassembly);
criterion_main!(benches);
