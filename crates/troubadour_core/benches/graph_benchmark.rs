//! Mixer graph benchmarks
//!
//! Measures the processing tick's hot path: N channels summed onto a
//! handful of buses at typical block sizes.

use std::collections::{BTreeSet, HashMap};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use troubadour_core::{BusId, ChannelId, EffectTable, MixerGraph};

fn build_graph(channels: usize, frames: usize) -> (MixerGraph, EffectTable, Vec<ChannelId>) {
    let mut graph = MixerGraph::new(48_000, frames, 12.0);
    let mut effects = EffectTable::new(48_000.0);

    let main = BusId::new("main").unwrap();
    let monitor = BusId::new("monitor").unwrap();
    graph.add_bus(main.clone(), "Main".into()).unwrap();
    graph.add_bus(monitor.clone(), "Monitor".into()).unwrap();

    let ids: Vec<ChannelId> = (0..channels)
        .map(|i| {
            let id = ChannelId::new(format!("ch{i}")).unwrap();
            graph.add_channel(id.clone(), format!("Channel {i}")).unwrap();
            graph
                .set_channel_buses(&id, BTreeSet::from([main.clone(), monitor.clone()]))
                .unwrap();
            id
        })
        .collect();

    effects.sync(&graph);
    (graph, effects, ids)
}

fn benchmark_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_process");

    for &(channels, frames) in &[(4usize, 512usize), (16, 512), (16, 128), (64, 512)] {
        let (mut graph, mut effects, ids) = build_graph(channels, frames);
        let blocks: Vec<Vec<f32>> = (0..channels)
            .map(|n| (0..frames * 2).map(|i| ((i + n) as f32 * 0.001).sin()).collect())
            .collect();
        let inputs: HashMap<ChannelId, &[f32]> = ids
            .iter()
            .zip(blocks.iter())
            .map(|(id, block)| (id.clone(), block.as_slice()))
            .collect();

        group.throughput(Throughput::Elements((channels * frames) as u64));
        group.bench_function(format!("{channels}ch_{frames}f"), |b| {
            b.iter(|| {
                graph.process(black_box(&inputs), &mut effects);
            })
        });
    }

    group.finish();
}

fn benchmark_snapshot(c: &mut Criterion) {
    let (graph, _effects, _ids) = build_graph(32, 512);

    c.bench_function("snapshot_32ch", |b| {
        b.iter(|| {
            black_box(graph.snapshot());
        })
    });
}

criterion_group!(benches, benchmark_process, benchmark_snapshot);
criterion_main!(benches);
