//! Property-style tests over the engine's quantified invariants, using
//! a small deterministic generator instead of an external fuzzer.

use std::collections::{BTreeSet, HashMap};

use troubadour_core::{
    sample_ring, AudioEngine, BusId, ChannelId, Db, EffectTable, EngineConfig, MixerGraph,
    DB_MAX, DB_MIN,
};
use troubadour_dsp::LinearResampler;

const FRAMES: usize = 128;

/// Tiny deterministic PRNG (xorshift) so failures reproduce.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    fn f32_in(&mut self, lo: f32, hi: f32) -> f32 {
        let unit = (self.next() % 10_000) as f32 / 10_000.0;
        lo + unit * (hi - lo)
    }
}

fn ch(i: u64) -> ChannelId {
    ChannelId::new(format!("ch{i}")).unwrap()
}

fn bus(i: u64) -> BusId {
    BusId::new(format!("bus{i}")).unwrap()
}

/// Property 1: after any command sequence, every bus id in any
/// channel's membership exists in the bus table.
#[test]
fn property_membership_always_references_existing_buses() {
    let mut rng = Rng(0x5eed);
    let mut graph = MixerGraph::new(48_000, FRAMES, 12.0);

    for _ in 0..2_000 {
        match rng.below(6) {
            0 => {
                let _ = graph.add_channel(ch(rng.below(8)), "C".into());
            }
            1 => {
                let _ = graph.remove_channel(&ch(rng.below(8)));
            }
            2 => {
                let _ = graph.add_bus(bus(rng.below(5)), "B".into());
            }
            3 => {
                let _ = graph.remove_bus(&bus(rng.below(5)));
            }
            4 => {
                let mut set = BTreeSet::new();
                for _ in 0..rng.below(4) {
                    set.insert(bus(rng.below(5)));
                }
                let _ = graph.set_channel_buses(&ch(rng.below(8)), set);
            }
            _ => {
                let _ = graph.set_channel_gain(
                    &ch(rng.below(8)),
                    Db::new(rng.f32_in(DB_MIN, DB_MAX)).unwrap(),
                );
            }
        }

        let bus_ids: BTreeSet<_> = graph.buses().map(|b| b.id.clone()).collect();
        for channel in graph.channels() {
            for member in &channel.buses {
                assert!(
                    bus_ids.contains(member),
                    "channel '{}' references missing bus '{}'",
                    channel.id,
                    member
                );
            }
        }
    }
}

/// Property 2: constructing a decibel value from finite d yields
/// clamp(d, -60, 18); non-finite input is rejected.
#[test]
fn property_db_construction_clamps() {
    let mut rng = Rng(42);
    for _ in 0..10_000 {
        let raw = rng.f32_in(-200.0, 200.0);
        let value = Db::new(raw).unwrap();
        assert_eq!(value.get(), raw.clamp(DB_MIN, DB_MAX));
    }
    for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
        assert!(Db::new(bad).is_err());
    }
}

/// Properties 3 and 4: muted channels and solo-excluded channels
/// contribute exactly 0.0, sample by sample.
#[test]
fn property_muted_and_solo_excluded_contribute_zero() {
    let mut rng = Rng(7);

    for round in 0..50 {
        let mut graph = MixerGraph::new(48_000, FRAMES, 12.0);
        let mut fx = EffectTable::new(48_000.0);
        graph.add_bus(bus(0), "B".into()).unwrap();

        // Channel 0 is the "quiet" one under test; channel 1 is a
        // reference signal on the same bus
        for i in 0..2 {
            graph.add_channel(ch(i), "C".into()).unwrap();
            graph
                .set_channel_buses(&ch(i), BTreeSet::from([bus(0)]))
                .unwrap();
        }
        graph
            .set_channel_gain(&ch(0), Db::new(rng.f32_in(DB_MIN, DB_MAX)).unwrap())
            .unwrap();

        if round % 2 == 0 {
            // Mute excludes
            graph.toggle_mute(&ch(0)).unwrap();
        } else {
            // Solo on the other channel excludes this one
            graph.toggle_solo(&ch(1)).unwrap();
        }
        fx.sync(&graph);

        let noisy: Vec<f32> = (0..FRAMES * 2).map(|_| rng.f32_in(-1.0, 1.0)).collect();
        let reference = vec![0.25f32; FRAMES * 2];
        let inputs = HashMap::from([
            (ch(0), noisy.as_slice()),
            (ch(1), reference.as_slice()),
        ]);
        graph.process(&inputs, &mut fx);

        // The excluded channel must not perturb the reference at all
        for &sample in graph.bus_output(&bus(0)).unwrap() {
            assert_eq!(sample, 0.25);
        }
    }
}

/// Property 5: with |x| <= 1 and channel gain g <= 0 dB into one bus at
/// unity, every output sample obeys |y| <= 10^(g/20).
#[test]
fn property_gain_bounds_output() {
    let mut rng = Rng(1234);

    for _ in 0..50 {
        let gain_db = rng.f32_in(DB_MIN, 0.0);
        let bound = Db::new(gain_db).unwrap().to_linear();

        let mut graph = MixerGraph::new(48_000, FRAMES, 12.0);
        let mut fx = EffectTable::new(48_000.0);
        graph.add_bus(bus(0), "B".into()).unwrap();
        graph.add_channel(ch(0), "C".into()).unwrap();
        graph
            .set_channel_buses(&ch(0), BTreeSet::from([bus(0)]))
            .unwrap();
        graph
            .set_channel_gain(&ch(0), Db::new(gain_db).unwrap())
            .unwrap();
        fx.sync(&graph);

        let input: Vec<f32> = (0..FRAMES * 2).map(|_| rng.f32_in(-1.0, 1.0)).collect();
        let inputs = HashMap::from([(ch(0), input.as_slice())]);
        graph.process(&inputs, &mut fx);

        for &sample in graph.bus_output(&bus(0)).unwrap() {
            assert!(
                sample.abs() <= bound + 1e-5,
                "|{sample}| > 10^({gain_db}/20) = {bound}"
            );
        }
    }
}

/// Property 6: ring round-trip - with total writes within capacity, the
/// concatenated reads equal the concatenated writes.
#[test]
fn property_ring_roundtrip_preserves_order() {
    let mut rng = Rng(99);

    for _ in 0..200 {
        let (mut producer, mut consumer) = sample_ring(256);
        let mut written = Vec::new();
        let mut budget = 256usize;

        while budget > 0 {
            let n = (rng.below(40) as usize + 1).min(budget);
            let chunk: Vec<f32> = (0..n).map(|_| rng.f32_in(-1.0, 1.0)).collect();
            assert_eq!(producer.write(&chunk), n, "write within capacity is full");
            written.extend_from_slice(&chunk);
            budget -= n;
        }

        let mut read_back = Vec::new();
        let mut out = vec![0.0f32; 33];
        loop {
            let n = consumer.read(&mut out);
            if n == 0 {
                break;
            }
            read_back.extend_from_slice(&out[..n]);
        }

        assert_eq!(read_back, written);
    }
}

/// Property 7: snapshot versions are monotone - strictly increasing
/// across mutations, stable without them.
#[test]
fn property_snapshot_version_monotone() {
    let engine = AudioEngine::start(EngineConfig::default()).unwrap();
    let mut rng = Rng(3);
    let mut last = engine.snapshot().unwrap().version;

    for _ in 0..100 {
        let mutated = match rng.below(3) {
            0 => engine.add_channel(ch(rng.below(6)), "C".into()).is_ok(),
            1 => engine.remove_channel(ch(rng.below(6))).is_ok(),
            _ => engine.toggle_mute(ChannelId::master()).is_ok(),
        };

        let version = engine.snapshot().unwrap().version;
        if mutated {
            assert!(version > last, "mutation did not advance {last}");
        } else {
            assert_eq!(version, last, "failed command advanced the version");
        }
        last = version;
    }
}

/// Property 8: resampler output length stays within 1 frame of
/// round(N * dst / src), for every rate pair and varying block sizes.
#[test]
fn property_resampler_length() {
    let rates = [44_100u32, 48_000, 88_200, 96_000, 192_000];
    let mut rng = Rng(8);

    for &src in &rates {
        for &dst in &rates {
            let mut resampler = LinearResampler::new(src, dst);
            let mut out = Vec::new();
            for _ in 0..25 {
                let frames = (rng.below(1000) + 32) as usize;
                let input = vec![0.0f32; frames * 2];
                out.clear();
                resampler.process(&input, &mut out);

                let got = (out.len() / 2) as i64;
                let expected = (frames as f64 * dst as f64 / src as f64).round() as i64;
                assert!(
                    (got - expected).abs() <= 1,
                    "{src}->{dst}, {frames} frames: got {got}, expected ~{expected}"
                );
            }
        }
    }
}
