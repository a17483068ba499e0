//! Mask codec and bring-up benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nic_fdir::sim::SimulatedDevice;
use nic_fdir::{
    encode_address_mask, reverse_port_mask, FdirConfig, FdirMode, FieldMaskSet, FlowDirector,
    MaskRegisters,
};

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_codec");

    let mut prefix = [0u8; 16];
    prefix[..8].fill(0xFF);
    group.bench_function("encode_address_mask", |b| {
        b.iter(|| encode_address_mask(black_box(&prefix)))
    });

    group.bench_function("reverse_port_mask", |b| {
        b.iter(|| reverse_port_mask(black_box(0xFFFF), black_box(0x00F0)))
    });

    let masks = FieldMaskSet::full();
    group.bench_function("stage_signature", |b| {
        b.iter(|| MaskRegisters::stage(FdirMode::Signature, black_box(&masks)))
    });

    group.finish();
}

fn bench_configure(c: &mut Criterion) {
    let mut cfg = FdirConfig::default();
    cfg.policy.mode = FdirMode::Perfect;
    cfg.masks = FieldMaskSet::full();

    c.bench_function("configure_simulated", |b| {
        b.iter(|| {
            let mut fdir = FlowDirector::new(SimulatedDevice::new());
            fdir.configure(black_box(&cfg))
        })
    });
}

criterion_group!(benches, bench_codec, bench_configure);
criterion_main!(benches);
