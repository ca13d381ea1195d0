use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sheetgen::prelude::*;

fn divider_bank(count: usize) -> Circuit {
    let lib = BuiltinLibrary;
    let mut b = CircuitBuilder::new("bank", &lib);
    let vin = b.net("VIN");
    let gnd = b.net("GND");
    for i in 0..count {
        let vout = b.net(&format!("OUT{}", i));
        b.subcircuit("divider", &[("vin", vin), ("vout", vout), ("gnd", gnd)], |b| {
            let r1 = b.add_part("Device", "R")?;
            let r2 = b.add_part("Device", "R")?;
            b.chain([vin.into(), r1.into(), vout.into(), r2.into(), gnd.into()])
        })
        .expect("divider");
    }
    b.finish().expect("circuit")
}

fn ladder(count: usize) -> Circuit {
    let lib = BuiltinLibrary;
    let mut b = CircuitBuilder::new("ladder", &lib);
    let gnd = b.net("GND");
    let mut prev = b.net("IN");
    for _ in 0..count {
        let next = b.anonymous_net();
        let r = b.add_part("Device", "R").expect("R");
        let c = b.add_part("Device", "C").expect("C");
        b.chain([prev.into(), r.into(), next.into(), c.into(), gnd.into()])
            .expect("rung");
        prev = next;
    }
    b.finish().expect("circuit")
}

fn bench_generate_hierarchy(c: &mut Criterion) {
    let circuit = divider_bank(8);
    let generator = SchematicGenerator::default();
    c.bench_function("generate_divider_bank", |b| {
        b.iter(|| generator.generate(black_box(&circuit)))
    });
}

fn bench_generate_flat(c: &mut Criterion) {
    let circuit = ladder(12);
    let generator = SchematicGenerator::default();
    c.bench_function("generate_rc_ladder", |b| {
        b.iter(|| generator.generate(black_box(&circuit)))
    });
}

fn bench_erc(c: &mut Criterion) {
    let circuit = ladder(40);
    c.bench_function("erc_rc_ladder", |b| b.iter(|| sheetgen::check(black_box(&circuit))));
}

criterion_group!(benches, bench_generate_hierarchy, bench_generate_flat, bench_erc);
criterion_main!(benches);
