//! Build a two-stage divider, lay it out and print what came out.
//!
//! Run with `RUST_LOG=sheetgen=debug` to see the pipeline trace.

use sheetgen::erc::summarize;
use sheetgen::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), SheetGenError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let lib = BuiltinLibrary;
    let mut b = CircuitBuilder::new("voltage_divider", &lib);
    let vin = b.net("VIN");
    let gnd = b.net("GND");

    let j1 = b.add_part("Connector", "Conn_01x04")?;
    b.connect(vin, j1, "1")?;
    b.connect(gnd, j1, "4")?;

    for (pin, out) in [("2", "HALF"), ("3", "QUARTER")] {
        let vout = b.net(out);
        b.connect(vout, j1, pin)?;
        b.subcircuit("divider", &[("vin", vin), ("vout", vout), ("gnd", gnd)], |b| {
            let r1 = b.add_part("Device", "R")?;
            let r2 = b.add_part("Device", "R")?;
            b.set_value(r1, "10k")?;
            b.set_value(r2, if out == "HALF" { "10k" } else { "3k3" })?;
            b.chain([vin.into(), r1.into(), vout.into(), r2.into(), gnd.into()])
        })?;
    }
    let circuit = b.finish()?;

    let generation = SchematicGenerator::default().generate(&circuit)?;
    for sheet in &generation.tree.sheets {
        println!(
            "{} ({:?}): {} parts, {} wires, {} junctions, {} labels",
            sheet.path,
            sheet.paper,
            sheet.parts.len(),
            sheet.wires.len(),
            sheet.junctions.len(),
            sheet.labels.len()
        );
        for part in &sheet.parts {
            println!("  {} at {}", part.reference, part.position);
        }
    }

    let stats = generation.report.stats();
    println!();
    println!(
        "Layout: {} unrouted, {} stubs, {} label ties, {} label overlaps",
        stats.unrouted_pairs, stats.stubs, stats.label_ties, stats.label_overlaps
    );

    let diagnostics = sheetgen::check(&circuit);
    let summary = summarize(&diagnostics);
    println!("ERC: {} errors, {} warnings", summary.errors, summary.warnings);
    for d in &diagnostics {
        println!("  [{:?}] {}: {}", d.severity, d.rule.name(), d.message);
    }

    if std::env::args().any(|a| a == "--json") {
        println!("{}", generation.tree.to_json()?);
    }
    Ok(())
}
