//! sheetgen - schematic synthesis from an abstract netlist
//!
//! This library turns a circuit description (parts, pins, nets and
//! subcircuit calls) into a laid-out, multi-sheet schematic: placed
//! symbols, orthogonal wires, junctions, labels and hierarchical ports.
//! It also runs a structural electrical rules check over the netlist.
//!
//! # Quick Start
//!
//! ```no_run
//! use sheetgen::prelude::*;
//!
//! let lib = BuiltinLibrary;
//! let mut b = CircuitBuilder::new("divider", &lib);
//! let vin = b.net("VIN");
//! let vout = b.net("VOUT");
//! let gnd = b.net("GND");
//! let r1 = b.add_part("Device", "R")?;
//! let r2 = b.add_part("Device", "R")?;
//! b.chain([vin.into(), r1.into(), vout.into(), r2.into(), gnd.into()])?;
//! let circuit = b.finish()?;
//!
//! let tree = sheetgen::generate(&circuit)?;
//! println!("{} wires", tree.wire_count());
//!
//! for d in sheetgen::check(&circuit) {
//!     println!("{:?}: {}", d.severity, d.message);
//! }
//! # Ok::<(), SheetGenError>(())
//! ```
//!
//! # Features
//!
//! - **Hierarchy**: one sheet per subcircuit call, ports and sheet pins
//!   derived from the nets that cross sheet boundaries
//! - **Placement**: grid-aligned, non-overlapping, connectors on the border
//! - **Routing**: A* Manhattan router with an auto-verifier that guarantees
//!   every net ends up connected
//! - **ERC**: unconnected pins, output conflicts, undriven inputs, power
//!   shorts and floating nets
//! - **parallel** (cargo feature): lay sheets out on the rayon pool

pub mod circuit;
pub mod core;
pub mod erc;
pub mod geometry;
pub mod hierarchy;
pub mod labels;
pub mod library;
pub mod placement;
pub mod routing;
pub mod sheet;
pub mod verify;

// Re-export main types
pub use circuit::{ChainItem, Circuit, CircuitBuilder, CircuitGraph, NetId, PartId, PinRef};
pub use crate::core::{
    Degradation, GenerationOptions, Generation, LayoutReport, LayoutStats, SchematicGenerator,
    SheetGenError,
};
pub use erc::{Diagnostic, ErcRule, ErcSummary, Severity};
pub use geometry::{Coord, Point, Rect, Rotation};
pub use library::{BuiltinLibrary, ElectricalType, LookupError, MapLibrary, SymbolDef, SymbolLibrary};
pub use sheet::{Sheet, SheetId, SheetTree};

/// Lay out a circuit with default options (convenience wrapper).
pub fn generate(circuit: &Circuit) -> Result<SheetTree, SheetGenError> {
    SchematicGenerator::default()
        .generate(circuit)
        .map(|g| g.tree)
}

/// Run the electrical rules check (convenience wrapper).
pub fn check(circuit: &Circuit) -> Vec<Diagnostic> {
    erc::check(circuit)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        BuiltinLibrary, ChainItem, Circuit, CircuitBuilder, Diagnostic, GenerationOptions,
        Generation, LayoutReport, Point, SchematicGenerator, Severity, SheetGenError, SheetTree,
        SymbolLibrary,
    };
}
