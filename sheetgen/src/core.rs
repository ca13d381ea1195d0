//! Generation pipeline shared by every caller.
//! Error type, options, and the per-sheet layout driver.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::circuit::Circuit;
use crate::geometry::{Coord, Point, DEFAULT_GRID};
use crate::library::LookupError;
use crate::sheet::{Paper, Sheet, SheetTree};
use crate::{hierarchy, labels, placement, routing, verify};

#[derive(Debug, thiserror::Error)]
pub enum SheetGenError {
    #[error("Library lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("Reference designator {reference} is assigned more than once")]
    NamingConflict { reference: String },
    #[error("Part {part} has no pin {pin}")]
    UnknownPin { part: String, pin: String },
    #[error("Pin {pin} is already on net {existing}, cannot connect it to {requested}")]
    PinConflict {
        pin: String,
        existing: String,
        requested: String,
    },
    #[error("Invalid circuit: {0}")]
    InvalidCircuit(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_grid() -> Coord {
    DEFAULT_GRID
}
fn default_max_expansions() -> usize {
    50_000
}
fn default_turn_penalty() -> Coord {
    2
}
fn default_proximity_penalty() -> Coord {
    1
}
fn default_label_attempts() -> usize {
    6
}
fn default_gap_x() -> Coord {
    12_700
}
fn default_gap_y() -> Coord {
    10_160
}
fn default_label_stub_length() -> Coord {
    5_080
}
fn default_true() -> bool {
    true
}
fn default_connector_prefixes() -> Vec<String> {
    ["J", "P", "CONN", "X"].iter().map(|s| s.to_string()).collect()
}

/// Options for a generation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Lattice pitch in µm
    #[serde(default = "default_grid")]
    pub grid: Coord,

    /// A* expansions allowed per connection; 0 disables routing
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,

    #[serde(default = "default_turn_penalty")]
    pub turn_penalty: Coord,

    /// Extra cost for stepping next to another net's wire
    #[serde(default = "default_proximity_penalty")]
    pub proximity_penalty: Coord,

    /// Candidate rings tried per label
    #[serde(default = "default_label_attempts")]
    pub label_attempts: usize,

    /// Starting paper size
    #[serde(default)]
    pub paper: Paper,

    #[serde(default = "default_gap_x")]
    pub gap_x: Coord,

    #[serde(default = "default_gap_y")]
    pub gap_y: Coord,

    #[serde(default = "default_label_stub_length")]
    pub label_stub_length: Coord,

    /// Reference prefixes placed on the sheet border
    #[serde(default = "default_connector_prefixes")]
    pub connector_prefixes: Vec<String>,

    /// Add a PWR_FLAG to every supply or ground rail nothing drives
    #[serde(default = "default_true")]
    pub power_flags: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            grid: default_grid(),
            max_expansions: default_max_expansions(),
            turn_penalty: default_turn_penalty(),
            proximity_penalty: default_proximity_penalty(),
            label_attempts: default_label_attempts(),
            paper: Paper::default(),
            gap_x: default_gap_x(),
            gap_y: default_gap_y(),
            label_stub_length: default_label_stub_length(),
            connector_prefixes: default_connector_prefixes(),
            power_flags: true,
        }
    }
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<(), SheetGenError> {
        if self.grid <= 0 {
            return Err(SheetGenError::Config(format!("grid must be positive, got {}", self.grid)));
        }
        if self.gap_x < 2 * self.grid || self.gap_y < 2 * self.grid {
            return Err(SheetGenError::Config(format!(
                "gaps ({}, {}) must be at least two grid steps",
                self.gap_x, self.gap_y
            )));
        }
        if self.label_attempts == 0 {
            return Err(SheetGenError::Config("label_attempts must be at least 1".to_string()));
        }
        if self.turn_penalty < 0 || self.proximity_penalty < 0 {
            return Err(SheetGenError::Config("penalties cannot be negative".to_string()));
        }
        if self.label_stub_length < self.grid {
            return Err(SheetGenError::Config(format!(
                "label_stub_length {} is shorter than the grid",
                self.label_stub_length
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, SheetGenError> {
        let options: GenerationOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SheetGenError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// A layout compromise made to finish generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    UnroutedPair {
        sheet: String,
        net: String,
        from: Point,
        to: Point,
    },
    StubInserted {
        sheet: String,
        net: String,
        from: Point,
        to: Point,
    },
    /// No stub could reach the net without touching another one; the two
    /// points carry net labels instead.
    LabelTie {
        sheet: String,
        net: String,
        from: Point,
        to: Point,
    },
    LabelOverlap {
        sheet: String,
        text: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutReport {
    pub degradations: Vec<Degradation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayoutStats {
    pub unrouted_pairs: usize,
    pub stubs: usize,
    pub label_ties: usize,
    pub label_overlaps: usize,
}

impl LayoutReport {
    pub fn stats(&self) -> LayoutStats {
        let mut stats = LayoutStats::default();
        for d in &self.degradations {
            match d {
                Degradation::UnroutedPair { .. } => stats.unrouted_pairs += 1,
                Degradation::StubInserted { .. } => stats.stubs += 1,
                Degradation::LabelTie { .. } => stats.label_ties += 1,
                Degradation::LabelOverlap { .. } => stats.label_overlaps += 1,
            }
        }
        stats
    }

    pub fn is_clean(&self) -> bool {
        self.degradations.is_empty()
    }
}

/// Result of a generation run.
#[derive(Debug, Clone)]
pub struct Generation {
    pub tree: SheetTree,
    pub report: LayoutReport,
}

/// Runs placement, routing, verification and labelling on one sheet.
fn layout_sheet(mut sheet: Sheet, options: &GenerationOptions) -> (Sheet, Vec<Degradation>) {
    let mut degradations = Vec::new();
    placement::place_sheet(&mut sheet, options);
    routing::route_sheet(&mut sheet, options, &mut degradations);
    verify::verify_sheet(&mut sheet, &mut degradations);
    verify::synthesize_junctions(&mut sheet);
    labels::place_labels(&mut sheet, options, &mut degradations);
    (sheet, degradations)
}

/// Schematic generator.
pub struct SchematicGenerator {
    options: GenerationOptions,
}

impl SchematicGenerator {
    pub fn new(options: GenerationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Lay out `circuit` as a sheet tree.
    ///
    /// Pre-flight problems (bad options, dangling ids, duplicate references)
    /// are errors. Layout compromises are collected in the report instead.
    pub fn generate(&self, circuit: &Circuit) -> Result<Generation, SheetGenError> {
        self.options.validate()?;
        circuit.validate()?;

        let mut sheets = hierarchy::build_sheets(circuit, self.options.grid)?;
        if self.options.power_flags {
            let flags = hierarchy::inject_power_flags(circuit, &mut sheets)?;
            debug!("Added {} power flags to {}", flags, circuit.name);
        }
        info!(
            "Generating {}: {} parts, {} nets, {} sheets",
            circuit.name,
            circuit.parts.len(),
            circuit.nets.len(),
            sheets.len()
        );

        let laid_out = self.layout_all(sheets);

        let mut report = LayoutReport::default();
        let mut out = Vec::with_capacity(laid_out.len());
        for (sheet, degradations) in laid_out {
            report.degradations.extend(degradations);
            out.push(sheet);
        }

        let tree = SheetTree {
            circuit: circuit.name.clone(),
            sheets: out,
        };
        let stats = report.stats();
        info!(
            "Generated {}: {} wires, {} unrouted, {} stubs, {} label ties, {} label overlaps",
            circuit.name,
            tree.wire_count(),
            stats.unrouted_pairs,
            stats.stubs,
            stats.label_ties,
            stats.label_overlaps
        );
        Ok(Generation { tree, report })
    }

    #[cfg(not(feature = "parallel"))]
    fn layout_all(&self, sheets: Vec<Sheet>) -> Vec<(Sheet, Vec<Degradation>)> {
        sheets
            .into_iter()
            .map(|s| layout_sheet(s, &self.options))
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn layout_all(&self, sheets: Vec<Sheet>) -> Vec<(Sheet, Vec<Degradation>)> {
        use rayon::prelude::*;
        sheets
            .into_par_iter()
            .map(|s| layout_sheet(s, &self.options))
            .collect()
    }
}

impl Default for SchematicGenerator {
    fn default() -> Self {
        Self::new(GenerationOptions::default())
    }
}
