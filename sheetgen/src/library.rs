//! Symbol library collaborator.
//!
//! The core only needs pin geometry, electrical types, a body outline and
//! the reference prefix of each symbol. [`SymbolLibrary`] is the seam a
//! real library loader plugs into; [`BuiltinLibrary`] covers the common
//! parts used by tests and examples.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Point, Rect, Side};

/// Electrical type of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectricalType {
    Input,
    Output,
    Bidirectional,
    PowerIn,
    PowerOut,
    Passive,
    NoConnect,
    #[default]
    Unspecified,
}

impl ElectricalType {
    /// Output or power output.
    pub fn is_driver(self) -> bool {
        matches!(self, ElectricalType::Output | ElectricalType::PowerOut)
    }
}

impl std::fmt::Display for ElectricalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectricalType::Input => write!(f, "input"),
            ElectricalType::Output => write!(f, "output"),
            ElectricalType::Bidirectional => write!(f, "bidirectional"),
            ElectricalType::PowerIn => write!(f, "power input"),
            ElectricalType::PowerOut => write!(f, "power output"),
            ElectricalType::Passive => write!(f, "passive"),
            ElectricalType::NoConnect => write!(f, "no-connect"),
            ElectricalType::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// Names that mark a ground pin or a ground rail.
pub const GROUND_NAMES: &[&str] = &["GND", "VSS", "AGND", "DGND", "PGND", "GNDA", "GNDD", "0V"];

/// True when `name` names a ground rail (`GND`, `VSS`, `GND_ISO`, ...).
pub fn is_ground_name(name: &str) -> bool {
    let upper = name.trim().to_uppercase();
    GROUND_NAMES.contains(&upper.as_str()) || upper.starts_with("GND")
}

/// Names that mark a positive supply rail.
pub const POWER_NAMES: &[&str] = &["VCC", "VDD", "V+", "VIN", "VBAT", "BATT+", "3V3", "5V", "12V"];

/// True when `name` names a supply rail (`VCC`, `+5V`, `VDD_IO`, ...).
pub fn is_power_name(name: &str) -> bool {
    let upper = name.trim().trim_start_matches('+').to_uppercase();
    POWER_NAMES.contains(&upper.as_str()) || upper.starts_with("VCC") || upper.starts_with("VDD")
}

/// Supply or ground rail.
pub fn is_rail_name(name: &str) -> bool {
    is_power_name(name) || is_ground_name(name)
}

/// A pin on a symbol definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinDef {
    /// Pin number (e.g., "1", "A1")
    pub number: String,

    /// Pin name (e.g., "VDD", "GND", "~")
    pub name: String,

    #[serde(default)]
    pub electrical_type: ElectricalType,

    /// Connection point relative to the symbol origin
    pub offset: Point,
}

impl PinDef {
    pub fn new(number: impl Into<String>, name: impl Into<String>, electrical_type: ElectricalType, offset: Point) -> Self {
        Self {
            number: number.into(),
            name: name.into(),
            electrical_type,
            offset,
        }
    }

    pub fn is_ground(&self) -> bool {
        is_ground_name(&self.name)
    }
}

/// Geometry and pin table of one library symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDef {
    pub lib: String,
    pub name: String,

    /// Reference designator prefix ("R", "U", "J", ...)
    pub reference_prefix: String,

    /// Body outline relative to the origin
    pub body: Rect,

    pub pins: Vec<PinDef>,
}

impl SymbolDef {
    pub fn key(&self) -> String {
        format!("{}:{}", self.lib, self.name)
    }

    /// Body outline grown to include every pin connection point.
    pub fn bounds(&self) -> Rect {
        self.pins.iter().fold(self.body, |r, p| r.include(p.offset))
    }

    /// Look up a pin by number first, then by name.
    pub fn pin(&self, key: &str) -> Option<&PinDef> {
        self.pins
            .iter()
            .find(|p| p.number == key)
            .or_else(|| self.pins.iter().find(|p| p.name == key))
    }

    /// Side of the body the pins predominantly leave from.
    pub fn pin_side(&self) -> Side {
        let center = self.body.center();
        let (sx, sy) = self.pins.iter().fold((0, 0), |(sx, sy), p| {
            (sx + (p.offset.x - center.x), sy + (p.offset.y - center.y))
        });
        Side::of_offset(Point::new(sx, sy))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("Unknown symbol library: {0}")]
    UnknownLibrary(String),

    #[error("Symbol {symbol} not found in library {lib}")]
    UnknownSymbol { lib: String, symbol: String },
}

/// Source of symbol definitions, keyed by library and symbol name.
pub trait SymbolLibrary {
    fn lookup(&self, lib: &str, symbol: &str) -> Result<SymbolDef, LookupError>;
}

/// Library backed by an in-memory map, for caller-supplied symbols.
#[derive(Debug, Clone, Default)]
pub struct MapLibrary {
    symbols: BTreeMap<(String, String), SymbolDef>,
}

impl MapLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: SymbolDef) {
        self.symbols
            .insert((symbol.lib.clone(), symbol.name.clone()), symbol);
    }

    pub fn with(mut self, symbol: SymbolDef) -> Self {
        self.insert(symbol);
        self
    }
}

impl SymbolLibrary for MapLibrary {
    fn lookup(&self, lib: &str, symbol: &str) -> Result<SymbolDef, LookupError> {
        if !self.symbols.keys().any(|(l, _)| l == lib) {
            return Err(LookupError::UnknownLibrary(lib.to_string()));
        }
        self.symbols
            .get(&(lib.to_string(), symbol.to_string()))
            .cloned()
            .ok_or_else(|| LookupError::UnknownSymbol {
                lib: lib.to_string(),
                symbol: symbol.to_string(),
            })
    }
}

/// Built-in symbols drawn on the 1.27 mm grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLibrary;

impl BuiltinLibrary {
    pub const LIBRARIES: &'static [&'static str] = &[
        "Device",
        "Connector",
        "Amplifier_Operational",
        "Regulator_Linear",
        "Logic",
        "power",
    ];
}

fn symbol(lib: &str, name: &str, prefix: &str, body: Rect, pins: Vec<PinDef>) -> SymbolDef {
    SymbolDef {
        lib: lib.to_string(),
        name: name.to_string(),
        reference_prefix: prefix.to_string(),
        body,
        pins,
    }
}

/// Vertical two-terminal passive with pin 1 on top.
fn two_terminal(name: &str, prefix: &str, body: Rect, names: [&str; 2]) -> SymbolDef {
    symbol(
        "Device",
        name,
        prefix,
        body,
        vec![
            PinDef::new("1", names[0], ElectricalType::Passive, Point::new(0, -3810)),
            PinDef::new("2", names[1], ElectricalType::Passive, Point::new(0, 3810)),
        ],
    )
}

fn connector(count: usize) -> SymbolDef {
    let pins = (0..count)
        .map(|i| {
            PinDef::new(
                (i + 1).to_string(),
                format!("Pin_{}", i + 1),
                ElectricalType::Passive,
                Point::new(-5080, i as i64 * 2540),
            )
        })
        .collect();
    let bottom = (count.max(1) as i64 - 1) * 2540 + 1270;
    symbol(
        "Connector",
        &format!("Conn_01x{:02}", count),
        "J",
        Rect::new(-1270, -1270, 1270, bottom),
        pins,
    )
}

impl SymbolLibrary for BuiltinLibrary {
    fn lookup(&self, lib: &str, name: &str) -> Result<SymbolDef, LookupError> {
        use ElectricalType::*;

        let missing = || LookupError::UnknownSymbol {
            lib: lib.to_string(),
            symbol: name.to_string(),
        };

        match lib {
            "Device" => match name {
                "R" => Ok(two_terminal("R", "R", Rect::new(-1016, -2540, 1016, 2540), ["~", "~"])),
                "C" => Ok(two_terminal("C", "C", Rect::new(-2032, -762, 2032, 762), ["~", "~"])),
                "C_Polarized" => Ok(two_terminal(
                    "C_Polarized",
                    "C",
                    Rect::new(-2032, -1016, 2032, 1016),
                    ["+", "-"],
                )),
                "L" => Ok(two_terminal("L", "L", Rect::new(-1016, -2540, 1016, 2540), ["1", "2"])),
                "D" | "LED" => Ok(symbol(
                    "Device",
                    name,
                    "D",
                    Rect::new(-1270, -1270, 1270, 1270),
                    vec![
                        PinDef::new("1", "K", Passive, Point::new(-3810, 0)),
                        PinDef::new("2", "A", Passive, Point::new(3810, 0)),
                    ],
                )),
                "Q_NPN_BCE" => Ok(symbol(
                    "Device",
                    name,
                    "Q",
                    Rect::new(-2540, -2540, 2540, 2540),
                    vec![
                        PinDef::new("1", "B", Input, Point::new(-5080, 0)),
                        PinDef::new("2", "C", Passive, Point::new(2540, -5080)),
                        PinDef::new("3", "E", Passive, Point::new(2540, 5080)),
                    ],
                )),
                _ => Err(missing()),
            },
            "Connector" => name
                .strip_prefix("Conn_01x")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| (1..=40).contains(n))
                .map(connector)
                .ok_or_else(missing),
            "Amplifier_Operational" if name == "OpAmp" => Ok(symbol(
                lib,
                name,
                "U",
                Rect::new(-5080, -5080, 5080, 5080),
                vec![
                    PinDef::new("1", "OUT", Output, Point::new(7620, 0)),
                    PinDef::new("2", "-", Input, Point::new(-7620, 2540)),
                    PinDef::new("3", "+", Input, Point::new(-7620, -2540)),
                    PinDef::new("4", "V-", PowerIn, Point::new(-2540, 7620)),
                    PinDef::new("8", "V+", PowerIn, Point::new(-2540, -7620)),
                ],
            )),
            "Regulator_Linear" if name == "LM7805" => Ok(symbol(
                lib,
                name,
                "U",
                Rect::new(-5080, -2540, 5080, 2540),
                vec![
                    PinDef::new("1", "VI", PowerIn, Point::new(-7620, 0)),
                    PinDef::new("2", "GND", PowerIn, Point::new(0, 5080)),
                    PinDef::new("3", "VO", PowerOut, Point::new(7620, 0)),
                ],
            )),
            "Logic" if name == "Buffer" => Ok(symbol(
                lib,
                name,
                "U",
                Rect::new(-2540, -2540, 2540, 2540),
                vec![
                    PinDef::new("1", "A", Input, Point::new(-5080, 0)),
                    PinDef::new("2", "Y", Output, Point::new(5080, 0)),
                    PinDef::new("3", "VCC", PowerIn, Point::new(0, -5080)),
                    PinDef::new("4", "GND", PowerIn, Point::new(0, 5080)),
                ],
            )),
            "power" if name == "PWR_FLAG" => Ok(symbol(
                lib,
                name,
                "#FLG",
                Rect::new(-1270, -2540, 1270, -1270),
                vec![PinDef::new("1", "pwr", PowerOut, Point::new(0, 0))],
            )),
            known if Self::LIBRARIES.contains(&known) => Err(missing()),
            _ => Err(LookupError::UnknownLibrary(lib.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_resistor_has_two_passive_pins_on_grid() {
        let r = BuiltinLibrary.lookup("Device", "R").unwrap();
        assert_eq!(r.reference_prefix, "R");
        assert_eq!(r.pins.len(), 2);
        assert!(r.pins.iter().all(|p| p.electrical_type == ElectricalType::Passive));
        assert!(r.pins.iter().all(|p| p.offset.is_on_grid(1270)));
        assert_eq!(r.bounds(), Rect::new(-1016, -3810, 1016, 3810));
    }

    #[test]
    fn connector_pins_face_left() {
        let j = BuiltinLibrary.lookup("Connector", "Conn_01x03").unwrap();
        assert_eq!(j.reference_prefix, "J");
        assert_eq!(j.pins.len(), 3);
        assert_eq!(j.pin_side(), Side::Left);
    }

    #[test]
    fn lookup_errors_distinguish_library_and_symbol() {
        assert_eq!(
            BuiltinLibrary.lookup("Nope", "R"),
            Err(LookupError::UnknownLibrary("Nope".into()))
        );
        assert!(matches!(
            BuiltinLibrary.lookup("Device", "Flux_Capacitor"),
            Err(LookupError::UnknownSymbol { .. })
        ));
        assert!(BuiltinLibrary.lookup("Connector", "Conn_01x00").is_err());
    }

    #[test]
    fn pin_lookup_by_number_or_name() {
        let u = BuiltinLibrary.lookup("Regulator_Linear", "LM7805").unwrap();
        assert_eq!(u.pin("3").map(|p| p.name.as_str()), Some("VO"));
        assert_eq!(u.pin("GND").map(|p| p.number.as_str()), Some("2"));
        assert!(u.pin("GND").unwrap().is_ground());
    }

    #[test]
    fn rail_names() {
        for name in ["VCC", "+5V", "vdd_io", "3V3", "GND", "VSS"] {
            assert!(is_rail_name(name), "{} should be a rail", name);
        }
        assert!(is_power_name("+12V"));
        assert!(!is_power_name("GND"));
        assert!(!is_rail_name("OUT_A"));
        assert!(!is_rail_name("SIG"));
    }

    #[test]
    fn map_library_lookup() {
        let lib = MapLibrary::new().with(BuiltinLibrary.lookup("Device", "C").unwrap());
        assert!(lib.lookup("Device", "C").is_ok());
        assert!(matches!(lib.lookup("Device", "R"), Err(LookupError::UnknownSymbol { .. })));
        assert!(matches!(lib.lookup("Other", "R"), Err(LookupError::UnknownLibrary(_))));
    }
}
