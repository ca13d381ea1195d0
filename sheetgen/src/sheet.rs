//! Finalized, format-agnostic sheet tree.
//!
//! Everything here is produced by a single generation run. A serializer
//! for a concrete CAD format only has to walk [`SheetTree::sheets`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::circuit::{InvocationId, NetId, PartId, PinRef};
use crate::core::SheetGenError;
use crate::geometry::{Coord, Point, Rect, Rotation};
use crate::library::ElectricalType;

/// Index of a sheet inside [`SheetTree::sheets`]. The root is `SheetId(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetId(pub usize);

impl SheetId {
    pub const ROOT: SheetId = SheetId(0);
}

/// Name-based UUID so repeated runs produce identical identifiers.
pub fn stable_uuid(namespace: &Uuid, name: &str) -> Uuid {
    Uuid::new_v5(namespace, name.as_bytes())
}

/// ISO paper sizes in landscape orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Paper {
    #[default]
    A4,
    A3,
    A2,
    A1,
    A0,
}

impl Paper {
    /// (width, height) in µm.
    pub fn size(self) -> (Coord, Coord) {
        match self {
            Paper::A4 => (297_000, 210_000),
            Paper::A3 => (420_000, 297_000),
            Paper::A2 => (594_000, 420_000),
            Paper::A1 => (841_000, 594_000),
            Paper::A0 => (1_189_000, 841_000),
        }
    }

    pub fn next(self) -> Option<Paper> {
        match self {
            Paper::A4 => Some(Paper::A3),
            Paper::A3 => Some(Paper::A2),
            Paper::A2 => Some(Paper::A1),
            Paper::A1 => Some(Paper::A0),
            Paper::A0 => None,
        }
    }
}

impl std::str::FromStr for Paper {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A4" => Ok(Paper::A4),
            "A3" => Ok(Paper::A3),
            "A2" => Ok(Paper::A2),
            "A1" => Ok(Paper::A1),
            "A0" => Ok(Paper::A0),
            other => Err(format!("unknown paper size: {}", other)),
        }
    }
}

/// Pin of a placed part, offset relative to the unrotated symbol origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedPin {
    pub number: String,
    pub name: String,
    pub electrical_type: ElectricalType,
    pub offset: Point,
}

/// A part instance on a sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedPart {
    pub part: PartId,
    pub reference: String,
    pub lib: String,
    pub symbol: String,
    pub value: Option<String>,
    pub fields: BTreeMap<String, String>,

    /// Symbol bounds (body plus pin points) relative to the origin, unrotated
    pub symbol_bounds: Rect,
    pub pins: Vec<PlacedPin>,

    pub position: Point,
    pub rotation: Rotation,
    pub uuid: Uuid,
}

impl PlacedPart {
    pub fn local_bounds(&self) -> Rect {
        self.symbol_bounds.rotate(self.rotation)
    }

    pub fn bbox(&self) -> Rect {
        self.local_bounds().translate(self.position)
    }

    pub fn pin(&self, number: &str) -> Option<&PlacedPin> {
        self.pins.iter().find(|p| p.number == number)
    }

    /// Absolute connection point of a pin.
    pub fn pin_position(&self, number: &str) -> Option<Point> {
        self.pin(number)
            .map(|p| self.position + self.rotation.apply(p.offset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
    Bidirectional,
}

/// Hierarchical label on a child sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub net: NetId,
    pub direction: PortDirection,
    pub position: Point,
}

/// Pin on a sheet symbol, mirroring one port of the child sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetPin {
    pub name: String,
    pub net: NetId,
    pub direction: PortDirection,

    /// Relative to the symbol center
    pub offset: Point,
}

/// Block standing for a child sheet on its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSymbol {
    pub child: SheetId,
    pub name: String,
    pub position: Point,
    pub width: Coord,
    pub height: Coord,
    pub pins: Vec<SheetPin>,
    pub uuid: Uuid,
}

impl SheetSymbol {
    pub fn local_bounds(&self) -> Rect {
        Rect::from_center(Point::new(0, 0), self.width, self.height)
    }

    pub fn bbox(&self) -> Rect {
        self.local_bounds().translate(self.position)
    }

    pub fn pin_position(&self, index: usize) -> Option<Point> {
        self.pins.get(index).map(|p| self.position + p.offset)
    }
}

/// Something a net connects to on one sheet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointRef {
    /// `part` indexes [`Sheet::parts`]
    Pin { part: usize, number: String },
    /// Index into [`Sheet::ports`]
    Port { port: usize },
    /// Pin `pin` of [`Sheet::sheet_symbols`]`[symbol]`
    SheetPin { symbol: usize, pin: usize },
}

/// The part of a net that lives on one sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetNet {
    pub net: NetId,
    pub name: String,
    pub explicit_name: bool,
    pub endpoints: Vec<EndpointRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireOrigin {
    /// Found by the router
    Routed,
    /// Inserted by the verifier to repair connectivity
    Stub,
    /// Short lead carrying a net label
    LabelStub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wire {
    pub net: NetId,
    pub points: Vec<Point>,
    pub origin: WireOrigin,
    pub uuid: Uuid,
}

impl Wire {
    pub fn segments(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        self.points.windows(2).map(|w| (w[0], w[1]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Junction {
    pub position: Point,
    pub net: NetId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    Reference,
    Value,
    SheetName,
    Hierarchical,
    SheetPin,
    Net,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub kind: LabelKind,
    pub text: String,
    pub net: Option<NetId>,

    /// Point the text annotates
    pub anchor: Point,

    /// Text box
    pub bbox: Rect,

    /// No free candidate was found; the box overlaps something
    pub overlapping: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoConnectMarker {
    pub pin: PinRef,
    pub position: Point,
}

/// One sheet of the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub id: SheetId,
    pub parent: Option<SheetId>,
    pub children: Vec<SheetId>,
    pub invocation: Option<InvocationId>,
    pub name: String,
    pub path: String,
    pub uuid: Uuid,
    pub paper: Paper,
    pub bounds: Rect,
    pub grid: Coord,

    pub parts: Vec<PlacedPart>,
    pub sheet_symbols: Vec<SheetSymbol>,
    pub ports: Vec<Port>,
    pub nets: Vec<SheetNet>,
    pub wires: Vec<Wire>,
    pub junctions: Vec<Junction>,
    pub labels: Vec<Label>,
    pub no_connects: Vec<NoConnectMarker>,
}

impl Sheet {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn endpoint_position(&self, endpoint: &EndpointRef) -> Option<Point> {
        match endpoint {
            EndpointRef::Pin { part, number } => {
                self.parts.get(*part).and_then(|p| p.pin_position(number))
            }
            EndpointRef::Port { port } => self.ports.get(*port).map(|p| p.position),
            EndpointRef::SheetPin { symbol, pin } => self
                .sheet_symbols
                .get(*symbol)
                .and_then(|s| s.pin_position(*pin)),
        }
    }

    /// Positions of a net's endpoints, skipping any that cannot be resolved.
    pub fn endpoint_positions(&self, net: &SheetNet) -> Vec<Point> {
        net.endpoints
            .iter()
            .filter_map(|e| self.endpoint_position(e))
            .collect()
    }

    /// Bounding boxes of every part and sheet symbol.
    pub fn obstacles(&self) -> Vec<Rect> {
        self.parts
            .iter()
            .map(|p| p.bbox())
            .chain(self.sheet_symbols.iter().map(|s| s.bbox()))
            .collect()
    }

    pub fn net(&self, net: NetId) -> Option<&SheetNet> {
        self.nets.iter().find(|n| n.net == net)
    }

    pub fn wires_of(&self, net: NetId) -> impl Iterator<Item = &Wire> {
        self.wires.iter().filter(move |w| w.net == net)
    }

    pub fn part_by_ref(&self, reference: &str) -> Option<&PlacedPart> {
        self.parts.iter().find(|p| p.reference == reference)
    }

    /// Append a wire with a UUID derived from the sheet and wire index.
    pub fn push_wire(&mut self, net: NetId, points: Vec<Point>, origin: WireOrigin) {
        let uuid = stable_uuid(&self.uuid, &format!("wire/{}", self.wires.len()));
        self.wires.push(Wire {
            net,
            points,
            origin,
            uuid,
        });
    }
}

/// Root-first arena of sheets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetTree {
    pub circuit: String,
    pub sheets: Vec<Sheet>,
}

impl SheetTree {
    pub fn root(&self) -> &Sheet {
        &self.sheets[SheetId::ROOT.0]
    }

    pub fn get(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.get(id.0)
    }

    pub fn children(&self, id: SheetId) -> impl Iterator<Item = &Sheet> {
        self.get(id)
            .map(|s| s.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(move |c| self.get(*c))
    }

    pub fn find_sheet(&self, path: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.path == path)
    }

    /// Every placed part with its sheet, for BOM generation.
    pub fn parts(&self) -> impl Iterator<Item = (&Sheet, &PlacedPart)> {
        self.sheets
            .iter()
            .flat_map(|s| s.parts.iter().map(move |p| (s, p)))
    }

    pub fn find_part(&self, reference: &str) -> Option<(&Sheet, &PlacedPart)> {
        self.parts().find(|(_, p)| p.reference == reference)
    }

    pub fn wire_count(&self) -> usize {
        self.sheets.iter().map(|s| s.wires.len()).sum()
    }

    pub fn to_json(&self) -> Result<String, SheetGenError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resistor_at(position: Point, rotation: Rotation) -> PlacedPart {
        PlacedPart {
            part: PartId(0),
            reference: "R1".into(),
            lib: "Device".into(),
            symbol: "R".into(),
            value: None,
            fields: BTreeMap::new(),
            symbol_bounds: Rect::new(-1016, -3810, 1016, 3810),
            pins: vec![
                PlacedPin {
                    number: "1".into(),
                    name: "~".into(),
                    electrical_type: ElectricalType::Passive,
                    offset: Point::new(0, -3810),
                },
                PlacedPin {
                    number: "2".into(),
                    name: "~".into(),
                    electrical_type: ElectricalType::Passive,
                    offset: Point::new(0, 3810),
                },
            ],
            position,
            rotation,
            uuid: Uuid::nil(),
        }
    }

    #[test]
    fn pin_position_follows_rotation() {
        let r = resistor_at(Point::new(10_160, 10_160), Rotation::R90);
        assert_eq!(r.pin_position("1"), Some(Point::new(6_350, 10_160)));
        assert_eq!(r.bbox(), Rect::new(6_350, 9_144, 13_970, 11_176));
        assert_eq!(r.pin_position("3"), None);
    }

    #[test]
    fn paper_sizes_grow() {
        let mut paper = Paper::A4;
        let mut last = paper.size();
        while let Some(next) = paper.next() {
            let size = next.size();
            assert!(size.0 > last.0 && size.1 > last.1);
            last = size;
            paper = next;
        }
        assert_eq!(paper, Paper::A0);
        assert_eq!("a3".parse::<Paper>(), Ok(Paper::A3));
    }

    #[test]
    fn stable_uuid_is_deterministic() {
        let a = stable_uuid(&Uuid::NAMESPACE_URL, "/amp_1");
        let b = stable_uuid(&Uuid::NAMESPACE_URL, "/amp_1");
        assert_eq!(a, b);
        assert_ne!(a, stable_uuid(&Uuid::NAMESPACE_URL, "/amp_2"));
    }

    #[test]
    fn sheet_symbol_pins_are_relative_to_center() {
        let s = SheetSymbol {
            child: SheetId(1),
            name: "amp_1".into(),
            position: Point::new(50_800, 50_800),
            width: 20_320,
            height: 20_320,
            pins: vec![SheetPin {
                name: "vin".into(),
                net: NetId(0),
                direction: PortDirection::Input,
                offset: Point::new(-10_160, -7_620),
            }],
            uuid: Uuid::nil(),
        };
        assert_eq!(s.pin_position(0), Some(Point::new(40_640, 43_180)));
        assert_eq!(s.bbox().width(), 20_320);
    }
}
