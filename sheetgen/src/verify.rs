//! Auto-verifier.
//!
//! Audits the physical connectivity of every net after routing and inserts
//! dog-leg stubs until each net forms a single component. A stub never
//! touches a pin or wire of another net; when every L-path to the net is
//! blocked the gap is bridged with a pair of net labels instead. Also
//! synthesizes junction dots.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::unionfind::UnionFind;
use tracing::{debug, warn};

use crate::circuit::NetId;
use crate::core::Degradation;
use crate::geometry::{dog_legs, nearest_on_segment, segment_contains, Point, Rect};
use crate::sheet::{EndpointRef, Junction, Label, LabelKind, Sheet, SheetNet, WireOrigin};

/// Union-find over a net's endpoints, wire vertices and net label anchors.
struct Connectivity {
    /// Endpoints first, then wire vertices, then label anchors
    nodes: Vec<Point>,
    endpoints: usize,
    segments: Vec<(usize, usize)>,
    sets: UnionFind<usize>,
}

impl Connectivity {
    fn build(sheet: &Sheet, net: &SheetNet) -> Self {
        let mut nodes = sheet.endpoint_positions(net);
        let endpoints = nodes.len();
        let mut segments = Vec::new();
        for wire in sheet.wires_of(net.net) {
            let base = nodes.len();
            nodes.extend(wire.points.iter().copied());
            segments.extend((base..base + wire.points.len().saturating_sub(1)).map(|i| (i, i + 1)));
        }

        // Same-named labels on one sheet are connected
        let first_label = nodes.len();
        nodes.extend(
            sheet
                .labels
                .iter()
                .filter(|l| l.kind == LabelKind::Net && l.net == Some(net.net))
                .map(|l| l.anchor),
        );

        let mut sets = UnionFind::new(nodes.len());
        for &(a, b) in &segments {
            sets.union(a, b);
        }
        for i in first_label + 1..nodes.len() {
            sets.union(first_label, i);
        }

        // Coincident points are connected
        let mut by_point: BTreeMap<Point, usize> = BTreeMap::new();
        for (i, p) in nodes.iter().enumerate() {
            match by_point.get(p) {
                Some(&first) => {
                    sets.union(first, i);
                }
                None => {
                    by_point.insert(*p, i);
                }
            }
        }

        // A point on a segment joins it
        for (i, p) in nodes.iter().enumerate() {
            for &(a, b) in &segments {
                if segment_contains(nodes[a], nodes[b], *p) {
                    sets.union(a, i);
                }
            }
        }

        Self {
            nodes,
            endpoints,
            segments,
            sets,
        }
    }

    fn anchor(&self) -> Option<usize> {
        (self.endpoints > 0).then(|| self.sets.find(0))
    }

    fn disconnected(&self) -> Vec<usize> {
        let Some(root) = self.anchor() else {
            return Vec::new();
        };
        (0..self.endpoints)
            .filter(|&i| self.sets.find(i) != root)
            .collect()
    }

    /// Points of the anchor component a stub from `p` may end on: its nodes
    /// and the nearest point of each of its segments, closest first. Ties
    /// go to the smaller point.
    fn anchor_targets(&self, p: Point) -> Vec<Point> {
        let Some(root) = self.anchor() else {
            return Vec::new();
        };
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| self.sets.find(*i) == root)
            .map(|(_, q)| *q);
        let projections = self
            .segments
            .iter()
            .filter(|(a, _)| self.sets.find(*a) == root)
            .map(|&(a, b)| nearest_on_segment(self.nodes[a], self.nodes[b], p));
        let mut targets: Vec<Point> = nodes.chain(projections).collect();
        targets.sort_by_key(|q| (q.manhattan(p), *q));
        targets.dedup();
        targets
    }
}

/// Everything on the sheet that a stub of one net must stay off.
struct Clearance {
    /// Pins, ports and sheet pins of other nets plus their wire vertices
    points: Vec<Point>,
    segments: Vec<(Point, Point)>,
}

impl Clearance {
    fn around(sheet: &Sheet, net: &SheetNet) -> Self {
        let own: BTreeSet<Point> = sheet.endpoint_positions(net).into_iter().collect();
        let pins = sheet
            .parts
            .iter()
            .flat_map(|p| p.pins.iter().filter_map(move |pin| p.pin_position(&pin.number)));
        let ports = sheet.ports.iter().map(|p| p.position);
        let sheet_pins = sheet
            .sheet_symbols
            .iter()
            .flat_map(|s| (0..s.pins.len()).filter_map(move |i| s.pin_position(i)));
        let mut points: Vec<Point> = pins
            .chain(ports)
            .chain(sheet_pins)
            .filter(|p| !own.contains(p))
            .collect();

        let mut segments = Vec::new();
        for wire in sheet.wires.iter().filter(|w| w.net != net.net) {
            points.extend(wire.points.iter().copied());
            segments.extend(wire.segments());
        }
        Self { points, segments }
    }

    /// True when `path` neither runs over a foreign point nor puts one of
    /// its vertices on a foreign segment.
    fn allows(&self, path: &[Point]) -> bool {
        let over_point = path
            .windows(2)
            .any(|w| self.points.iter().any(|p| segment_contains(w[0], w[1], *p)));
        let on_segment = path
            .iter()
            .any(|v| self.segments.iter().any(|&(a, b)| segment_contains(a, b, *v)));
        !over_point && !on_segment
    }
}

fn net_label(net: &SheetNet, at: Point) -> Label {
    Label {
        kind: LabelKind::Net,
        text: net.name.clone(),
        net: Some(net.net),
        anchor: at,
        bbox: Rect::from_point(at),
        overlapping: false,
    }
}

/// True when every endpoint of `net` is physically joined to the others.
pub fn net_is_connected(sheet: &Sheet, net: &SheetNet) -> bool {
    Connectivity::build(sheet, net).disconnected().is_empty()
}

/// Endpoints of `net` not reachable from its first endpoint.
pub fn unconnected_endpoints(sheet: &Sheet, net: &SheetNet) -> Vec<EndpointRef> {
    let resolvable: Vec<&EndpointRef> = net
        .endpoints
        .iter()
        .filter(|e| sheet.endpoint_position(e).is_some())
        .collect();
    Connectivity::build(sheet, net)
        .disconnected()
        .into_iter()
        .map(|i| resolvable[i].clone())
        .collect()
}

/// Insert stub wires until every net on the sheet is connected.
///
/// Gaps no stub can bridge without touching another net get a net label
/// at each end. Label boxes are laid out later with the other labels.
pub fn verify_sheet(sheet: &mut Sheet, report: &mut Vec<Degradation>) {
    let nets: Vec<SheetNet> = sheet.nets.clone();
    let mut stubs = 0;
    let mut ties = 0;
    for net in &nets {
        // Each pass joins at least one endpoint to the anchor component.
        for _ in 0..=net.endpoints.len() {
            let conn = Connectivity::build(sheet, net);
            let Some(&first) = conn.disconnected().first() else {
                break;
            };
            let from = conn.nodes[first];
            let targets = conn.anchor_targets(from);
            let Some(&nearest) = targets.first() else {
                break;
            };

            let clearance = Clearance::around(sheet, net);
            let path = targets
                .iter()
                .flat_map(|&to| dog_legs(from, to))
                .find(|path| clearance.allows(path));
            match path {
                Some(path) => {
                    let to = path.last().copied().unwrap_or(nearest);
                    debug!("Stub for {} on {} from {} to {}", net.name, sheet.path, from, to);
                    sheet.push_wire(net.net, path, WireOrigin::Stub);
                    report.push(Degradation::StubInserted {
                        sheet: sheet.path.clone(),
                        net: net.name.clone(),
                        from,
                        to,
                    });
                    stubs += 1;
                }
                None => {
                    debug!("No clear stub for {} on {}; labels at {} and {}", net.name, sheet.path, from, nearest);
                    sheet.labels.push(net_label(net, from));
                    sheet.labels.push(net_label(net, nearest));
                    report.push(Degradation::LabelTie {
                        sheet: sheet.path.clone(),
                        net: net.name.clone(),
                        from,
                        to: nearest,
                    });
                    ties += 1;
                }
            }
        }
        if !net_is_connected(sheet, net) {
            warn!("{}: net {} is still disconnected", sheet.path, net.name);
        }
    }
    if stubs + ties > 0 {
        debug!("{}: inserted {} stub wires and {} label ties", sheet.path, stubs, ties);
    }
}

/// Junction dots for every net on the sheet.
///
/// A point gets a junction when at least three segment ends meet there, or
/// when a segment end lands strictly inside another segment of the net.
pub fn synthesize_junctions(sheet: &mut Sheet) {
    let mut junctions: BTreeSet<Junction> = BTreeSet::new();
    let nets: BTreeSet<NetId> = sheet.wires.iter().map(|w| w.net).collect();

    for net in nets {
        let segments: Vec<(Point, Point)> = sheet
            .wires_of(net)
            .flat_map(|w| w.segments().collect::<Vec<_>>())
            .filter(|(a, b)| a != b)
            .collect();

        let mut ends: BTreeMap<Point, usize> = BTreeMap::new();
        for (a, b) in &segments {
            *ends.entry(*a).or_insert(0) += 1;
            *ends.entry(*b).or_insert(0) += 1;
        }

        for (&p, &count) in &ends {
            let interior = segments
                .iter()
                .any(|(a, b)| *a != p && *b != p && segment_contains(*a, *b, p));
            if count + if interior { 2 } else { 0 } >= 3 {
                junctions.insert(Junction { position: p, net });
            }
        }
    }

    sheet.junctions = junctions.into_iter().collect();
}
