//! Placement engine.
//!
//! Connectors go into a band along the sheet border with their pins facing
//! inward, filling one edge in declaration order before moving to the
//! next. Everything else is laid out in signal-flow columns inside the
//! interior region: the input stage on the left, each further hop across a
//! shared net one column to the right. When the flow does not fit the
//! sheet moves up a paper size, and past A0 it keeps growing.

use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::core::GenerationOptions;
use crate::geometry::{snap_up, Coord, Point, Rect, Rotation, Side};
use crate::library::{is_rail_name, ElectricalType};
use crate::sheet::{EndpointRef, Sheet};

/// Margin between the paper edge and the drawing frame.
pub const BORDER: Coord = 10_160;

/// Depth of the connector band inside the frame.
pub const CONNECTOR_BAND: Coord = 15_240;

/// Distance of the port columns from the left and right paper edges.
pub const PORT_INSET: Coord = BORDER + CONNECTOR_BAND + 5_080;

/// Distance of the flow region from every paper edge.
pub const INTERIOR_INSET: Coord = 45_720;

pub const PORT_SPACING: Coord = 5_080;
pub const SHEET_SYMBOL_WIDTH: Coord = 20_320;
pub const SHEET_PIN_PITCH: Coord = 2_540;
const CONNECTOR_GAP: Coord = 2_540;

fn floor_to(value: Coord, grid: Coord) -> Coord {
    value.div_euclid(grid) * grid
}

/// Alphabetic prefix of a reference designator (`CONN3` -> `CONN`).
pub fn reference_prefix(reference: &str) -> &str {
    reference.trim_end_matches(|c: char| c.is_ascii_digit())
}

pub fn is_connector(reference: &str, options: &GenerationOptions) -> bool {
    let prefix = reference_prefix(reference);
    options
        .connector_prefixes
        .iter()
        .any(|p| p.eq_ignore_ascii_case(prefix))
}

/// Rotation that turns pins on side `from` to face `to`.
pub fn rotation_towards(from: Side, to: Side) -> Rotation {
    Rotation::ALL
        .into_iter()
        .find(|r| Side::of_offset(r.apply(from.unit())) == to)
        .unwrap_or_default()
}

/// Size each sheet symbol from its pin count and lay its pins out:
/// first half on the left edge, the rest on the right.
pub fn size_sheet_symbols(sheet: &mut Sheet) {
    for symbol in &mut sheet.sheet_symbols {
        let n = symbol.pins.len() as Coord;
        let left = (n + 1) / 2;
        let right = n - left;
        let rows = left.max(right);
        let height = snap_up(
            (rows * SHEET_PIN_PITCH + SHEET_PIN_PITCH).max(SHEET_SYMBOL_WIDTH),
            SHEET_PIN_PITCH,
        );
        symbol.width = SHEET_SYMBOL_WIDTH;
        symbol.height = height;
        for (i, pin) in symbol.pins.iter_mut().enumerate() {
            let i = i as Coord;
            let (x, row) = if i < left {
                (-SHEET_SYMBOL_WIDTH / 2, i)
            } else {
                (SHEET_SYMBOL_WIDTH / 2, i - left)
            };
            pin.offset = Point::new(x, -height / 2 + SHEET_PIN_PITCH * (row + 1));
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Item {
    Part(usize),
    Symbol(usize),
}

/// Positions decided for one candidate paper size.
struct Plan {
    parts: Vec<(usize, Point, Rotation)>,
    symbols: Vec<(usize, Point)>,
    ports: Vec<(usize, Point)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

impl Edge {
    const ORDER: [Edge; 4] = [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right];

    fn inward(self) -> Side {
        match self {
            Edge::Top => Side::Down,
            Edge::Bottom => Side::Up,
            Edge::Left => Side::Right,
            Edge::Right => Side::Left,
        }
    }

    fn is_horizontal(self) -> bool {
        matches!(self, Edge::Top | Edge::Bottom)
    }
}

struct EdgeCursor {
    edge: Edge,
    cursor: Coord,
    end: Coord,
}

fn place_connectors(
    sheet: &Sheet,
    connectors: &[usize],
    bounds: Rect,
    grid: Coord,
) -> Option<Vec<(usize, Point, Rotation)>> {
    let band = BORDER + CONNECTOR_BAND;
    let mut edges: Vec<EdgeCursor> = Edge::ORDER
        .iter()
        .map(|&edge| {
            let (start, end) = if edge.is_horizontal() {
                (bounds.min.x + band, bounds.max.x - band)
            } else {
                (bounds.min.y + band, bounds.max.y - band)
            };
            EdgeCursor {
                edge,
                cursor: start,
                end,
            }
        })
        .collect();

    let mut current: Option<usize> = None;
    let mut full = [false; 4];
    let mut placed = Vec::new();
    for &idx in connectors {
        let part = &sheet.parts[idx];
        let pin_side = Side::of_offset(
            part.pins
                .iter()
                .fold(Point::new(0, 0), |acc, p| acc + (p.offset - part.symbol_bounds.center())),
        );

        loop {
            let i = match current {
                Some(i) => i,
                None => {
                    // Most available span, ties in edge order
                    let i = (0..edges.len())
                        .filter(|&i| !full[i])
                        .max_by_key(|&i| (edges[i].end - edges[i].cursor, std::cmp::Reverse(i)))?;
                    current = Some(i);
                    i
                }
            };
            let e = &mut edges[i];
            let rotation = rotation_towards(pin_side, e.edge.inward());
            let local = part.symbol_bounds.rotate(rotation);
            let origin = match e.edge {
                Edge::Top => Point::new(
                    snap_up(e.cursor - local.min.x, grid),
                    snap_up(bounds.min.y + BORDER - local.min.y, grid),
                ),
                Edge::Bottom => Point::new(
                    snap_up(e.cursor - local.min.x, grid),
                    floor_to(bounds.max.y - BORDER - local.max.y, grid),
                ),
                Edge::Left => Point::new(
                    snap_up(bounds.min.x + BORDER - local.min.x, grid),
                    snap_up(e.cursor - local.min.y, grid),
                ),
                Edge::Right => Point::new(
                    floor_to(bounds.max.x - BORDER - local.max.x, grid),
                    snap_up(e.cursor - local.min.y, grid),
                ),
            };
            let bbox = local.translate(origin);
            let far = if e.edge.is_horizontal() { bbox.max.x } else { bbox.max.y };
            if far > e.end {
                full[i] = true;
                current = None;
                continue;
            }
            e.cursor = far + CONNECTOR_GAP;
            placed.push((idx, origin, rotation));
            break;
        }
    }
    Some(placed)
}

/// Signal-flow column of every part, then every sheet symbol.
///
/// Columns count hops across shared nets from the input stage: parts with
/// an input pin and no output pin, or the first part when there are none.
/// Supply and ground rails are not hops. Whatever the search never reaches
/// shares the middle column.
fn signal_columns(sheet: &Sheet) -> Vec<usize> {
    let n_parts = sheet.parts.len();
    let n_items = n_parts + sheet.sheet_symbols.len();

    // Items and nets alternate on every path, so item depth is half the distance
    let mut graph: UnGraph<(), u32> = UnGraph::default();
    let items: Vec<NodeIndex> = (0..n_items).map(|_| graph.add_node(())).collect();
    for net in sheet.nets.iter().filter(|n| !is_rail_name(&n.name)) {
        let hub = graph.add_node(());
        for endpoint in &net.endpoints {
            let item = match endpoint {
                EndpointRef::Pin { part, .. } => *part,
                EndpointRef::SheetPin { symbol, .. } => n_parts + symbol,
                EndpointRef::Port { .. } => continue,
            };
            graph.update_edge(items[item], hub, 1);
        }
    }

    let source = graph.add_node(());
    let mut seeds: Vec<usize> = sheet
        .parts
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            let has = |t: ElectricalType| p.pins.iter().any(|pin| pin.electrical_type == t);
            has(ElectricalType::Input) && !has(ElectricalType::Output)
        })
        .map(|(i, _)| i)
        .collect();
    if seeds.is_empty() && n_items > 0 {
        seeds.push(0);
    }
    for seed in seeds {
        graph.add_edge(source, items[seed], 0);
    }

    let distances = dijkstra(&graph, source, None, |e| *e.weight());
    let columns: Vec<Option<usize>> = items
        .iter()
        .map(|n| distances.get(n).map(|d| *d as usize / 2))
        .collect();
    let middle = columns.iter().flatten().max().copied().unwrap_or(0) / 2;
    columns.into_iter().map(|c| c.unwrap_or(middle)).collect()
}

/// Flow items paired with their column, sorted by column, then parts
/// before sheet symbols, then reference prefix, then declaration order.
fn flow_order(sheet: &Sheet, items: &[Item]) -> Vec<(usize, Item)> {
    let columns = signal_columns(sheet);
    let n_parts = sheet.parts.len();
    let mut keyed: Vec<(usize, bool, &str, usize, Item)> = items
        .iter()
        .enumerate()
        .map(|(order, &item)| match item {
            Item::Part(i) => (columns[i], false, reference_prefix(&sheet.parts[i].reference), order, item),
            Item::Symbol(i) => (columns[n_parts + i], true, "", order, item),
        })
        .collect();
    keyed.sort_by(|a, b| (a.0, a.1, a.2, a.3).cmp(&(b.0, b.1, b.2, b.3)));
    keyed.into_iter().map(|(column, .., item)| (column, item)).collect()
}

fn group_of(sheet: &Sheet, item: Item) -> &str {
    match item {
        Item::Part(i) => reference_prefix(&sheet.parts[i].reference),
        Item::Symbol(_) => "",
    }
}

/// Stack items top to bottom per column, wrapping to a fresh column when
/// the interior runs out of height. A change of group within a column
/// leaves an extra row gap.
fn flow(sheet: &Sheet, items: &[(usize, Item)], interior: Rect, options: &GenerationOptions) -> Option<Plan> {
    let grid = sheet.grid;
    let mut plan = Plan {
        parts: Vec::new(),
        symbols: Vec::new(),
        ports: Vec::new(),
    };
    let mut x = interior.min.x;
    let mut y = interior.min.y;
    let mut width = 0;
    let mut last: Option<(usize, &str)> = None;

    for &(column, item) in items {
        let local = match item {
            Item::Part(i) => sheet.parts[i].symbol_bounds,
            Item::Symbol(i) => sheet.sheet_symbols[i].local_bounds(),
        };
        let group = group_of(sheet, item);
        match last {
            Some((c, _)) if c != column => {
                x += width + options.gap_x;
                y = interior.min.y;
                width = 0;
            }
            Some((_, g)) if g != group => y += options.gap_y,
            _ => {}
        }
        if y > interior.min.y && y + local.height() > interior.max.y {
            x += width + options.gap_x;
            y = interior.min.y;
            width = 0;
        }

        let origin = Point::new(
            snap_up(x - local.min.x, grid),
            snap_up(y - local.min.y, grid),
        );
        let bbox = local.translate(origin);
        if !interior.contains_rect(&bbox) {
            return None;
        }
        match item {
            Item::Part(i) => plan.parts.push((i, origin, Rotation::R0)),
            Item::Symbol(i) => plan.symbols.push((i, origin)),
        }
        y = bbox.max.y + options.gap_y;
        width = width.max(bbox.max.x - x);
        last = Some((column, group));
    }
    Some(plan)
}

fn place_ports(sheet: &Sheet, bounds: Rect, interior: Rect) -> Option<Vec<(usize, Point)>> {
    let grid = sheet.grid;
    let n = sheet.ports.len();
    let left = (n + 1) / 2;
    let top = snap_up(interior.min.y, grid);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let (x, row) = if i < left {
            (snap_up(bounds.min.x + PORT_INSET, grid), i)
        } else {
            (floor_to(bounds.max.x - PORT_INSET, grid), i - left)
        };
        let y = top + row as Coord * PORT_SPACING;
        if y > bounds.max.y - BORDER - CONNECTOR_BAND {
            return None;
        }
        out.push((i, Point::new(x, y)));
    }
    Some(out)
}

fn try_layout(
    sheet: &Sheet,
    bounds: Rect,
    items: &[(usize, Item)],
    connectors: &[usize],
    options: &GenerationOptions,
) -> Option<Plan> {
    let interior = Rect::new(
        bounds.min.x + INTERIOR_INSET,
        bounds.min.y + INTERIOR_INSET,
        bounds.max.x - INTERIOR_INSET,
        bounds.max.y - INTERIOR_INSET,
    );
    if interior.width() <= 0 || interior.height() <= 0 {
        return None;
    }
    let mut plan = flow(sheet, items, interior, options)?;
    plan.parts
        .extend(place_connectors(sheet, connectors, bounds, sheet.grid)?);
    plan.ports = place_ports(sheet, bounds, interior)?;
    Some(plan)
}

fn paper_bounds(size: (Coord, Coord), grid: Coord) -> Rect {
    Rect::new(0, 0, floor_to(size.0, grid), floor_to(size.1, grid))
}

/// Place every part, sheet symbol and port of `sheet`.
pub fn place_sheet(sheet: &mut Sheet, options: &GenerationOptions) {
    let grid = sheet.grid;
    size_sheet_symbols(sheet);

    let mut connectors = Vec::new();
    let mut items = Vec::new();
    for (i, part) in sheet.parts.iter().enumerate() {
        if is_connector(&part.reference, options) {
            connectors.push(i);
        } else {
            items.push(Item::Part(i));
        }
    }
    items.extend((0..sheet.sheet_symbols.len()).map(Item::Symbol));
    let items = flow_order(sheet, &items);

    let mut paper = options.paper;
    let mut bounds = paper_bounds(paper.size(), grid);
    let plan = loop {
        if let Some(plan) = try_layout(sheet, bounds, &items, &connectors, options) {
            break plan;
        }
        match paper.next() {
            Some(next) => {
                paper = next;
                bounds = paper_bounds(paper.size(), grid);
            }
            None => {
                // Past A0: keep the paper label and grow the drawing area.
                let widest = items
                    .iter()
                    .map(|(_, item)| match item {
                        Item::Part(i) => sheet.parts[*i].symbol_bounds.width(),
                        Item::Symbol(i) => sheet.sheet_symbols[*i].width,
                    })
                    .max()
                    .unwrap_or(0);
                let width = bounds.width().max(widest + 2 * INTERIOR_INSET + grid);
                let height = bounds.height() + bounds.height() / 2;
                bounds = paper_bounds((width, height), grid);
            }
        }
    };

    debug!(
        "Placed {} on {:?} ({} x {} um): {} parts, {} sheet symbols, {} ports",
        sheet.path,
        paper,
        bounds.width(),
        bounds.height(),
        plan.parts.len(),
        plan.symbols.len(),
        plan.ports.len()
    );

    sheet.paper = paper;
    sheet.bounds = bounds;
    for (i, position, rotation) in plan.parts {
        sheet.parts[i].position = position;
        sheet.parts[i].rotation = rotation;
    }
    for (i, position) in plan.symbols {
        sheet.sheet_symbols[i].position = position;
    }
    for (i, position) in plan.ports {
        sheet.ports[i].position = position;
    }

    let markers: Vec<Option<Point>> = sheet
        .no_connects
        .iter()
        .map(|m| {
            sheet
                .parts
                .iter()
                .find(|p| p.part == m.pin.part)
                .and_then(|p| p.pin_position(&m.pin.number))
        })
        .collect();
    for (marker, position) in sheet.no_connects.iter_mut().zip(markers) {
        if let Some(position) = position {
            marker.position = position;
        }
    }
}
