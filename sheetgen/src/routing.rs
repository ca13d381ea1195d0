//! Manhattan router.
//!
//! Each net is routed greedily: endpoints are joined in Prim order and every
//! pair is searched with A* over the sheet lattice. Symbol boxes, other
//! nets' wires and other nets' endpoints are obstacles. A failed search is
//! reported and left for the verifier to repair.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, warn};

use crate::circuit::NetId;
use crate::core::{Degradation, GenerationOptions};
use crate::geometry::{dog_leg, is_orthogonal, simplify_path, snap, Coord, Point, Rect, Side};
use crate::sheet::{EndpointRef, Sheet, WireOrigin};

/// Lattice cell in grid steps from the sheet origin.
pub type Cell = (Coord, Coord);

/// Order in which to join endpoints: each pair is (connected, new).
///
/// Starts at the first endpoint and repeatedly adds the endpoint nearest to
/// the connected set. Ties resolve to the lowest indices.
pub fn spanning_order(points: &[Point]) -> Vec<(usize, usize)> {
    let n = points.len();
    let mut connected = vec![false; n];
    let mut pairs = Vec::with_capacity(n.saturating_sub(1));
    if n == 0 {
        return pairs;
    }
    connected[0] = true;
    for _ in 1..n {
        let mut best: Option<(Coord, usize, usize)> = None;
        for i in (0..n).filter(|&i| !connected[i]) {
            for j in (0..n).filter(|&j| connected[j]) {
                let key = (points[i].manhattan(points[j]), i, j);
                if best.map_or(true, |b| key < b) {
                    best = Some(key);
                }
            }
        }
        if let Some((_, i, j)) = best {
            connected[i] = true;
            pairs.push((j, i));
        }
    }
    pairs
}

/// Occupancy of the routing lattice for one sheet.
pub struct Lattice {
    origin: Point,
    grid: Coord,
    cols: Coord,
    rows: Coord,
    blocked: HashSet<Cell>,
    wires: HashMap<Cell, NetId>,
    /// `None` marks a no-connect pin, which blocks every net
    endpoints: HashMap<Cell, Option<NetId>>,
}

impl Lattice {
    pub fn new(bounds: Rect, grid: Coord) -> Self {
        Self {
            origin: bounds.min,
            grid,
            cols: bounds.width() / grid,
            rows: bounds.height() / grid,
            blocked: HashSet::new(),
            wires: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }

    /// Lattice built from a placed sheet's symbols and endpoints.
    pub fn for_sheet(sheet: &Sheet) -> Self {
        let mut lattice = Self::new(sheet.bounds, sheet.grid);
        for rect in sheet.obstacles() {
            lattice.block_rect(rect.expand(sheet.grid / 2));
        }
        for net in &sheet.nets {
            for p in sheet.endpoint_positions(net) {
                lattice.endpoints.entry(lattice.cell(p)).or_insert(Some(net.net));
            }
        }
        for marker in &sheet.no_connects {
            lattice.endpoints.insert(lattice.cell(marker.position), None);
        }
        lattice
    }

    pub fn cell(&self, p: Point) -> Cell {
        (
            snap(p.x - self.origin.x, self.grid) / self.grid,
            snap(p.y - self.origin.y, self.grid) / self.grid,
        )
    }

    pub fn point(&self, c: Cell) -> Point {
        Point::new(self.origin.x + c.0 * self.grid, self.origin.y + c.1 * self.grid)
    }

    fn in_bounds(&self, c: Cell) -> bool {
        c.0 >= 0 && c.1 >= 0 && c.0 <= self.cols && c.1 <= self.rows
    }

    fn block_rect(&mut self, r: Rect) {
        let g = self.grid;
        let x0 = (r.min.x - self.origin.x).div_euclid(g) + i64::from((r.min.x - self.origin.x).rem_euclid(g) != 0);
        let y0 = (r.min.y - self.origin.y).div_euclid(g) + i64::from((r.min.y - self.origin.y).rem_euclid(g) != 0);
        let x1 = (r.max.x - self.origin.x).div_euclid(g);
        let y1 = (r.max.y - self.origin.y).div_euclid(g);
        for x in x0.max(0)..=x1.min(self.cols) {
            for y in y0.max(0)..=y1.min(self.rows) {
                self.blocked.insert((x, y));
            }
        }
    }

    /// True when `net` may not enter `c`.
    pub fn is_blocked(&self, c: Cell, net: NetId) -> bool {
        if !self.in_bounds(c) || self.blocked.contains(&c) {
            return true;
        }
        if matches!(self.wires.get(&c), Some(other) if *other != net) {
            return true;
        }
        match self.endpoints.get(&c) {
            Some(Some(owner)) => *owner != net,
            Some(None) => true,
            None => false,
        }
    }

    fn near_foreign_wire(&self, c: Cell, net: NetId) -> bool {
        Side::ALL.iter().any(|s| {
            let u = s.unit();
            matches!(self.wires.get(&(c.0 + u.x, c.1 + u.y)), Some(other) if *other != net)
        })
    }

    /// Record every lattice point covered by an orthogonal polyline.
    pub fn mark_wire(&mut self, points: &[Point], net: NetId) {
        for w in points.windows(2) {
            let a = self.cell(w[0]);
            let b = self.cell(w[1]);
            let dx = (b.0 - a.0).signum();
            let dy = (b.1 - a.1).signum();
            let mut c = a;
            loop {
                self.wires.entry(c).or_insert(net);
                if c == b || (dx != 0 && dy != 0) {
                    break;
                }
                c = (c.0 + dx, c.1 + dy);
            }
            self.wires.entry(b).or_insert(net);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct State {
    cell: Cell,
    /// Index into `Side::ALL`; 4 before the first move
    dir: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    est: Coord,
    cost: Coord,
    state: State,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .est
            .cmp(&self.est)
            .then_with(|| self.cost.cmp(&other.cost))
            .then_with(|| other.state.cell.1.cmp(&self.state.cell.1))
            .then_with(|| other.state.cell.0.cmp(&self.state.cell.0))
            .then_with(|| other.state.dir.cmp(&self.state.dir))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Penalties and budget for a single search.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub turn_penalty: Coord,
    pub proximity_penalty: Coord,
    pub max_expansions: usize,
}

impl From<&GenerationOptions> for SearchParams {
    fn from(o: &GenerationOptions) -> Self {
        Self {
            turn_penalty: o.turn_penalty,
            proximity_penalty: o.proximity_penalty,
            max_expansions: o.max_expansions,
        }
    }
}

/// A* from `start` to `goal` for `net`. Returns lattice cells, start first.
pub fn find_path(lattice: &Lattice, start: Cell, goal: Cell, net: NetId, params: SearchParams) -> Option<Vec<Cell>> {
    if params.max_expansions == 0 {
        return None;
    }
    let h = |c: Cell| (c.0 - goal.0).abs() + (c.1 - goal.1).abs();
    let origin = State { cell: start, dir: 4 };

    let mut open = BinaryHeap::new();
    let mut best: HashMap<State, Coord> = HashMap::new();
    let mut came_from: HashMap<State, State> = HashMap::new();
    best.insert(origin, 0);
    open.push(Entry {
        est: h(start),
        cost: 0,
        state: origin,
    });

    let mut expansions = 0;
    while let Some(Entry { cost, state, .. }) = open.pop() {
        if best.get(&state).is_some_and(|&g| cost > g) {
            continue;
        }
        if state.cell == goal {
            let mut cells = vec![state.cell];
            let mut cur = state;
            while let Some(prev) = came_from.get(&cur) {
                cells.push(prev.cell);
                cur = *prev;
            }
            cells.reverse();
            return Some(cells);
        }
        expansions += 1;
        if expansions > params.max_expansions {
            return None;
        }

        for (d, side) in Side::ALL.iter().enumerate() {
            let u = side.unit();
            let next = (state.cell.0 + u.x, state.cell.1 + u.y);
            if next != goal && lattice.is_blocked(next, net) {
                continue;
            }
            let d = d as u8;
            let mut step = 1;
            if state.dir != 4 && state.dir != d {
                step += params.turn_penalty;
            }
            if lattice.near_foreign_wire(next, net) {
                step += params.proximity_penalty;
            }
            let ns = State { cell: next, dir: d };
            let ng = cost + step;
            if best.get(&ns).map_or(true, |&g| ng < g) {
                best.insert(ns, ng);
                came_from.insert(ns, state);
                open.push(Entry {
                    est: ng + h(next),
                    cost: ng,
                    state: ns,
                });
            }
        }
    }
    None
}

/// Turn a cell path into a wire polyline between the exact endpoints.
fn to_polyline(lattice: &Lattice, from: Point, to: Point, cells: &[Cell]) -> Vec<Point> {
    let mut raw = vec![from];
    raw.extend(cells.iter().map(|c| lattice.point(*c)));
    raw.push(to);

    let mut out: Vec<Point> = Vec::with_capacity(raw.len());
    for p in raw {
        match out.last().copied() {
            Some(last) if !last.is_aligned_with(p) => out.extend(dog_leg(last, p).into_iter().skip(1)),
            _ => out.push(p),
        }
    }
    simplify_path(&out)
}

/// Route every multi-endpoint net of a placed sheet, then add label stubs.
pub fn route_sheet(sheet: &mut Sheet, options: &GenerationOptions, report: &mut Vec<Degradation>) {
    let params = SearchParams::from(options);
    let mut lattice = Lattice::for_sheet(sheet);
    let mut routed = 0;
    let mut failed = 0;

    let nets: Vec<(NetId, String, Vec<Point>)> = sheet
        .nets
        .iter()
        .map(|n| (n.net, n.name.clone(), sheet.endpoint_positions(n)))
        .collect();

    for (net, name, points) in &nets {
        if points.len() < 2 {
            continue;
        }
        for (j, i) in spanning_order(points) {
            let (from, to) = (points[j], points[i]);
            if from == to {
                continue;
            }
            let cells = find_path(&lattice, lattice.cell(from), lattice.cell(to), *net, params);
            match cells {
                Some(cells) => {
                    let poly = to_polyline(&lattice, from, to, &cells);
                    debug_assert!(is_orthogonal(&poly));
                    lattice.mark_wire(&poly, *net);
                    sheet.push_wire(*net, poly, WireOrigin::Routed);
                    routed += 1;
                }
                None => {
                    failed += 1;
                    debug!("No route for {} on {} from {} to {}", name, sheet.path, from, to);
                    report.push(Degradation::UnroutedPair {
                        sheet: sheet.path.clone(),
                        net: name.clone(),
                        from,
                        to,
                    });
                }
            }
        }
    }

    add_label_stubs(sheet, &mut lattice, options.label_stub_length);

    if failed > 0 {
        warn!("{}: {} of {} connections left to the verifier", sheet.path, failed, routed + failed);
    } else {
        debug!("{}: routed {} connections", sheet.path, routed);
    }
}

/// Give each explicitly named net with a single pin on this sheet a short
/// lead for its net label. A pin boxed in on every side gets none and its
/// label sits on the pin.
fn add_label_stubs(sheet: &mut Sheet, lattice: &mut Lattice, length: Coord) {
    let grid = sheet.grid;
    let steps = (length / grid).max(1);
    let mut stubs = Vec::new();

    for net in sheet.nets.iter().filter(|n| n.explicit_name && n.endpoints.len() == 1) {
        let EndpointRef::Pin { part, .. } = &net.endpoints[0] else {
            continue;
        };
        let Some(pin) = sheet.endpoint_position(&net.endpoints[0]) else {
            continue;
        };
        let outward = Side::of_offset(pin - sheet.parts[*part].bbox().center());
        let start = lattice.cell(pin);
        let free = |side: Side| {
            let u = side.unit();
            (1..=steps).all(|k| !lattice.is_blocked((start.0 + u.x * k, start.1 + u.y * k), net.net))
        };
        let Some(side) = std::iter::once(outward).chain(Side::ALL).find(|s| free(*s)) else {
            debug!("{}: no room for a label lead on {}", sheet.path, net.name);
            continue;
        };
        let u = side.unit();
        let end = Point::new(pin.x + u.x * steps * grid, pin.y + u.y * steps * grid);
        stubs.push((net.net, vec![pin, end]));
    }

    for (net, points) in stubs {
        lattice.mark_wire(&points, net);
        sheet.push_wire(net, points, WireOrigin::LabelStub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(budget: usize) -> SearchParams {
        SearchParams {
            turn_penalty: 2,
            proximity_penalty: 1,
            max_expansions: budget,
        }
    }

    #[test]
    fn spanning_order_joins_nearest_first() {
        let pts = [Point::new(0, 0), Point::new(100, 0), Point::new(10, 0)];
        assert_eq!(spanning_order(&pts), vec![(0, 2), (2, 1)]);
        assert!(spanning_order(&pts[..1]).is_empty());
    }

    #[test]
    fn straight_path_on_open_lattice() {
        let lattice = Lattice::new(Rect::new(0, 0, 12_700, 12_700), 1270);
        let path = find_path(&lattice, (1, 1), (6, 1), NetId(0), params(1000)).unwrap();
        assert_eq!(path.len(), 6);
        assert!(path.iter().all(|c| c.1 == 1));
    }

    #[test]
    fn path_goes_around_obstacles() {
        let mut lattice = Lattice::new(Rect::new(0, 0, 25_400, 25_400), 1270);
        lattice.block_rect(Rect::new(5_080, 0, 7_620, 17_780));
        let path = find_path(&lattice, (1, 2), (10, 2), NetId(0), params(10_000)).unwrap();
        assert!(path.iter().all(|c| !lattice.is_blocked(*c, NetId(0))));
        assert!(path.iter().any(|c| c.1 > 14), "must detour below the wall");
    }

    #[test]
    fn foreign_wires_block_and_own_wires_do_not() {
        let mut lattice = Lattice::new(Rect::new(0, 0, 12_700, 12_700), 1270);
        lattice.mark_wire(&[Point::new(0, 6_350), Point::new(12_700, 6_350)], NetId(1));
        assert!(lattice.is_blocked((3, 5), NetId(0)));
        assert!(!lattice.is_blocked((3, 5), NetId(1)));
        assert!(find_path(&lattice, (3, 1), (3, 9), NetId(0), params(10_000)).is_none());
    }

    #[test]
    fn boxed_in_pin_gets_no_label_lead() {
        use crate::circuit::CircuitBuilder;
        use crate::hierarchy::build_sheets;
        use crate::library::BuiltinLibrary;

        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("lead", &lib);
        let a = b.net("A");
        let r = b.add_part("Device", "R").unwrap();
        b.connect(a, r, "1").unwrap();
        let c = b.finish().unwrap();
        let mut sheet = build_sheets(&c, 1270).unwrap().remove(0);
        sheet.bounds = Rect::new(0, 0, 25_400, 25_400);
        sheet.parts[0].position = Point::new(12_700, 12_700);

        // Pin 1 sits at (12700, 8890); the body blocks downward
        let mut lattice = Lattice::for_sheet(&sheet);
        for p in [Point::new(12_700, 7_620), Point::new(11_430, 8_890), Point::new(13_970, 8_890)] {
            lattice.mark_wire(&[p, p], NetId(9));
        }
        add_label_stubs(&mut sheet, &mut lattice, 5_080);
        assert!(sheet.wires.is_empty());

        let mut open = Lattice::for_sheet(&sheet);
        add_label_stubs(&mut sheet, &mut open, 5_080);
        assert_eq!(sheet.wires.len(), 1);
        assert_eq!(sheet.wires[0].points, vec![Point::new(12_700, 8_890), Point::new(12_700, 3_810)]);
    }

    #[test]
    fn zero_budget_routes_nothing() {
        let lattice = Lattice::new(Rect::new(0, 0, 12_700, 12_700), 1270);
        assert!(find_path(&lattice, (1, 1), (2, 1), NetId(0), params(0)).is_none());
    }

    #[test]
    fn search_is_deterministic() {
        let lattice = Lattice::new(Rect::new(0, 0, 25_400, 25_400), 1270);
        let a = find_path(&lattice, (1, 1), (15, 12), NetId(0), params(10_000));
        let b = find_path(&lattice, (1, 1), (15, 12), NetId(0), params(10_000));
        assert_eq!(a, b);
        let cells = a.unwrap();
        let poly = to_polyline(&lattice, lattice.point(cells[0]), lattice.point(cells[cells.len() - 1]), &cells);
        assert!(is_orthogonal(&poly));
        assert_eq!(poly.len(), 3, "one bend with a turn penalty");
    }
}
