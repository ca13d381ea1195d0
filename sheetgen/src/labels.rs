//! Label placement.
//!
//! Every text item tries candidate boxes right, above, left and below its
//! anchor at growing distances and takes the first one that stays on the
//! sheet and clears all symbols and already placed labels.

use tracing::warn;

use crate::circuit::NetId;
use crate::core::{Degradation, GenerationOptions};
use crate::geometry::{Coord, Rect, Side};
use crate::sheet::{Label, LabelKind, Sheet, WireOrigin};

/// Width of one character of label text.
pub const CHAR_WIDTH: Coord = 1_016;
pub const TEXT_HEIGHT: Coord = 1_778;
const TEXT_PAD: Coord = 508;

pub fn text_size(text: &str) -> (Coord, Coord) {
    (text.chars().count() as Coord * CHAR_WIDTH + TEXT_PAD, TEXT_HEIGHT)
}

const CANDIDATE_SIDES: [Side; 4] = [Side::Right, Side::Up, Side::Left, Side::Down];

/// Text box for `size` placed on `side` of `anchor` at distance `d`.
fn candidate(anchor: Rect, side: Side, d: Coord, size: (Coord, Coord)) -> Rect {
    let (w, h) = size;
    let c = anchor.center();
    match side {
        Side::Right => Rect::new(anchor.max.x + d, c.y - h / 2, anchor.max.x + d + w, c.y - h / 2 + h),
        Side::Left => Rect::new(anchor.min.x - d - w, c.y - h / 2, anchor.min.x - d, c.y - h / 2 + h),
        Side::Up => Rect::new(c.x - w / 2, anchor.min.y - d - h, c.x - w / 2 + w, anchor.min.y - d),
        Side::Down => Rect::new(c.x - w / 2, anchor.max.y + d, c.x - w / 2 + w, anchor.max.y + d + h),
    }
}

struct Request {
    kind: LabelKind,
    text: String,
    net: Option<NetId>,
    anchor: Rect,
}

struct Placer<'a> {
    bounds: Rect,
    grid: Coord,
    attempts: usize,
    obstacles: &'a [Rect],
    placed: Vec<Label>,
}

impl Placer<'_> {
    fn is_free(&self, r: &Rect) -> bool {
        self.bounds.contains_rect(r)
            && !self.obstacles.iter().any(|o| o.intersects(r))
            && !self.placed.iter().any(|l| l.bbox.intersects(r))
    }

    /// Returns false when the label had to be placed overlapping.
    fn place(&mut self, req: Request) -> bool {
        let size = text_size(&req.text);
        let mut chosen = None;
        let mut last = req.anchor;
        'rings: for ring in 1..=self.attempts.max(1) {
            let d = ring as Coord * self.grid;
            for side in CANDIDATE_SIDES {
                let r = candidate(req.anchor, side, d, size);
                last = r;
                if self.is_free(&r) {
                    chosen = Some(r);
                    break 'rings;
                }
            }
        }
        let overlapping = chosen.is_none();
        self.placed.push(Label {
            kind: req.kind,
            text: req.text,
            net: req.net,
            anchor: req.anchor.center(),
            bbox: chosen.unwrap_or(last),
            overlapping,
        });
        !overlapping
    }
}

fn requests(sheet: &Sheet) -> Vec<Request> {
    let mut out = Vec::new();
    for part in &sheet.parts {
        let bbox = part.bbox();
        // `#` references (power flags) stay hidden
        if !part.reference.starts_with('#') {
            out.push(Request {
                kind: LabelKind::Reference,
                text: part.reference.clone(),
                net: None,
                anchor: bbox,
            });
        }
        out.push(Request {
            kind: LabelKind::Value,
            text: part.value.clone().unwrap_or_else(|| part.symbol.clone()),
            net: None,
            anchor: bbox,
        });
    }
    for symbol in &sheet.sheet_symbols {
        out.push(Request {
            kind: LabelKind::SheetName,
            text: symbol.name.clone(),
            net: None,
            anchor: symbol.bbox(),
        });
    }
    for port in &sheet.ports {
        out.push(Request {
            kind: LabelKind::Hierarchical,
            text: port.name.clone(),
            net: Some(port.net),
            anchor: Rect::from_point(port.position),
        });
    }
    for symbol in &sheet.sheet_symbols {
        for (i, pin) in symbol.pins.iter().enumerate() {
            if let Some(p) = symbol.pin_position(i) {
                out.push(Request {
                    kind: LabelKind::SheetPin,
                    text: pin.name.clone(),
                    net: Some(pin.net),
                    anchor: Rect::from_point(p),
                });
            }
        }
    }
    for net in sheet.nets.iter().filter(|n| n.explicit_name) {
        let stub_end = sheet
            .wires_of(net.net)
            .find(|w| w.origin == WireOrigin::LabelStub)
            .and_then(|w| w.points.last().copied());
        let first_point = sheet.wires_of(net.net).next().and_then(|w| w.points.first().copied());
        let pin = || sheet.endpoint_positions(net).first().copied();
        if let Some(anchor) = stub_end.or(first_point).or_else(pin) {
            out.push(Request {
                kind: LabelKind::Net,
                text: net.name.clone(),
                net: Some(net.net),
                anchor: Rect::from_point(anchor),
            });
        }
    }
    out
}

/// Place every label on `sheet`.
///
/// Net labels already on the sheet (the verifier's label ties) keep their
/// anchors and get text boxes after everything else.
pub fn place_labels(sheet: &mut Sheet, options: &GenerationOptions, report: &mut Vec<Degradation>) {
    let ties: Vec<Request> = std::mem::take(&mut sheet.labels)
        .into_iter()
        .map(|l| Request {
            kind: l.kind,
            text: l.text,
            net: l.net,
            anchor: Rect::from_point(l.anchor),
        })
        .collect();
    let obstacles = sheet.obstacles();
    let mut placer = Placer {
        bounds: sheet.bounds,
        grid: sheet.grid,
        attempts: options.label_attempts,
        obstacles: &obstacles,
        placed: Vec::new(),
    };
    for req in requests(sheet).into_iter().chain(ties) {
        let text = req.text.clone();
        if !placer.place(req) {
            warn!("{}: no free spot for label {}", sheet.path, text);
            report.push(Degradation::LabelOverlap {
                sheet: sheet.path.clone(),
                text,
            });
        }
    }
    sheet.labels = placer.placed;
}

/// Pairs of label indices whose boxes overlap.
pub fn overlapping_pairs(labels: &[Label]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for i in 0..labels.len() {
        for j in i + 1..labels.len() {
            if labels[i].bbox.intersects(&labels[j].bbox) {
                out.push((i, j));
            }
        }
    }
    out
}
