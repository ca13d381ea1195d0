//! Hierarchy manager.
//!
//! Turns the flat circuit plus its invocation records into an arena of
//! sheets, assigns reference designators and derives the ports and sheet
//! pins that carry nets across sheet boundaries. Geometry is left at the
//! origin; placement fills it in. Undriven supply rails can be given a
//! power flag here as well.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use crate::circuit::{Circuit, NetId, PartId};
use crate::core::SheetGenError;
use crate::geometry::{Point, Rect, Rotation};
use crate::library::{is_rail_name, BuiltinLibrary, ElectricalType, SymbolDef, SymbolLibrary};
use crate::sheet::*;

/// Assign a unique reference designator to every part, indexed by part id.
///
/// Explicit references are reserved first and must be unique. The rest are
/// numbered per prefix in declaration order, skipping reserved names.
pub fn assign_references(circuit: &Circuit) -> Result<Vec<String>, SheetGenError> {
    let mut reserved: HashSet<&str> = HashSet::new();
    for part in &circuit.parts {
        if let Some(r) = part.reference.as_deref() {
            if !reserved.insert(r) {
                return Err(SheetGenError::NamingConflict {
                    reference: r.to_string(),
                });
            }
        }
    }

    let mut counters: HashMap<&str, u32> = HashMap::new();
    let mut refs = Vec::with_capacity(circuit.parts.len());
    for part in &circuit.parts {
        if let Some(r) = &part.reference {
            refs.push(r.clone());
            continue;
        }
        let prefix = part.prefix();
        let counter = counters.entry(prefix).or_insert(0);
        let reference = loop {
            *counter += 1;
            let candidate = format!("{}{}", prefix, counter);
            if !reserved.contains(candidate.as_str()) {
                break candidate;
            }
        };
        refs.push(reference);
    }
    Ok(refs)
}

/// Ancestor chain of a sheet, root first, `sheet` last.
fn lineage(parents: &[Option<SheetId>], sheet: SheetId) -> Vec<SheetId> {
    let mut chain = vec![sheet];
    let mut cur = parents[sheet.0];
    while let Some(p) = cur {
        chain.push(p);
        cur = parents[p.0];
    }
    chain.reverse();
    chain
}

fn common_ancestor(parents: &[Option<SheetId>], sheets: impl IntoIterator<Item = SheetId>) -> SheetId {
    let mut common: Option<Vec<SheetId>> = None;
    for s in sheets {
        let chain = lineage(parents, s);
        common = Some(match common {
            None => chain,
            Some(prev) => prev
                .iter()
                .zip(chain.iter())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| *a)
                .collect(),
        });
    }
    common
        .and_then(|c| c.last().copied())
        .unwrap_or(SheetId::ROOT)
}

fn port_direction(types: &[ElectricalType]) -> PortDirection {
    use ElectricalType::*;
    if types.is_empty() {
        PortDirection::Bidirectional
    } else if types.iter().all(|t| matches!(t, Input | PowerIn)) {
        PortDirection::Input
    } else if types.iter().all(|t| t.is_driver()) {
        PortDirection::Output
    } else {
        PortDirection::Bidirectional
    }
}

/// Build the sheet arena for `circuit`. Sheet `k + 1` belongs to invocation `k`.
pub fn build_sheets(circuit: &Circuit, grid: i64) -> Result<Vec<Sheet>, SheetGenError> {
    let references = assign_references(circuit)?;
    let sheet_of = |inv: Option<crate::circuit::InvocationId>| {
        inv.map(|i| SheetId(i.0 + 1)).unwrap_or(SheetId::ROOT)
    };

    let root_ns = crate::sheet::stable_uuid(&Uuid::NAMESPACE_URL, &format!("sheetgen:{}", circuit.name));

    // Sheet skeletons
    let mut parents: Vec<Option<SheetId>> = vec![None];
    let mut sheets = vec![empty_sheet(SheetId::ROOT, None, &circuit.name, "/", &root_ns, grid)];
    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    for inv in &circuit.invocations {
        let id = SheetId(inv.id.0 + 1);
        let parent = sheet_of(inv.parent);
        let k = name_counts.entry(inv.name.as_str()).or_insert(0);
        *k += 1;
        let name = format!("{}_{}", inv.name, k);
        let path = if parent == SheetId::ROOT {
            format!("/{}", name)
        } else {
            format!("{}/{}", sheets[parent.0].path, name)
        };
        let mut sheet = empty_sheet(id, Some(parent), &name, &path, &root_ns, grid);
        sheet.invocation = Some(inv.id);
        sheets.push(sheet);
        parents.push(Some(parent));
        sheets[parent.0].children.push(id);
    }

    // Parts
    let mut part_slot: HashMap<PartId, (SheetId, usize)> = HashMap::new();
    for (part, reference) in circuit.parts.iter().zip(references) {
        let sheet = &mut sheets[sheet_of(part.invocation).0];
        part_slot.insert(part.id, (sheet.id, sheet.parts.len()));
        let uuid = crate::sheet::stable_uuid(&sheet.uuid, &format!("part/{}", reference));
        sheet.parts.push(PlacedPart {
            part: part.id,
            reference,
            lib: part.symbol.lib.clone(),
            symbol: part.symbol.name.clone(),
            value: part.value.clone(),
            fields: part.fields.clone(),
            symbol_bounds: part.symbol.bounds(),
            pins: placed_pins(&part.symbol),
            position: Point::new(0, 0),
            rotation: Rotation::R0,
            uuid,
        });
    }

    // Which sheets each net must appear on as a port
    let mut ports_needed: BTreeMap<SheetId, BTreeSet<NetId>> = BTreeMap::new();
    for net in circuit.nets.iter().filter(|n| !n.no_connect) {
        let mut uses: BTreeSet<SheetId> = net
            .pins
            .iter()
            .filter_map(|p| part_slot.get(&p.part).map(|(s, _)| *s))
            .collect();
        for inv in &circuit.invocations {
            if inv.args.iter().any(|a| a.net == net.id) {
                uses.insert(SheetId(inv.id.0 + 1));
            }
        }
        if uses.is_empty() {
            continue;
        }
        let owner = sheet_of(net.owner);
        let top = common_ancestor(&parents, uses.iter().copied().chain([owner]));
        if top != owner {
            debug!("Net {} promoted from {} to {}", net.name, sheets[owner.0].path, sheets[top.0].path);
        }
        for u in &uses {
            let mut cur = *u;
            while cur != top {
                ports_needed.entry(cur).or_default().insert(net.id);
                match parents[cur.0] {
                    Some(p) => cur = p,
                    None => break,
                }
            }
        }
    }

    // Ports: declared arguments first, then implicit ports in net order
    for (sheet_id, nets) in &ports_needed {
        let mut order: Vec<(String, NetId)> = Vec::new();
        if let Some(inv) = sheets[sheet_id.0].invocation.and_then(|i| circuit.invocation(i)) {
            for arg in &inv.args {
                if nets.contains(&arg.net) && !order.iter().any(|(_, n)| *n == arg.net) {
                    order.push((arg.parameter.clone(), arg.net));
                }
            }
        }
        for net in nets {
            if !order.iter().any(|(_, n)| n == net) {
                order.push((circuit.nets[net.0].name.clone(), *net));
            }
        }

        let subtree: HashSet<SheetId> = (0..sheets.len())
            .map(SheetId)
            .filter(|s| lineage(&parents, *s).contains(sheet_id))
            .collect();
        for (name, net) in order {
            let types: Vec<ElectricalType> = circuit.nets[net.0]
                .pins
                .iter()
                .filter(|p| {
                    part_slot
                        .get(&p.part)
                        .map(|(s, _)| subtree.contains(s))
                        .unwrap_or(false)
                })
                .filter_map(|p| circuit.pin_def(p).map(|d| d.electrical_type))
                .collect();
            sheets[sheet_id.0].ports.push(Port {
                name,
                net,
                direction: port_direction(&types),
                position: Point::new(0, 0),
            });
        }
    }

    // Sheet symbols on the parents, in child order
    for id in 1..sheets.len() {
        let child = &sheets[id];
        let Some(parent) = child.parent else {
            continue;
        };
        let symbol = SheetSymbol {
            child: child.id,
            name: child.name.clone(),
            position: Point::new(0, 0),
            width: 0,
            height: 0,
            pins: child
                .ports
                .iter()
                .map(|p| SheetPin {
                    name: p.name.clone(),
                    net: p.net,
                    direction: p.direction,
                    offset: Point::new(0, 0),
                })
                .collect(),
            uuid: crate::sheet::stable_uuid(&child.uuid, "symbol"),
        };
        sheets[parent.0].sheet_symbols.push(symbol);
    }

    // Per-sheet net views
    for sheet in sheets.iter_mut() {
        for net in circuit.nets.iter().filter(|n| !n.no_connect) {
            let mut endpoints = Vec::new();
            for pin in &net.pins {
                if let Some((s, idx)) = part_slot.get(&pin.part) {
                    if *s == sheet.id {
                        endpoints.push(EndpointRef::Pin {
                            part: *idx,
                            number: pin.number.clone(),
                        });
                    }
                }
            }
            for (i, port) in sheet.ports.iter().enumerate() {
                if port.net == net.id {
                    endpoints.push(EndpointRef::Port { port: i });
                }
            }
            for (si, symbol) in sheet.sheet_symbols.iter().enumerate() {
                for (pi, pin) in symbol.pins.iter().enumerate() {
                    if pin.net == net.id {
                        endpoints.push(EndpointRef::SheetPin { symbol: si, pin: pi });
                    }
                }
            }
            if !endpoints.is_empty() {
                sheet.nets.push(SheetNet {
                    net: net.id,
                    name: net.name.clone(),
                    explicit_name: net.explicit_name,
                    endpoints,
                });
            }
        }
    }

    // No-connect markers, positioned after placement
    for net in circuit.nets.iter().filter(|n| n.no_connect) {
        for pin in &net.pins {
            if let Some((s, _)) = part_slot.get(&pin.part) {
                sheets[s.0].no_connects.push(NoConnectMarker {
                    pin: pin.clone(),
                    position: Point::new(0, 0),
                });
            }
        }
    }

    debug!(
        "Hierarchy for {}: {} sheets, {} parts",
        circuit.name,
        sheets.len(),
        circuit.parts.len()
    );
    Ok(sheets)
}

fn placed_pins(symbol: &SymbolDef) -> Vec<PlacedPin> {
    symbol
        .pins
        .iter()
        .map(|p| PlacedPin {
            number: p.number.clone(),
            name: p.name.clone(),
            electrical_type: p.electrical_type,
            offset: p.offset,
        })
        .collect()
}

/// Reference prefix of generated power flags.
pub const POWER_FLAG_PREFIX: &str = "#FLG";

/// Give every supply or ground rail without a power output a `PWR_FLAG`.
///
/// The flag lands on the topmost sheet the net appears on and joins that
/// sheet's view of the net. Flags are numbered in net order, skipping
/// references already in use, and carry part ids past the end of the
/// circuit's part list. Returns the number of flags added.
pub fn inject_power_flags(circuit: &Circuit, sheets: &mut [Sheet]) -> Result<usize, SheetGenError> {
    let flag = BuiltinLibrary.lookup("power", "PWR_FLAG")?;
    let mut taken: HashSet<String> = sheets
        .iter()
        .flat_map(|s| s.parts.iter().map(|p| p.reference.clone()))
        .collect();
    let mut counter = 0;
    let mut added = 0;

    for net in circuit.nets.iter().filter(|n| !n.no_connect && is_rail_name(&n.name)) {
        let driven = net
            .pins
            .iter()
            .filter_map(|p| circuit.pin_def(p))
            .any(|d| d.electrical_type == ElectricalType::PowerOut);
        if driven || net.pins.is_empty() {
            continue;
        }
        // Parents come before their children in the arena
        let Some(sheet) = sheets.iter_mut().find(|s| s.net(net.id).is_some()) else {
            continue;
        };

        let reference = loop {
            counter += 1;
            let candidate = format!("{}{}", POWER_FLAG_PREFIX, counter);
            if taken.insert(candidate.clone()) {
                break candidate;
            }
        };
        let slot = sheet.parts.len();
        let uuid = crate::sheet::stable_uuid(&sheet.uuid, &format!("part/{}", reference));
        debug!("Power flag {} for {} on {}", reference, net.name, sheet.path);
        sheet.parts.push(PlacedPart {
            part: PartId(circuit.parts.len() + added),
            reference,
            lib: flag.lib.clone(),
            symbol: flag.name.clone(),
            value: Some(flag.name.clone()),
            fields: BTreeMap::new(),
            symbol_bounds: flag.bounds(),
            pins: placed_pins(&flag),
            position: Point::new(0, 0),
            rotation: Rotation::R0,
            uuid,
        });
        if let Some(view) = sheet.nets.iter_mut().find(|n| n.net == net.id) {
            view.endpoints.extend(flag.pins.iter().map(|p| EndpointRef::Pin {
                part: slot,
                number: p.number.clone(),
            }));
        }
        added += 1;
    }
    Ok(added)
}

fn empty_sheet(id: SheetId, parent: Option<SheetId>, name: &str, path: &str, ns: &Uuid, grid: i64) -> Sheet {
    Sheet {
        id,
        parent,
        children: Vec::new(),
        invocation: None,
        name: name.to_string(),
        path: path.to_string(),
        uuid: crate::sheet::stable_uuid(ns, path),
        paper: Paper::default(),
        bounds: Rect::new(0, 0, 0, 0),
        grid,
        parts: Vec::new(),
        sheet_symbols: Vec::new(),
        ports: Vec::new(),
        nets: Vec::new(),
        wires: Vec::new(),
        junctions: Vec::new(),
        labels: Vec::new(),
        no_connects: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::library::BuiltinLibrary;

    fn divider_twice() -> Circuit {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("top", &lib);
        let vin = b.net("VIN");
        let gnd = b.net("GND");
        for out in ["OUT_A", "OUT_B"] {
            let vout = b.net(out);
            b.subcircuit("divider", &[("vin", vin), ("vout", vout), ("gnd", gnd)], |b| {
                let r1 = b.add_part("Device", "R")?;
                let r2 = b.add_part("Device", "R")?;
                b.chain([vin.into(), r1.into(), vout.into(), r2.into(), gnd.into()])
            })
            .unwrap();
        }
        b.finish().unwrap()
    }

    #[test]
    fn references_are_disjoint_across_instances() {
        let c = divider_twice();
        assert_eq!(assign_references(&c).unwrap(), vec!["R1", "R2", "R3", "R4"]);
    }

    #[test]
    fn explicit_references_are_reserved() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        b.add_part("Device", "R").unwrap();
        b.add_part_with_ref("Device", "R", "R1").unwrap();
        b.add_part("Device", "R").unwrap();
        let c = b.finish().unwrap();
        assert_eq!(assign_references(&c).unwrap(), vec!["R2", "R1", "R3"]);
    }

    #[test]
    fn duplicate_explicit_reference_is_naming_conflict() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        b.add_part_with_ref("Device", "R", "R5").unwrap();
        b.add_part_with_ref("Device", "C", "R5").unwrap();
        let c = b.finish().unwrap();
        match assign_references(&c) {
            Err(SheetGenError::NamingConflict { reference }) => assert_eq!(reference, "R5"),
            other => panic!("expected naming conflict, got {:?}", other),
        }
    }

    #[test]
    fn subcircuit_instances_get_ports_and_sheet_pins() {
        let c = divider_twice();
        let sheets = build_sheets(&c, 1270).unwrap();
        assert_eq!(sheets.len(), 3);
        assert_eq!(sheets[1].name, "divider_1");
        assert_eq!(sheets[2].path, "/divider_2");
        assert_eq!(sheets[0].children, vec![SheetId(1), SheetId(2)]);

        for child in &sheets[1..] {
            let names: Vec<&str> = child.ports.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(names, vec!["vin", "vout", "gnd"]);
            assert_eq!(child.parts.len(), 2);
        }
        let sheet_pins: usize = sheets[0].sheet_symbols.iter().map(|s| s.pins.len()).sum();
        assert_eq!(sheet_pins, 6);

        // VIN on the root connects two sheet pins
        let vin = sheets[0].nets.iter().find(|n| n.name == "VIN").unwrap();
        assert_eq!(vin.endpoints.len(), 2);
    }

    #[test]
    fn undriven_rails_get_one_flag_on_the_owning_sheet() {
        let c = divider_twice();
        let mut sheets = build_sheets(&c, 1270).unwrap();
        let added = inject_power_flags(&c, &mut sheets).unwrap();
        assert_eq!(added, 2, "VIN and GND; OUT_A and OUT_B are signals");

        let flags: Vec<&PlacedPart> = sheets[0].parts.iter().filter(|p| p.symbol == "PWR_FLAG").collect();
        let refs: Vec<&str> = flags.iter().map(|p| p.reference.as_str()).collect();
        assert_eq!(refs, vec!["#FLG1", "#FLG2"]);
        assert!(sheets[1..].iter().all(|s| s.parts.len() == 2));

        let vin = sheets[0].nets.iter().find(|n| n.name == "VIN").unwrap();
        assert_eq!(vin.endpoints.len(), 3, "two sheet pins plus the flag");
        assert!(vin.endpoints.iter().any(|e| matches!(e, EndpointRef::Pin { part: 0, .. })));
    }

    #[test]
    fn driven_rail_gets_no_flag() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("reg", &lib);
        let vcc = b.net("VCC");
        let gnd = b.net("GND");
        let u = b.add_part("Regulator_Linear", "LM7805").unwrap();
        b.connect(vcc, u, "VO").unwrap();
        b.connect(gnd, u, "GND").unwrap();
        b.add_part_with_ref("Device", "R", "#FLG1").unwrap();
        let c = b.finish().unwrap();
        let mut sheets = build_sheets(&c, 1270).unwrap();

        assert_eq!(inject_power_flags(&c, &mut sheets).unwrap(), 1);
        let flag = sheets[0].parts.last().unwrap();
        assert_eq!(flag.reference, "#FLG2", "taken references are skipped");
        assert_eq!(flag.part, PartId(2));
        let gnd = sheets[0].nets.iter().find(|n| n.name == "GND").unwrap();
        assert_eq!(gnd.endpoints.len(), 2);
    }

    #[test]
    fn local_nets_stay_local() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("top", &lib);
        let vin = b.net("VIN");
        b.subcircuit("rc", &[("inp", vin)], |b| {
            let r = b.add_part("Device", "R")?;
            let cap = b.add_part("Device", "C")?;
            b.chain([vin.into(), r.into(), cap.into()])
        })
        .unwrap();
        let c = b.finish().unwrap();
        let sheets = build_sheets(&c, 1270).unwrap();
        assert_eq!(sheets[1].ports.len(), 1);
        assert!(sheets[0].nets.iter().all(|n| n.name == "VIN"));
    }

    #[test]
    fn inner_net_used_outside_is_promoted() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("top", &lib);
        let mut inner = None;
        b.subcircuit("src", &[], |b| {
            let u = b.add_part("Logic", "Buffer")?;
            let n = b.net("SIG");
            b.connect(n, u, "Y")?;
            inner = Some(n);
            Ok(())
        })
        .unwrap();
        let load = b.add_part("Logic", "Buffer").unwrap();
        b.connect(inner.unwrap(), load, "A").unwrap();
        let c = b.finish().unwrap();
        let sheets = build_sheets(&c, 1270).unwrap();

        let port = &sheets[1].ports[0];
        assert_eq!(port.name, "SIG");
        assert_eq!(port.direction, PortDirection::Output);
        assert_eq!(sheets[0].sheet_symbols[0].pins[0].direction, PortDirection::Output);
        let root_net = sheets[0].nets.iter().find(|n| n.name == "SIG").unwrap();
        assert_eq!(root_net.endpoints.len(), 2, "load pin plus sheet pin");
    }

    #[test]
    fn nested_sheets_chain_ports_through_each_level() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("top", &lib);
        let vcc = b.net("VCC");
        b.subcircuit("outer", &[], |b| {
            b.subcircuit("inner", &[], |b| {
                let u = b.add_part("Logic", "Buffer")?;
                b.connect(vcc, u, "VCC")
            })?;
            Ok(())
        })
        .unwrap();
        let flag = b.add_part("power", "PWR_FLAG").unwrap();
        b.connect(vcc, flag, "1").unwrap();
        let c = b.finish().unwrap();
        let sheets = build_sheets(&c, 1270).unwrap();

        assert_eq!(sheets[2].path, "/outer_1/inner_1");
        assert_eq!(sheets[1].ports[0].name, "VCC");
        assert_eq!(sheets[2].ports[0].name, "VCC");
        assert_eq!(sheets[2].ports[0].direction, PortDirection::Input);
        assert_eq!(sheets[1].sheet_symbols.len(), 1);
    }
}
