//! Explicit circuit construction context.

use std::collections::HashMap;

use tracing::debug;

use crate::core::SheetGenError;
use crate::library::SymbolLibrary;

use super::schema::*;

/// Name of the synthetic net that collects no-connect pins.
pub const NO_CONNECT_NET: &str = "__nc__";

/// One element of a series chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainItem {
    Net(NetId),
    Part(PartId),
}

impl From<NetId> for ChainItem {
    fn from(n: NetId) -> Self {
        ChainItem::Net(n)
    }
}

impl From<PartId> for ChainItem {
    fn from(p: PartId) -> Self {
        ChainItem::Part(p)
    }
}

/// Builds a [`Circuit`] against a symbol library.
///
/// Parts and nets created between `begin_subcircuit` and the matching
/// `end_subcircuit` belong to that invocation.
pub struct CircuitBuilder<'l> {
    library: &'l dyn SymbolLibrary,
    circuit: Circuit,
    stack: Vec<InvocationId>,
    pin_nets: HashMap<PinRef, NetId>,
    anon_counter: usize,
    no_connect: Option<NetId>,
}

enum ChainState {
    Start,
    Net(NetId),
    Pin(PinRef),
}

impl<'l> CircuitBuilder<'l> {
    pub fn new(name: impl Into<String>, library: &'l dyn SymbolLibrary) -> Self {
        Self {
            library,
            circuit: Circuit::new(name),
            stack: Vec::new(),
            pin_nets: HashMap::new(),
            anon_counter: 0,
            no_connect: None,
        }
    }

    fn current(&self) -> Option<InvocationId> {
        self.stack.last().copied()
    }

    pub fn add_part(&mut self, lib: &str, symbol: &str) -> Result<PartId, SheetGenError> {
        let def = self.library.lookup(lib, symbol)?;
        let id = PartId(self.circuit.parts.len());
        self.circuit.parts.push(Part {
            id,
            symbol: def,
            reference: None,
            value: None,
            fields: Default::default(),
            invocation: self.current(),
        });
        Ok(id)
    }

    pub fn add_part_with_ref(
        &mut self,
        lib: &str,
        symbol: &str,
        reference: impl Into<String>,
    ) -> Result<PartId, SheetGenError> {
        let id = self.add_part(lib, symbol)?;
        self.circuit.parts[id.0].reference = Some(reference.into());
        Ok(id)
    }

    fn part_mut(&mut self, part: PartId) -> Result<&mut Part, SheetGenError> {
        self.circuit
            .parts
            .get_mut(part.0)
            .ok_or_else(|| SheetGenError::InvalidCircuit(format!("unknown part {}", part.0)))
    }

    pub fn set_value(&mut self, part: PartId, value: impl Into<String>) -> Result<(), SheetGenError> {
        self.part_mut(part)?.value = Some(value.into());
        Ok(())
    }

    pub fn set_field(
        &mut self,
        part: PartId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SheetGenError> {
        self.part_mut(part)?.fields.insert(key.into(), value.into());
        Ok(())
    }

    fn push_net(&mut self, name: String, explicit_name: bool, no_connect: bool) -> NetId {
        let id = NetId(self.circuit.nets.len());
        self.circuit.nets.push(Net {
            id,
            name,
            explicit_name,
            pins: Vec::new(),
            no_connect,
            owner: if no_connect { None } else { self.current() },
        });
        id
    }

    fn name_taken(&self, name: &str) -> bool {
        self.circuit.nets.iter().any(|n| n.name == name)
    }

    /// Create a named net. A name already in use gets a `_k` suffix.
    pub fn net(&mut self, name: &str) -> NetId {
        let mut unique = name.to_string();
        let mut k = 1;
        while self.name_taken(&unique) {
            unique = format!("{}_{}", name, k);
            k += 1;
        }
        if unique != name {
            debug!("Net name {} already used, renamed to {}", name, unique);
        }
        self.push_net(unique, true, false)
    }

    /// Create an auto-named net (`Net1`, `Net2`, ...).
    pub fn anonymous_net(&mut self) -> NetId {
        loop {
            self.anon_counter += 1;
            let name = format!("Net{}", self.anon_counter);
            if !self.name_taken(&name) {
                return self.push_net(name, false, false);
            }
        }
    }

    fn resolve_pin(&self, part: PartId, pin: &str) -> Result<PinRef, SheetGenError> {
        let p = self
            .circuit
            .part(part)
            .ok_or_else(|| SheetGenError::InvalidCircuit(format!("unknown part {}", part.0)))?;
        let def = p.symbol.pin(pin).ok_or_else(|| SheetGenError::UnknownPin {
            part: p.display_name(),
            pin: pin.to_string(),
        })?;
        Ok(PinRef::new(part, def.number.clone()))
    }

    fn attach(&mut self, net: NetId, pin: PinRef) -> Result<(), SheetGenError> {
        if self.circuit.net(net).is_none() {
            return Err(SheetGenError::InvalidCircuit(format!("unknown net {}", net.0)));
        }
        if let Some(&existing) = self.pin_nets.get(&pin) {
            if existing == net {
                return Ok(());
            }
            return Err(SheetGenError::PinConflict {
                pin: self.circuit.pin_label(&pin),
                existing: self.circuit.nets[existing.0].name.clone(),
                requested: self.circuit.nets[net.0].name.clone(),
            });
        }
        self.pin_nets.insert(pin.clone(), net);
        self.circuit.nets[net.0].pins.push(pin);
        Ok(())
    }

    /// Connect a pin (by number or name) to a net.
    pub fn connect(&mut self, net: NetId, part: PartId, pin: &str) -> Result<(), SheetGenError> {
        let pin = self.resolve_pin(part, pin)?;
        self.attach(net, pin)
    }

    /// Mark a pin as intentionally unconnected.
    pub fn no_connect(&mut self, part: PartId, pin: &str) -> Result<(), SheetGenError> {
        let pin = self.resolve_pin(part, pin)?;
        let nc = match self.no_connect {
            Some(id) => id,
            None => {
                let id = self.push_net(NO_CONNECT_NET.to_string(), false, true);
                self.no_connect = Some(id);
                id
            }
        };
        self.attach(nc, pin)
    }

    /// Series connection of nets and two-pin parts.
    ///
    /// `[VIN, R1, MID, R2, GND]` ties R1 between VIN and MID and R2 between
    /// MID and GND. Two adjacent parts are joined by a fresh anonymous net.
    pub fn chain<I>(&mut self, items: I) -> Result<(), SheetGenError>
    where
        I: IntoIterator<Item = ChainItem>,
    {
        let mut state = ChainState::Start;
        for item in items {
            state = match item {
                ChainItem::Net(net) => {
                    match state {
                        ChainState::Pin(exit) => self.attach(net, exit)?,
                        ChainState::Net(_) => {
                            return Err(SheetGenError::InvalidCircuit(
                                "chain has two consecutive nets".to_string(),
                            ))
                        }
                        ChainState::Start => {}
                    }
                    ChainState::Net(net)
                }
                ChainItem::Part(part) => {
                    let (entry, exit) = self.two_pins(part)?;
                    match state {
                        ChainState::Net(net) => self.attach(net, entry)?,
                        ChainState::Pin(prev) => {
                            let mid = self.anonymous_net();
                            self.attach(mid, prev)?;
                            self.attach(mid, entry)?;
                        }
                        ChainState::Start => {}
                    }
                    ChainState::Pin(exit)
                }
            };
        }
        Ok(())
    }

    fn two_pins(&self, part: PartId) -> Result<(PinRef, PinRef), SheetGenError> {
        let p = self
            .circuit
            .part(part)
            .ok_or_else(|| SheetGenError::InvalidCircuit(format!("unknown part {}", part.0)))?;
        match p.symbol.pins.as_slice() {
            [a, b] => Ok((PinRef::new(part, a.number.clone()), PinRef::new(part, b.number.clone()))),
            pins => Err(SheetGenError::InvalidCircuit(format!(
                "{} has {} pins and cannot be chained",
                p.display_name(),
                pins.len()
            ))),
        }
    }

    /// Open a subcircuit invocation bound to `args` (parameter, net).
    pub fn begin_subcircuit(
        &mut self,
        name: &str,
        args: &[(&str, NetId)],
    ) -> Result<InvocationId, SheetGenError> {
        for (param, net) in args {
            if self.circuit.net(*net).is_none() {
                return Err(SheetGenError::InvalidCircuit(format!(
                    "argument {} of {} refers to unknown net {}",
                    param, name, net.0
                )));
            }
        }
        let id = InvocationId(self.circuit.invocations.len());
        self.circuit.invocations.push(SubcircuitInvocation {
            id,
            name: name.to_string(),
            parent: self.current(),
            args: args
                .iter()
                .map(|(p, n)| PortArg {
                    parameter: p.to_string(),
                    net: *n,
                })
                .collect(),
        });
        self.stack.push(id);
        Ok(id)
    }

    pub fn end_subcircuit(&mut self) -> Result<InvocationId, SheetGenError> {
        self.stack
            .pop()
            .ok_or_else(|| SheetGenError::InvalidCircuit("end_subcircuit without begin".to_string()))
    }

    /// Run `body` inside a subcircuit invocation.
    pub fn subcircuit<F>(
        &mut self,
        name: &str,
        args: &[(&str, NetId)],
        body: F,
    ) -> Result<InvocationId, SheetGenError>
    where
        F: FnOnce(&mut Self) -> Result<(), SheetGenError>,
    {
        let id = self.begin_subcircuit(name, args)?;
        body(self)?;
        self.end_subcircuit()?;
        Ok(id)
    }

    pub fn finish(self) -> Result<Circuit, SheetGenError> {
        if let Some(open) = self.stack.last() {
            let name = self.circuit.invocations[open.0].name.clone();
            return Err(SheetGenError::InvalidCircuit(format!(
                "subcircuit {} was never closed",
                name
            )));
        }
        self.circuit.validate()?;
        Ok(self.circuit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::BuiltinLibrary;

    #[test]
    fn chain_builds_series_connection() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("divider", &lib);
        let vin = b.net("VIN");
        let gnd = b.net("GND");
        let r1 = b.add_part("Device", "R").unwrap();
        let r2 = b.add_part("Device", "R").unwrap();
        b.chain([vin.into(), r1.into(), r2.into(), gnd.into()]).unwrap();
        let c = b.finish().unwrap();

        assert_eq!(c.nets.len(), 3, "VIN, GND and one intermediate net");
        let mid = &c.nets[2];
        assert!(!mid.explicit_name);
        assert_eq!(mid.name, "Net1");
        assert_eq!(mid.pins, vec![PinRef::new(r1, "2"), PinRef::new(r2, "1")]);
        assert_eq!(c.nets[0].pins, vec![PinRef::new(r1, "1")]);
        assert_eq!(c.nets[1].pins, vec![PinRef::new(r2, "2")]);
    }

    #[test]
    fn chain_rejects_multi_pin_parts() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("bad", &lib);
        let u = b.add_part("Regulator_Linear", "LM7805").unwrap();
        let n = b.net("A");
        let err = b.chain([n.into(), u.into()]).unwrap_err();
        assert!(matches!(err, SheetGenError::InvalidCircuit(_)));
    }

    #[test]
    fn connecting_pin_twice_conflicts() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        let r = b.add_part_with_ref("Device", "R", "R7").unwrap();
        let a = b.net("A");
        let bn = b.net("B");
        b.connect(a, r, "1").unwrap();
        b.connect(a, r, "1").unwrap();
        match b.connect(bn, r, "1") {
            Err(SheetGenError::PinConflict { pin, existing, requested }) => {
                assert_eq!(pin, "R7.1");
                assert_eq!(existing, "A");
                assert_eq!(requested, "B");
            }
            other => panic!("expected pin conflict, got {:?}", other),
        }
        assert!(matches!(b.connect(a, r, "9"), Err(SheetGenError::UnknownPin { .. })));
    }

    #[test]
    fn duplicate_net_names_are_suffixed() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        b.net("MID");
        let second = b.net("MID");
        let c = b.finish().unwrap();
        assert_eq!(c.nets[second.0].name, "MID_1");
    }

    #[test]
    fn subcircuit_owns_parts_and_nets() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("top", &lib);
        let vin = b.net("VIN");
        let inv = b
            .subcircuit("filter", &[("inp", vin)], |b| {
                let r = b.add_part("Device", "R")?;
                let local = b.net("inner");
                b.connect(vin, r, "1")?;
                b.connect(local, r, "2")?;
                Ok(())
            })
            .unwrap();
        let c = b.finish().unwrap();
        assert_eq!(c.parts[0].invocation, Some(inv));
        assert_eq!(c.nets[1].owner, Some(inv));
        assert_eq!(c.nets[0].owner, None);
        assert_eq!(c.invocations[0].args[0].parameter, "inp");
    }

    #[test]
    fn unbalanced_subcircuit_fails_finish() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("top", &lib);
        b.begin_subcircuit("open", &[]).unwrap();
        assert!(matches!(b.finish(), Err(SheetGenError::InvalidCircuit(_))));

        let mut b = CircuitBuilder::new("top", &lib);
        assert!(b.end_subcircuit().is_err());
    }

    #[test]
    fn no_connect_pins_share_one_net() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("nc", &lib);
        let u = b.add_part("Logic", "Buffer").unwrap();
        b.no_connect(u, "A").unwrap();
        b.no_connect(u, "Y").unwrap();
        let c = b.finish().unwrap();
        let nc: Vec<_> = c.nets.iter().filter(|n| n.no_connect).collect();
        assert_eq!(nc.len(), 1);
        assert_eq!(nc[0].pins.len(), 2);
    }

    #[test]
    fn missing_symbol_is_lookup_error() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        assert!(matches!(b.add_part("Device", "Nope"), Err(SheetGenError::Lookup(_))));
    }
}
