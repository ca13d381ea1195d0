//! Circuit description: parts, nets and subcircuit invocations.
//!
//! A [`Circuit`] is immutable input to the generator. Ids are indices into
//! the owning vectors, so `circuit.parts[id.0].id == id` always holds for a
//! validated circuit.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::SheetGenError;
use crate::library::{PinDef, SymbolDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(pub usize);

/// A pin of a specific part, addressed by pin number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinRef {
    pub part: PartId,
    pub number: String,
}

impl PinRef {
    pub fn new(part: PartId, number: impl Into<String>) -> Self {
        Self {
            part,
            number: number.into(),
        }
    }
}

/// A part instance in the circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,

    /// Resolved library symbol (carries lib and symbol name)
    pub symbol: SymbolDef,

    /// Explicit reference designator; auto-assigned when `None`
    #[serde(default)]
    pub reference: Option<String>,

    #[serde(default)]
    pub value: Option<String>,

    /// Opaque field bag (footprint, MPN, ...)
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Owning subcircuit invocation; `None` for the root sheet
    #[serde(default)]
    pub invocation: Option<InvocationId>,
}

impl Part {
    pub fn prefix(&self) -> &str {
        &self.symbol.reference_prefix
    }

    /// Reference if known, otherwise `prefix?id` for diagnostics.
    pub fn display_name(&self) -> String {
        match &self.reference {
            Some(r) => r.clone(),
            None => format!("{}?{}", self.prefix(), self.id.0),
        }
    }
}

/// An electrical net
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Net {
    pub id: NetId,
    pub name: String,

    /// False for auto-named nets (`Net{n}`)
    #[serde(default)]
    pub explicit_name: bool,

    /// Member pins in connection order
    #[serde(default)]
    pub pins: Vec<PinRef>,

    /// The synthetic no-connect net
    #[serde(default)]
    pub no_connect: bool,

    /// Invocation that created the net; `None` for the root
    #[serde(default)]
    pub owner: Option<InvocationId>,
}

/// A formal parameter bound to a net at an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortArg {
    pub parameter: String,
    pub net: NetId,
}

/// One call of a subcircuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcircuitInvocation {
    pub id: InvocationId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<InvocationId>,
    #[serde(default)]
    pub args: Vec<PortArg>,
}

/// Complete circuit description
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Circuit {
    pub name: String,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub nets: Vec<Net>,
    #[serde(default)]
    pub invocations: Vec<SubcircuitInvocation>,
}

impl Circuit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn part(&self, id: PartId) -> Option<&Part> {
        self.parts.get(id.0)
    }

    pub fn net(&self, id: NetId) -> Option<&Net> {
        self.nets.get(id.0)
    }

    pub fn invocation(&self, id: InvocationId) -> Option<&SubcircuitInvocation> {
        self.invocations.get(id.0)
    }

    pub fn net_by_name(&self, name: &str) -> Option<&Net> {
        self.nets.iter().find(|n| n.name == name)
    }

    pub fn pin_def(&self, pin: &PinRef) -> Option<&PinDef> {
        self.part(pin.part)
            .and_then(|p| p.symbol.pins.iter().find(|d| d.number == pin.number))
    }

    /// Human-readable pin label such as `R1.2`.
    pub fn pin_label(&self, pin: &PinRef) -> String {
        match self.part(pin.part) {
            Some(part) => format!("{}.{}", part.display_name(), pin.number),
            None => format!("?{}.{}", pin.part.0, pin.number),
        }
    }

    /// Map every connected pin to its net.
    pub fn pin_nets(&self) -> HashMap<PinRef, NetId> {
        self.nets
            .iter()
            .flat_map(|n| n.pins.iter().map(move |p| (p.clone(), n.id)))
            .collect()
    }

    /// Chain of invocations from the root down to `inv` (inclusive).
    pub fn invocation_path(&self, inv: Option<InvocationId>) -> Vec<InvocationId> {
        let mut path = Vec::new();
        let mut cur = inv;
        while let Some(id) = cur {
            path.push(id);
            cur = self.invocation(id).and_then(|i| i.parent);
        }
        path.reverse();
        path
    }

    pub fn from_json(json: &str) -> Result<Self, SheetGenError> {
        let circuit: Circuit = serde_json::from_str(json)?;
        circuit.validate()?;
        Ok(circuit)
    }

    pub fn to_json(&self) -> Result<String, SheetGenError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks run before any layout.
    pub fn validate(&self) -> Result<(), SheetGenError> {
        let invalid = |msg: String| Err(SheetGenError::InvalidCircuit(msg));

        for (i, inv) in self.invocations.iter().enumerate() {
            if inv.id.0 != i {
                return invalid(format!("invocation {} stored at index {}", inv.id.0, i));
            }
            if let Some(parent) = inv.parent {
                // Parents are recorded before their children, which also rules out cycles.
                if parent.0 >= i {
                    return invalid(format!(
                        "invocation {} ({}) has parent {} declared after it",
                        i, inv.name, parent.0
                    ));
                }
            }
            for arg in &inv.args {
                if self.net(arg.net).is_none() {
                    return invalid(format!(
                        "argument {} of {} refers to unknown net {}",
                        arg.parameter, inv.name, arg.net.0
                    ));
                }
            }
        }

        for (i, part) in self.parts.iter().enumerate() {
            if part.id.0 != i {
                return invalid(format!("part {} stored at index {}", part.id.0, i));
            }
            if let Some(inv) = part.invocation {
                if self.invocation(inv).is_none() {
                    return invalid(format!("part {} owned by unknown invocation {}", i, inv.0));
                }
            }
        }

        let mut seen: HashMap<&PinRef, NetId> = HashMap::new();
        let mut nc_nets = 0;
        for (i, net) in self.nets.iter().enumerate() {
            if net.id.0 != i {
                return invalid(format!("net {} stored at index {}", net.id.0, i));
            }
            if net.no_connect {
                nc_nets += 1;
            }
            if let Some(inv) = net.owner {
                if self.invocation(inv).is_none() {
                    return invalid(format!("net {} owned by unknown invocation {}", net.name, inv.0));
                }
            }
            for pin in &net.pins {
                if self.pin_def(pin).is_none() {
                    return invalid(format!("net {} refers to unknown pin {}", net.name, self.pin_label(pin)));
                }
                if let Some(other) = seen.insert(pin, net.id) {
                    return invalid(format!(
                        "pin {} is on both {} and {}",
                        self.pin_label(pin),
                        self.nets[other.0].name,
                        net.name
                    ));
                }
            }
        }
        if nc_nets > 1 {
            return invalid(format!("{} no-connect nets, expected at most one", nc_nets));
        }

        Ok(())
    }
}
