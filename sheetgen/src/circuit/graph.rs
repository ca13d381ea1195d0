//! Circuit Graph
//!
//! Bipartite petgraph view of a [`Circuit`]: part nodes and net nodes,
//! with one edge per connected pin (part -> net). Used by ERC and by
//! callers that want connectivity queries without walking the raw vectors.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::library::ElectricalType;

use super::schema::*;

/// Node type in the circuit graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitNode {
    Part(PartId),
    Net(NetId),
}

impl CircuitNode {
    pub fn as_part(&self) -> Option<PartId> {
        match self {
            CircuitNode::Part(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_net(&self) -> Option<NetId> {
        match self {
            CircuitNode::Net(n) => Some(*n),
            _ => None,
        }
    }
}

/// Edge type in the circuit graph - one pin connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinEdge {
    pub number: String,
    pub electrical_type: ElectricalType,
}

pub struct CircuitGraph<'c> {
    circuit: &'c Circuit,
    graph: DiGraph<CircuitNode, PinEdge>,
    part_nodes: Vec<NodeIndex>,
    net_nodes: Vec<NodeIndex>,
}

impl<'c> CircuitGraph<'c> {
    pub fn new(circuit: &'c Circuit) -> Self {
        let mut graph = DiGraph::new();

        // Pass 1: nodes
        let part_nodes: Vec<NodeIndex> = circuit
            .parts
            .iter()
            .map(|p| graph.add_node(CircuitNode::Part(p.id)))
            .collect();
        let net_nodes: Vec<NodeIndex> = circuit
            .nets
            .iter()
            .map(|n| graph.add_node(CircuitNode::Net(n.id)))
            .collect();

        // Pass 2: pin edges
        for net in &circuit.nets {
            for pin in &net.pins {
                let Some(&from) = part_nodes.get(pin.part.0) else {
                    continue;
                };
                let electrical_type = circuit
                    .pin_def(pin)
                    .map(|d| d.electrical_type)
                    .unwrap_or_default();
                graph.add_edge(
                    from,
                    net_nodes[net.id.0],
                    PinEdge {
                        number: pin.number.clone(),
                        electrical_type,
                    },
                );
            }
        }

        Self {
            circuit,
            graph,
            part_nodes,
            net_nodes,
        }
    }

    pub fn circuit(&self) -> &'c Circuit {
        self.circuit
    }

    /// Pins on a net, ordered by part then pin number.
    pub fn pins_on_net(&self, net: NetId) -> Vec<PinRef> {
        let Some(&idx) = self.net_nodes.get(net.0) else {
            return Vec::new();
        };
        let mut pins: Vec<PinRef> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|e| {
                self.graph[e.source()]
                    .as_part()
                    .map(|part| PinRef::new(part, e.weight().number.clone()))
            })
            .collect();
        pins.sort();
        pins
    }

    /// Nets a part touches, deduplicated and in id order.
    pub fn nets_for_part(&self, part: PartId) -> Vec<NetId> {
        let Some(&idx) = self.part_nodes.get(part.0) else {
            return Vec::new();
        };
        let mut nets: Vec<NetId> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter_map(|e| self.graph[e.target()].as_net())
            .collect();
        nets.sort();
        nets.dedup();
        nets
    }

    /// Parts sharing at least one net with `part`.
    pub fn neighbors(&self, part: PartId) -> Vec<PartId> {
        let mut parts: Vec<PartId> = self
            .nets_for_part(part)
            .into_iter()
            .flat_map(|n| self.pins_on_net(n))
            .map(|p| p.part)
            .filter(|p| *p != part)
            .collect();
        parts.sort();
        parts.dedup();
        parts
    }

    /// Symbol pins that are on no net at all, in part then symbol order.
    pub fn unconnected_pins(&self) -> Vec<PinRef> {
        let mut out = Vec::new();
        for part in &self.circuit.parts {
            let idx = self.part_nodes[part.id.0];
            for def in &part.symbol.pins {
                let connected = self
                    .graph
                    .edges_directed(idx, Direction::Outgoing)
                    .any(|e| e.weight().number == def.number);
                if !connected {
                    out.push(PinRef::new(part.id, def.number.clone()));
                }
            }
        }
        out
    }

    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            part_count: self.part_nodes.len(),
            net_count: self.net_nodes.len(),
            connection_count: self.graph.edge_count(),
            unconnected_pin_count: self.unconnected_pins().len(),
            subcircuit_count: self.circuit.invocations.len(),
        }
    }
}

/// Statistics about a circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub part_count: usize,
    pub net_count: usize,
    pub connection_count: usize,
    pub unconnected_pin_count: usize,
    pub subcircuit_count: usize,
}
