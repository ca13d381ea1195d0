//! Electrical rules check.
//!
//! Structural checks over the logical net/pin graph. The rule set is a
//! fixed table of plain functions evaluated per net, in table order.

use serde::{Deserialize, Serialize};

use crate::circuit::{Circuit, CircuitGraph, PinRef};
use crate::hierarchy::assign_references;
use crate::library::{is_ground_name, ElectricalType, PinDef};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErcRule {
    UnconnectedPin,
    MultipleOutputs,
    UndrivenInput,
    PowerGroundShort,
    FloatingNet,
}

impl ErcRule {
    pub fn id(&self) -> &'static str {
        match self {
            ErcRule::UnconnectedPin => "unconnected_pin",
            ErcRule::MultipleOutputs => "multiple_outputs",
            ErcRule::UndrivenInput => "undriven_input",
            ErcRule::PowerGroundShort => "power_ground_short",
            ErcRule::FloatingNet => "floating_net",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErcRule::UnconnectedPin => "Unconnected Pin",
            ErcRule::MultipleOutputs => "Multiple Outputs Driving a Net",
            ErcRule::UndrivenInput => "Undriven Input",
            ErcRule::PowerGroundShort => "Power Output Shorted to Ground",
            ErcRule::FloatingNet => "Floating Net",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub rule: ErcRule,
    /// `None` for pins that are on no net at all
    pub net: Option<String>,
    /// Pin labels such as `R1.2`
    pub pins: Vec<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// One net (or one lone pin) as seen by the rules.
pub struct NetView<'c> {
    pub net: Option<&'c str>,
    pub pins: Vec<(String, &'c PinDef)>,
}

impl NetView<'_> {
    fn count(&self, pred: impl Fn(ElectricalType) -> bool) -> usize {
        self.pins.iter().filter(|(_, d)| pred(d.electrical_type)).count()
    }

    fn labels(&self, pred: impl Fn(&PinDef) -> bool) -> Vec<String> {
        self.pins
            .iter()
            .filter(|(_, d)| pred(d))
            .map(|(l, _)| l.clone())
            .collect()
    }

    fn describe(&self) -> String {
        match self.net {
            Some(n) => format!("net {}", n),
            None => "no net".to_string(),
        }
    }
}

pub type RuleFn = fn(&NetView) -> Vec<Diagnostic>;

/// Rules in evaluation order.
pub const RULES: [(ErcRule, RuleFn); 5] = [
    (ErcRule::UnconnectedPin, unconnected_pin),
    (ErcRule::MultipleOutputs, multiple_outputs),
    (ErcRule::UndrivenInput, undriven_input),
    (ErcRule::PowerGroundShort, power_ground_short),
    (ErcRule::FloatingNet, floating_net),
];

fn unconnected_pin(view: &NetView) -> Vec<Diagnostic> {
    use ElectricalType::*;
    let [(label, def)] = view.pins.as_slice() else {
        return Vec::new();
    };
    let severity = match def.electrical_type {
        NoConnect => return Vec::new(),
        Input | Bidirectional | PowerIn => Severity::Error,
        Output | PowerOut | Passive | Unspecified => Severity::Warning,
    };
    vec![Diagnostic {
        severity,
        rule: ErcRule::UnconnectedPin,
        net: view.net.map(str::to_string),
        pins: vec![label.clone()],
        message: format!(
            "{} pin {} ({}) is not connected to anything else ({})",
            def.electrical_type,
            label,
            def.name,
            view.describe()
        ),
    }]
}

fn multiple_outputs(view: &NetView) -> Vec<Diagnostic> {
    if view.net.is_none() {
        return Vec::new();
    }
    let drivers = view.count(|t| t.is_driver());
    if drivers < 2 || view.count(|t| t == ElectricalType::PowerIn) > 0 {
        return Vec::new();
    }
    let pins = view.labels(|d| d.electrical_type.is_driver());
    vec![Diagnostic {
        severity: Severity::Error,
        rule: ErcRule::MultipleOutputs,
        net: view.net.map(str::to_string),
        message: format!("{} is driven by {} outputs: {}", view.describe(), drivers, pins.join(", ")),
        pins,
    }]
}

fn undriven_input(view: &NetView) -> Vec<Diagnostic> {
    if view.net.is_none() || view.count(|t| t.is_driver()) > 0 {
        return Vec::new();
    }
    view.labels(|d| d.electrical_type == ElectricalType::Input)
        .into_iter()
        .map(|label| Diagnostic {
            severity: Severity::Warning,
            rule: ErcRule::UndrivenInput,
            net: view.net.map(str::to_string),
            message: format!("Input {} on {} has no driver", label, view.describe()),
            pins: vec![label],
        })
        .collect()
}

fn power_ground_short(view: &NetView) -> Vec<Diagnostic> {
    let Some(net) = view.net else {
        return Vec::new();
    };
    if is_ground_name(net) || view.count(|t| t == ElectricalType::PowerOut) == 0 {
        return Vec::new();
    }
    let grounds = view.labels(|d| d.is_ground());
    if grounds.is_empty() {
        return Vec::new();
    }
    let mut pins = view.labels(|d| d.electrical_type == ElectricalType::PowerOut);
    pins.extend(grounds);
    vec![Diagnostic {
        severity: Severity::Error,
        rule: ErcRule::PowerGroundShort,
        net: Some(net.to_string()),
        message: format!("Power output shorted to ground pin on net {}: {}", net, pins.join(", ")),
        pins,
    }]
}

fn floating_net(view: &NetView) -> Vec<Diagnostic> {
    if view.net.is_none() || view.pins.len() < 2 || view.count(|t| t == ElectricalType::Passive) != view.pins.len() {
        return Vec::new();
    }
    vec![Diagnostic {
        severity: Severity::Warning,
        rule: ErcRule::FloatingNet,
        net: view.net.map(str::to_string),
        pins: view.labels(|_| true),
        message: format!("{} connects only passive pins", view.describe()),
    }]
}

/// Run every rule over every net, then over pins that are on no net.
pub fn check(circuit: &Circuit) -> Vec<Diagnostic> {
    let graph = CircuitGraph::new(circuit);
    let references = assign_references(circuit).ok();
    let label = |pin: &PinRef| match &references {
        Some(refs) => format!("{}.{}", refs[pin.part.0], pin.number),
        None => circuit.pin_label(pin),
    };

    let mut views: Vec<NetView> = Vec::new();
    for net in circuit.nets.iter().filter(|n| !n.no_connect) {
        views.push(NetView {
            net: Some(net.name.as_str()),
            pins: net
                .pins
                .iter()
                .filter_map(|p| circuit.pin_def(p).map(|d| (label(p), d)))
                .collect(),
        });
    }
    for pin in graph.unconnected_pins() {
        if let Some(def) = circuit.pin_def(&pin) {
            views.push(NetView {
                net: None,
                pins: vec![(label(&pin), def)],
            });
        }
    }

    let mut out = Vec::new();
    for view in &views {
        for (_, rule) in RULES.iter() {
            out.extend(rule(view));
        }
    }
    tracing::debug!("ERC on {}: {} diagnostics", circuit.name, out.len());
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErcSummary {
    pub errors: usize,
    pub warnings: usize,
}

impl ErcSummary {
    pub fn passed(&self) -> bool {
        self.errors == 0
    }
}

pub fn summarize(diagnostics: &[Diagnostic]) -> ErcSummary {
    let mut summary = ErcSummary::default();
    for d in diagnostics {
        match d.severity {
            Severity::Error => summary.errors += 1,
            Severity::Warning => summary.warnings += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::library::BuiltinLibrary;

    fn of_rule(diags: &[Diagnostic], rule: ErcRule) -> Vec<&Diagnostic> {
        diags.iter().filter(|d| d.rule == rule).collect()
    }

    #[test]
    fn lone_input_is_error_and_lone_passive_is_warning() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        let u = b.add_part("Logic", "Buffer").unwrap();
        let r = b.add_part("Device", "R").unwrap();
        let a = b.net("A");
        b.connect(a, u, "A").unwrap();
        let n = b.net("N");
        b.connect(n, r, "1").unwrap();
        let diags = check(&b.finish().unwrap());

        let unconnected = of_rule(&diags, ErcRule::UnconnectedPin);
        let input = unconnected.iter().find(|d| d.pins == ["U1.1"]).unwrap();
        assert_eq!(input.severity, Severity::Error);
        let passive = unconnected.iter().find(|d| d.pins == ["R1.1"]).unwrap();
        assert_eq!(passive.severity, Severity::Warning);
        // R1.2 is on no net
        assert!(unconnected.iter().any(|d| d.pins == ["R1.2"] && d.net.is_none()));
    }

    #[test]
    fn power_in_on_net_suppresses_multiple_outputs() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        let reg = b.add_part("Regulator_Linear", "LM7805").unwrap();
        let flag = b.add_part("power", "PWR_FLAG").unwrap();
        let load = b.add_part("Logic", "Buffer").unwrap();
        let vcc = b.net("VCC");
        b.connect(vcc, reg, "VO").unwrap();
        b.connect(vcc, flag, "1").unwrap();
        b.connect(vcc, load, "VCC").unwrap();
        let diags = check(&b.finish().unwrap());
        assert!(of_rule(&diags, ErcRule::MultipleOutputs).is_empty());
    }

    #[test]
    fn power_output_on_ground_pin_is_short() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        let reg = b.add_part("Regulator_Linear", "LM7805").unwrap();
        let u = b.add_part("Logic", "Buffer").unwrap();
        let vout = b.net("VOUT");
        b.connect(vout, reg, "VO").unwrap();
        b.connect(vout, u, "GND").unwrap();
        let diags = check(&b.finish().unwrap());
        let shorts = of_rule(&diags, ErcRule::PowerGroundShort);
        assert_eq!(shorts.len(), 1);
        assert_eq!(shorts[0].pins, vec!["U1.3", "U2.4"]);
    }

    #[test]
    fn ground_named_net_is_not_a_short() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        let flag = b.add_part("power", "PWR_FLAG").unwrap();
        let u = b.add_part("Logic", "Buffer").unwrap();
        let gnd = b.net("GND");
        b.connect(gnd, flag, "1").unwrap();
        b.connect(gnd, u, "GND").unwrap();
        let diags = check(&b.finish().unwrap());
        assert!(of_rule(&diags, ErcRule::PowerGroundShort).is_empty());
    }

    #[test]
    fn undriven_input_and_floating_net() {
        let lib = BuiltinLibrary;
        let mut b = CircuitBuilder::new("c", &lib);
        let r1 = b.add_part("Device", "R").unwrap();
        let r2 = b.add_part("Device", "R").unwrap();
        let u = b.add_part("Logic", "Buffer").unwrap();
        let mid = b.net("MID");
        b.chain([r1.into(), mid.into(), r2.into()]).unwrap();
        let sig = b.net("SIG");
        b.connect(sig, r2, "2").unwrap();
        b.connect(sig, u, "A").unwrap();
        let diags = check(&b.finish().unwrap());

        let floating = of_rule(&diags, ErcRule::FloatingNet);
        assert_eq!(floating.len(), 1);
        assert_eq!(floating[0].net.as_deref(), Some("MID"));
        let undriven = of_rule(&diags, ErcRule::UndrivenInput);
        assert_eq!(undriven.len(), 1);
        assert_eq!(undriven[0].pins, vec!["U1.1"]);
    }

    #[test]
    fn summary_counts_by_severity() {
        let d = |severity| Diagnostic {
            severity,
            rule: ErcRule::FloatingNet,
            net: None,
            pins: vec![],
            message: String::new(),
        };
        let s = summarize(&[d(Severity::Error), d(Severity::Warning), d(Severity::Warning)]);
        assert_eq!(s, ErcSummary { errors: 1, warnings: 2 });
        assert!(!s.passed());
    }
}
