//! Loading generation options from disk

use std::io::Write;

use sheetgen::prelude::*;
use sheetgen::sheet::Paper;
use tempfile::NamedTempFile;

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Should create temp file");
    file.write_all(json.as_bytes()).expect("Should write config");
    file
}

#[test]
fn test_options_from_file() {
    let file = write_config(
        r#"{
            "grid": 2540,
            "gap_x": 25400,
            "paper": "A2",
            "connector_prefixes": ["J", "TP"]
        }"#,
    );
    let options = GenerationOptions::from_json_file(file.path()).expect("Should load options");
    assert_eq!(options.grid, 2540);
    assert_eq!(options.gap_x, 25_400);
    assert_eq!(options.paper, Paper::A2);
    assert_eq!(options.connector_prefixes, vec!["J", "TP"]);
    assert_eq!(
        options.max_expansions,
        GenerationOptions::default().max_expansions,
        "Unset fields keep their defaults"
    );
}

#[test]
fn test_invalid_file_options_are_rejected() {
    let file = write_config(r#"{ "grid": 1270, "gap_y": 1270 }"#);
    match GenerationOptions::from_json_file(file.path()) {
        Err(SheetGenError::Config(msg)) => assert!(msg.contains("gaps"), "Unexpected message: {}", msg),
        other => panic!("Expected config error, got {:?}", other),
    }

    let missing = file.path().with_extension("missing");
    assert!(matches!(
        GenerationOptions::from_json_file(&missing),
        Err(SheetGenError::Io(_))
    ));
}

#[test]
fn test_loaded_options_drive_generation() {
    let file = write_config(r#"{ "paper": "A3", "max_expansions": 0 }"#);
    let options = GenerationOptions::from_json_file(file.path()).unwrap();

    let lib = BuiltinLibrary;
    let mut b = CircuitBuilder::new("rc", &lib);
    let inp = b.net("IN");
    let gnd = b.net("GND");
    let r = b.add_part("Device", "R").unwrap();
    let c = b.add_part("Device", "C").unwrap();
    b.chain([inp.into(), r.into(), c.into(), gnd.into()]).unwrap();
    let circuit = b.finish().unwrap();

    let generation = SchematicGenerator::new(options).generate(&circuit).unwrap();
    let root = generation.tree.root();
    assert_eq!(root.paper, Paper::A3);
    assert!(generation.report.stats().unrouted_pairs >= 1);
}

#[test]
fn test_circuit_json_round_trip_through_file() {
    let lib = BuiltinLibrary;
    let mut b = CircuitBuilder::new("saved", &lib);
    let a = b.net("A");
    let r = b.add_part_with_ref("Device", "R", "R9").unwrap();
    b.connect(a, r, "1").unwrap();
    let circuit = b.finish().unwrap();

    let file = write_config(&circuit.to_json().unwrap());
    let text = std::fs::read_to_string(file.path()).unwrap();
    let loaded = Circuit::from_json(&text).expect("Should load saved circuit");
    assert_eq!(loaded.parts[0].reference.as_deref(), Some("R9"));
    assert_eq!(loaded.nets[0].name, "A");
}
