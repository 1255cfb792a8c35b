#![cfg(feature = "ast-json")]

use coflip::{InvertOptions, Module, ast::FunctionDef, invert_def, parse};

const PAIRS: &str = "
    @invertible
    def pairs(source) {
        buf = [];
        for elem in source {
            buf.append(elem);
            if len(buf) >= 2 { yield tuple(buf); buf = []; }
        }
    }
";

#[test]
fn test_module_serialization_deserialization() {
    let module = parse(PAIRS).unwrap();

    let json = serde_json::to_string(&module).unwrap();
    assert!(json.contains("\"FunctionDef\""));
    assert!(json.contains("\"pairs\""));
    assert!(json.contains("\"source\""));

    let deserialized: Module = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, module);
}

#[test]
fn test_inverted_tree_serialization_deserialization() {
    let module = parse(PAIRS).unwrap();
    let def = module.function("pairs").unwrap().clone();
    let inverted = invert_def(def, &InvertOptions::default()).unwrap();

    let json = serde_json::to_string_pretty(&inverted).unwrap();
    assert!(json.contains("\"OnClose\""));
    assert!(json.contains("\"Receive\""));
    assert!(json.contains("\"more_values_available\""));

    let deserialized: FunctionDef = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized.to_code(), inverted.to_code());
}
