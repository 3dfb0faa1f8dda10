//! End-to-end tests for report export: TSV tables and JSON round trip.

use pretty_assertions::assert_eq;
use safe_rs::export::{
    write_attribute_properties, write_domain_properties, write_node_properties, write_score_matrix,
};
use safe_rs::{
    AttributeMatrix, Correction, Edge, EnrichmentResult, Network, Node, NodeId, Safe, SafeConfig,
};

// ============================================================================
// Helper: ring of 10 with one clustered and one unmeasured attribute
// ============================================================================

fn run() -> EnrichmentResult {
    let nodes = (0..10).map(|i| Node::new(NodeId(100 + i)).with_label(format!("YOR{i:03}"))).collect();
    let edges = (0..10).map(|i| Edge::new(NodeId(100 + i), NodeId(100 + (i + 1) % 10))).collect();
    let net = Network::new(nodes, edges).unwrap();
    let rows = (0..10)
        .map(|v| vec![Some(if v <= 2 { 1.0 } else { 0.0 }), None])
        .collect();
    let attrs = AttributeMatrix::from_rows(
        (0..10).map(|i| NodeId(100 + i)).collect(),
        vec!["ribosome biogenesis".into(), "unmeasured".into()],
        rows,
    )
    .unwrap();
    let config = SafeConfig { correction: Correction::None, permutations: 500, seed: 3, ..SafeConfig::default() };
    Safe::new(config).unwrap().run(&net, &attrs).unwrap()
}

fn render(write: impl Fn(&EnrichmentResult, &mut dyn std::io::Write) -> safe_rs::Result<()>) -> Vec<String> {
    let result = run();
    let mut buf = Vec::new();
    write(&result, &mut buf).unwrap();
    String::from_utf8(buf).unwrap().lines().map(String::from).collect()
}

// ============================================================================
// 1. Node table
// ============================================================================

#[test]
fn test_node_properties() {
    let lines = render(write_node_properties);
    assert_eq!(lines.len(), 11);
    assert_eq!(lines[0], "id\tkey\tlabel\tdomain\tnes\tnum_domains\tdomains");

    let node1: Vec<&str> = lines[2].split('\t').collect();
    assert_eq!(&node1[..4], &["1", "101", "YOR001", "0"]);
    assert!(node1[4].parse::<f64>().unwrap() > 1.3);
    assert_eq!(&node1[5..], &["1", "0"]);

    let node6: Vec<&str> = lines[7].split('\t').collect();
    assert_eq!(node6, vec!["6", "106", "YOR006", "NA", "NA", "0", ""]);
}

// ============================================================================
// 2. Domain table
// ============================================================================

#[test]
fn test_domain_properties() {
    let lines = render(write_domain_properties);
    assert_eq!(lines.len(), 2);
    let cols: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(cols[0], "0");
    assert_eq!(cols[1], "ribosome biogenesis");
    assert_eq!(cols[2], "0");
    assert_eq!(cols[4], "0");
}

// ============================================================================
// 3. Attribute table keeps "not testable" distinct
// ============================================================================

#[test]
fn test_attribute_properties() {
    let lines = render(write_attribute_properties);
    assert_eq!(lines.len(), 3);
    let measured: Vec<&str> = lines[1].split('\t').collect();
    let unmeasured: Vec<&str> = lines[2].split('\t').collect();
    assert_eq!(measured[5], "true");
    assert_eq!(measured[7], "");
    assert_eq!(unmeasured[2], "0");
    assert_eq!(unmeasured[7], "all values missing");
}

// ============================================================================
// 4. Score matrix
// ============================================================================

#[test]
fn test_score_matrix() {
    let lines = render(write_score_matrix);
    assert_eq!(lines[0], "key\tlabel\tribosome biogenesis\tunmeasured");
    for line in &lines[1..] {
        let cols: Vec<&str> = line.split('\t').collect();
        assert_eq!(cols.len(), 4);
        assert_eq!(cols[3], "NA");
        assert!(cols[2].parse::<f64>().is_ok());
    }
}

// ============================================================================
// 5. JSON round trip
// ============================================================================

#[test]
fn test_json_round_trip() {
    let result = run();
    let json = result.to_json().unwrap();
    let back = EnrichmentResult::from_json(&json).unwrap();
    assert_eq!(back, result);
    assert_eq!(back.report.degenerate.len(), 1);
}
