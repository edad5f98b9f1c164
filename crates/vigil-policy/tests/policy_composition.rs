//! Policy composition: graph shape and end-to-end evaluation.
//!
//! Mirrors the composed-tree contract: decoders cascade under `Or` with
//! filter-gated children, rules and outputs fan out under `Broadcast`, and
//! the policy root chains the three graphs.

use std::sync::Arc;

use serde_json::json;
use vigil_policy::{
    evaluate, register_builders, BuilderDeps, CompilerError, Event, Expression, KvdbManager,
    MemStore, PolicyBuilder, Registry,
};

fn builder_with(docs: &[(&str, &str)]) -> (tempfile::TempDir, PolicyBuilder) {
    let dir = tempfile::tempdir().unwrap();
    let kvdb = Arc::new(KvdbManager::new(dir.path().join("kvdb")).unwrap());
    let mut registry = Registry::new();
    register_builders(
        &mut registry,
        &BuilderDeps::new(kvdb, dir.path().join("wdb.sock")),
    )
    .unwrap();

    let store = MemStore::new();
    for (name, yaml) in docs {
        store.insert_yaml(name, yaml).unwrap();
    }
    (
        dir,
        PolicyBuilder::new(Arc::new(store), Arc::new(registry)),
    )
}

/// A decoder matching `selector: <tag>` that records itself under `/fired`.
fn decoder(name: &str, tag: &str, parents: &[&str]) -> String {
    let parents_line = if parents.is_empty() {
        String::new()
    } else {
        format!("parents: [{}]\n", parents.join(", "))
    };
    format!(
        "name: {name}\n{parents_line}check:\n  - selector: {tag}\nmap:\n  - fired.{name}: true\n"
    )
}

fn complete_policy() -> Vec<(&'static str, String)> {
    vec![
        ("policy.complete", "name: policy.complete\ndecoders: [decoder1, decoder1_1, decoder1_2, decoder2, decoder23_1, decoder3]\nrules: [rule1, rule1_1, rule2]\noutputs: [output1]\nfilters: [filter1]\n".to_owned()),
        ("decoder1", decoder("decoder1", "one", &[])),
        ("decoder1_1", decoder("decoder1_1", "one", &["decoder1"])),
        ("decoder1_2", decoder("decoder1_2", "one-two", &["decoder1"])),
        ("decoder2", decoder("decoder2", "two", &[])),
        ("decoder23_1", decoder("decoder23_1", "two", &["decoder2", "decoder3"])),
        ("decoder3", decoder("decoder3", "three", &[])),
        ("filter1", "name: filter1\nafter: [decoder1]\ncheck:\n  - allow_children: true\n".to_owned()),
        ("rule1", decoder("rule1", "one", &[])),
        ("rule1_1", decoder("rule1_1", "one", &["rule1"])),
        ("rule2", decoder("rule2", "two", &[])),
        ("output1", "name: output1\nmap:\n  - fired.output1: true\n".to_owned()),
    ]
}

fn find<'a>(operands: &'a [Expression], name: &str) -> &'a Expression {
    operands
        .iter()
        .find(|op| op.name() == name)
        .unwrap_or_else(|| panic!("no operand named {name}"))
}

#[test]
fn complete_policy_composes_the_specified_tree() {
    let docs = complete_policy();
    let borrowed: Vec<(&str, &str)> = docs.iter().map(|(n, y)| (*n, y.as_str())).collect();
    let (_dir, builder) = builder_with(&borrowed);

    let policy = builder.build_policy("policy.complete").unwrap();
    assert_eq!(policy.name, "policy.complete");

    let root = &policy.expression;
    assert!(root.is_chain());
    assert_eq!(root.name(), "policyRoot");
    assert_eq!(root.operands().len(), 3);

    // Decoder graph.
    let decoders = &root.operands()[0];
    assert!(decoders.is_or());
    assert_eq!(decoders.name(), "decodersInput");
    assert_eq!(decoders.operands().len(), 3);

    // decoder1 subtree: gated children.
    let d1_node = find(decoders.operands(), "decoder1Node");
    assert!(d1_node.is_implication());
    assert_eq!(d1_node.operands().len(), 2);
    assert_eq!(d1_node.operands()[0].name(), "decoder1");
    let d1_container = &d1_node.operands()[1];
    assert!(d1_container.is_or());
    assert_eq!(d1_container.operands().len(), 1);

    let f1_node = &d1_container.operands()[0];
    assert!(f1_node.is_implication());
    assert_eq!(f1_node.name(), "filter1Node");
    assert_eq!(f1_node.operands()[0].name(), "filter1");
    let gated_children = &f1_node.operands()[1];
    assert!(gated_children.is_operation());
    assert_eq!(gated_children.operands().len(), 2);
    find(gated_children.operands(), "decoder1_1");
    find(gated_children.operands(), "decoder1_2");

    // decoder2 and decoder3 share the decoder23_1 subtree by reference.
    let d2_node = find(decoders.operands(), "decoder2Node");
    let d3_node = find(decoders.operands(), "decoder3Node");
    let shared_under_d2 = find(d2_node.operands()[1].operands(), "decoder23_1");
    let shared_under_d3 = find(d3_node.operands()[1].operands(), "decoder23_1");
    assert!(Expression::same_node(shared_under_d2, shared_under_d3));

    // Rule graph.
    let rules = &root.operands()[1];
    assert!(rules.is_broadcast());
    assert_eq!(rules.name(), "rulesInput");
    assert_eq!(rules.operands().len(), 2);
    let r1_node = find(rules.operands(), "rule1Node");
    assert!(r1_node.is_implication());
    assert_eq!(r1_node.operands()[0].name(), "rule1");
    let r1_children = &r1_node.operands()[1];
    assert!(r1_children.is_broadcast());
    assert_eq!(r1_children.operands().len(), 1);
    assert_eq!(r1_children.operands()[0].name(), "rule1_1");
    find(rules.operands(), "rule2");

    // Output graph.
    let outputs = &root.operands()[2];
    assert!(outputs.is_broadcast());
    assert_eq!(outputs.name(), "outputsInput");
    assert_eq!(outputs.operands().len(), 1);
    assert_eq!(outputs.operands()[0].name(), "output1");
}

#[test]
fn single_decoder_policy_has_only_the_decoder_graph() {
    let (_dir, builder) = builder_with(&[
        (
            "policy.single",
            "name: policy.single\ndecoders: [decoder-solo]\n",
        ),
        ("decoder-solo", "name: decoder-solo\ncheck:\n  - a: 1\n"),
    ]);
    let policy = builder.build_policy("policy.single").unwrap();
    assert!(policy.expression.is_chain());
    assert_eq!(policy.expression.operands().len(), 1);
    let graph = &policy.expression.operands()[0];
    assert!(graph.is_or());
    assert_eq!(graph.operands().len(), 1);
    assert!(graph.operands()[0].is_implication());
    assert_eq!(graph.operands()[0].name(), "decoder-solo");
}

#[test]
fn cascade_descends_only_under_matching_ancestors() {
    let docs = complete_policy();
    let borrowed: Vec<(&str, &str)> = docs.iter().map(|(n, y)| (*n, y.as_str())).collect();
    let (_dir, builder) = builder_with(&borrowed);
    let policy = builder.build_policy("policy.complete").unwrap();

    // Matches decoder1; the filter allows descent, decoder1_1 matches too.
    let event = Event::from_value(json!({"selector": "one", "allow_children": true}));
    assert!(evaluate(&policy.expression, event.clone()).ok());
    assert_eq!(event.get_bool("/fired/decoder1"), Some(true));
    assert_eq!(event.get_bool("/fired/decoder1_1"), Some(true));
    // Or cascade stopped at the first matching subtree.
    assert!(!event.exists("/fired/decoder2"));
    assert!(!event.exists("/fired/decoder3"));
    // Rules broadcast: rule1 and its child fired; rule2 did not match.
    assert_eq!(event.get_bool("/fired/rule1"), Some(true));
    assert_eq!(event.get_bool("/fired/rule1_1"), Some(true));
    assert!(!event.exists("/fired/rule2"));
    // Outputs always fire.
    assert_eq!(event.get_bool("/fired/output1"), Some(true));
}

#[test]
fn filter_gate_blocks_children_but_not_the_parent() {
    let docs = complete_policy();
    let borrowed: Vec<(&str, &str)> = docs.iter().map(|(n, y)| (*n, y.as_str())).collect();
    let (_dir, builder) = builder_with(&borrowed);
    let policy = builder.build_policy("policy.complete").unwrap();

    // decoder1 matches but the filter denies descent.
    let event = Event::from_value(json!({"selector": "one"}));
    assert!(evaluate(&policy.expression, event.clone()).ok());
    assert_eq!(event.get_bool("/fired/decoder1"), Some(true));
    assert!(!event.exists("/fired/decoder1_1"));
    assert!(!event.exists("/fired/decoder1_2"));
}

#[test]
fn second_root_wins_when_the_first_does_not_match() {
    let docs = complete_policy();
    let borrowed: Vec<(&str, &str)> = docs.iter().map(|(n, y)| (*n, y.as_str())).collect();
    let (_dir, builder) = builder_with(&borrowed);
    let policy = builder.build_policy("policy.complete").unwrap();

    let event = Event::from_value(json!({"selector": "two"}));
    assert!(evaluate(&policy.expression, event.clone()).ok());
    assert!(!event.exists("/fired/decoder1"));
    assert_eq!(event.get_bool("/fired/decoder2"), Some(true));
    assert_eq!(event.get_bool("/fired/decoder23_1"), Some(true));
    // decoder3 shares the child but never ran: decoder2's subtree won.
    assert!(!event.exists("/fired/decoder3"));
}

#[test]
fn orphan_parent_fails_the_load() {
    let (_dir, builder) = builder_with(&[
        (
            "policy.orphan",
            "name: policy.orphan\ndecoders: [decoder-child]\n",
        ),
        (
            "decoder-child",
            "name: decoder-child\nparents: [decoder-ghost]\ncheck:\n  - a: 1\n",
        ),
    ]);
    assert!(matches!(
        builder.build_policy("policy.orphan"),
        Err(CompilerError::OrphanAsset { .. })
    ));
}

#[test]
fn filter_with_missing_target_fails_the_load() {
    let (_dir, builder) = builder_with(&[
        (
            "policy.badfilter",
            "name: policy.badfilter\ndecoders: [decoder-a]\nfilters: [filter-x]\n",
        ),
        ("decoder-a", "name: decoder-a\ncheck:\n  - a: 1\n"),
        (
            "filter-x",
            "name: filter-x\nafter: [decoder-ghost]\ncheck:\n  - b: 2\n",
        ),
    ]);
    assert!(matches!(
        builder.build_policy("policy.badfilter"),
        Err(CompilerError::OrphanFilter(_))
    ));
}

#[test]
fn filter_only_policy_is_rejected() {
    let (_dir, builder) = builder_with(&[
        (
            "policy.filteronly",
            "name: policy.filteronly\nfilters: [filter-alone]\n",
        ),
        (
            "filter-alone",
            "name: filter-alone\ncheck:\n  - a: 1\n",
        ),
    ]);
    assert!(builder.build_policy("policy.filteronly").is_err());
}

#[test]
fn empty_policy_is_rejected() {
    let (_dir, builder) = builder_with(&[("policy.empty", "name: policy.empty\n")]);
    assert!(matches!(
        builder.build_policy("policy.empty"),
        Err(CompilerError::EmptyPolicy(_))
    ));
}

#[test]
fn missing_referenced_asset_fails_the_load() {
    let (_dir, builder) = builder_with(&[(
        "policy.dangling",
        "name: policy.dangling\ndecoders: [decoder-ghost]\n",
    )]);
    assert!(matches!(
        builder.build_policy("policy.dangling"),
        Err(CompilerError::Store(_))
    ));
}
