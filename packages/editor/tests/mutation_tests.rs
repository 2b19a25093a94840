//! Mutation engine tests against small hand-built templates

use pagecraft_editor::mutations::{insert, move_node, remove, reorder_siblings};
use pagecraft_editor::{Mutation, MutationError};
use pagecraft_model::{Block, Node, Section, StaticRegistry, Template};

fn registry() -> StaticRegistry {
    StaticRegistry::new().container("group").leaf("text").leaf("image")
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_insert_then_reorder_sections() {
    let registry = registry();
    let tree = Template::new("tpl", "index");

    let tree = insert(&tree, &registry, None, Node::Section(Section::new("A", "hero")), None).unwrap();
    let tree = insert(&tree, &registry, None, Node::Section(Section::new("B", "footer")), None).unwrap();
    assert_eq!(tree.find_section("A").unwrap().position, 0);
    assert_eq!(tree.find_section("B").unwrap().position, 1);

    let tree = reorder_siblings(&tree, None, &ids(&["B", "A"])).unwrap();
    assert_eq!(tree.find_section("A").unwrap().position, 1);
    assert_eq!(tree.find_section("B").unwrap().position, 0);
    tree.check_invariants(&registry).unwrap();
}

#[test]
fn test_move_into_itself_rejected_tree_unchanged() {
    let registry = registry();
    let tree = Template::new("tpl", "index").with_sections([Section::new("S", "hero").with_blocks([
        Block::new("C", "group").with_children([Block::new("X", "group"), Block::new("Y", "text")]),
    ])]);
    let before = tree.clone();

    let result = move_node(&tree, &registry, "X", Some("X"), Some(0));
    assert_eq!(
        result,
        Err(MutationError::CircularReference {
            node_id: "X".to_string(),
            new_parent_id: "X".to_string(),
        })
    );
    assert_eq!(tree, before);

    // Moving the container under its own child is a cycle too
    let result = move_node(&tree, &registry, "C", Some("X"), None);
    assert!(matches!(result, Err(MutationError::CircularReference { .. })));
}

#[test]
fn test_move_between_sections_keeps_subtree() {
    let registry = registry();
    let tree = Template::new("tpl", "index").with_sections([
        Section::new("S1", "hero").with_blocks([
            Block::new("G", "group").with_children([Block::new("X", "text")]),
            Block::new("T", "text"),
        ]),
        Section::new("S2", "footer").with_blocks([Block::new("U", "text")]),
    ]);

    let tree = move_node(&tree, &registry, "G", Some("S2"), Some(0)).unwrap();
    let s1 = tree.find_section("S1").unwrap();
    let s2 = tree.find_section("S2").unwrap();
    assert_eq!(s1.blocks.len(), 1);
    assert_eq!(s1.blocks[0].id, "T");
    assert_eq!(s1.blocks[0].position, 0);

    let moved: Vec<(&str, usize)> = s2.blocks.iter().map(|b| (b.id.as_str(), b.position)).collect();
    assert_eq!(moved, vec![("G", 0), ("U", 1)]);
    assert_eq!(s2.blocks[0].children[0].id, "X");
    tree.check_invariants(&registry).unwrap();
}

#[test]
fn test_move_under_leaf_not_capable() {
    let registry = registry();
    let tree = Template::new("tpl", "index").with_sections([Section::new("S", "hero")
        .with_blocks([Block::new("T", "text"), Block::new("I", "image")])]);

    let result = move_node(&tree, &registry, "I", Some("T"), None);
    assert_eq!(result, Err(MutationError::NotCapable("T".to_string())));
}

#[test]
fn test_section_cannot_move_under_section() {
    let registry = registry();
    let tree = Template::new("tpl", "index").with_sections([Section::new("A", "hero"), Section::new("B", "hero")]);

    let result = move_node(&tree, &registry, "A", Some("B"), None);
    assert!(matches!(result, Err(MutationError::NotCapable(_))));
}

#[test]
fn test_insert_under_missing_parent() {
    let registry = registry();
    let tree = Template::new("tpl", "index");
    let result = insert(&tree, &registry, Some("nope"), Node::Block(Block::new("b", "text")), None);
    assert_eq!(result, Err(MutationError::NotFound("nope".to_string())));
}

#[test]
fn test_insert_clamps_index_and_renumbers() {
    let registry = registry();
    let tree = Template::new("tpl", "index").with_sections([Section::new("S", "hero")
        .with_blocks([Block::new("a", "text"), Block::new("b", "text")])]);

    let tree = insert(&tree, &registry, Some("S"), Node::Block(Block::new("c", "text")), Some(1)).unwrap();
    let tree = insert(&tree, &registry, Some("S"), Node::Block(Block::new("d", "text")), Some(99)).unwrap();

    let section = tree.find_section("S").unwrap();
    let order: Vec<(&str, usize)> = section.blocks.iter().map(|b| (b.id.as_str(), b.position)).collect();
    assert_eq!(order, vec![("a", 0), ("c", 1), ("b", 2), ("d", 3)]);
}

#[test]
fn test_remove_cascades_and_renumbers() {
    let registry = registry();
    let tree = Template::new("tpl", "index").with_sections([Section::new("S", "hero").with_blocks([
        Block::new("G", "group").with_children([Block::new("X", "text")]),
        Block::new("T", "text"),
    ])]);

    let tree = remove(&tree, "G").unwrap();
    assert!(!tree.contains_id("X"));
    assert_eq!(tree.find_block("T").unwrap().position, 0);
    tree.check_invariants(&registry).unwrap();

    assert_eq!(remove(&tree, "G"), Err(MutationError::NotFound("G".to_string())));
}

#[test]
fn test_partial_reorder_rejected() {
    let tree = Template::new("tpl", "index").with_sections([
        Section::new("A", "hero"),
        Section::new("B", "hero"),
        Section::new("C", "hero"),
    ]);

    for payload in [ids(&["C", "A"]), ids(&["C", "A", "A"]), ids(&["C", "A", "Z"])] {
        let result = reorder_siblings(&tree, None, &payload);
        assert!(
            matches!(result, Err(MutationError::IncompleteSet { .. })),
            "payload {:?} should be rejected",
            payload
        );
    }
}

#[test]
fn test_mutation_enum_dispatch() {
    let registry = registry();
    let tree = Template::new("tpl", "index").with_sections([Section::new("A", "hero")]);

    let script: Vec<Mutation> = serde_json::from_str(
        r#"[
            { "op": "insert", "parentId": "A", "node": { "kind": "block", "id": "g", "type": "group" } },
            { "op": "insert", "parentId": "g", "node": { "kind": "block", "id": "t", "type": "text" } },
            { "op": "move", "nodeId": "t", "newParentId": "A", "index": 0 },
            { "op": "renameId", "oldId": "g", "newId": "srv-1" }
        ]"#,
    )
    .unwrap();

    let tree = script
        .iter()
        .try_fold(tree, |tree, mutation| mutation.apply(&tree, &registry))
        .unwrap();

    let section = tree.find_section("A").unwrap();
    let order: Vec<&str> = section.blocks.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(order, vec!["t", "srv-1"]);
    tree.check_invariants(&registry).unwrap();
}

#[test]
fn test_untouched_subtrees_are_shared() {
    let registry = registry();
    let tree = Template::new("tpl", "index").with_sections([
        Section::new("A", "hero").with_blocks([Block::new("x", "text")]),
        Section::new("B", "hero").with_blocks([Block::new("y", "text")]),
    ]);

    let next = insert(&tree, &registry, Some("A"), Node::Block(Block::new("z", "text")), None).unwrap();
    assert!(std::sync::Arc::ptr_eq(&tree.sections[1], &next.sections[1]));
    assert!(!std::sync::Arc::ptr_eq(&tree.sections[0], &next.sections[0]));
    assert_eq!(tree.find_section("A").unwrap().blocks.len(), 1);
}
