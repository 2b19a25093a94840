//! Property tests for the mutation engine

use std::collections::HashMap;

use pagecraft_editor::mutations::{insert, move_node, remove, reorder_siblings};
use pagecraft_editor::{flatten, unflatten, MutationError};
use pagecraft_model::{Block, Node, Section, StaticRegistry, Template};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Shape {
    container: bool,
    children: Vec<Shape>,
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        Just(Shape { container: false, children: vec![] }),
        Just(Shape { container: true, children: vec![] }),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(|children| Shape {
            container: true,
            children,
        })
    })
}

fn template() -> impl Strategy<Value = Template> {
    prop::collection::vec(prop::collection::vec(shape(), 0..4), 1..4).prop_map(build)
}

fn build(sections: Vec<Vec<Shape>>) -> Template {
    fn block(shape: &Shape, next: &mut usize) -> Block {
        *next += 1;
        let block_type = if shape.container { "group" } else { "text" };
        let id = format!("b{}", next);
        let children: Vec<Block> = shape.children.iter().map(|c| block(c, next)).collect();
        Block::new(id, block_type).with_children(children)
    }

    let mut next = 0;
    let sections: Vec<Section> = sections
        .iter()
        .enumerate()
        .map(|(i, shapes)| {
            let blocks: Vec<Block> = shapes.iter().map(|s| block(s, &mut next)).collect();
            Section::new(format!("s{}", i), "hero").with_blocks(blocks)
        })
        .collect();
    Template::new("tpl", "index").with_sections(sections)
}

fn registry() -> StaticRegistry {
    StaticRegistry::new().container("group").leaf("text")
}

/// Parent of every node, computed from the flat view
fn parents(tree: &Template) -> HashMap<String, Option<String>> {
    flatten(tree)
        .into_iter()
        .map(|entry| (entry.id().to_string(), entry.parent_id))
        .collect()
}

fn is_descendant_or_self(parents: &HashMap<String, Option<String>>, ancestor: &str, node: &str) -> bool {
    let mut current = Some(node.to_string());
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = parents.get(&id).cloned().flatten();
    }
    false
}

#[derive(Debug, Clone)]
enum Op {
    Insert { parent: usize, section: bool },
    Remove { node: usize },
    Move { node: usize, parent: usize, index: usize },
    Reverse { parent: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), any::<bool>()).prop_map(|(parent, section)| Op::Insert { parent, section }),
        any::<usize>().prop_map(|node| Op::Remove { node }),
        (any::<usize>(), any::<usize>(), 0usize..5).prop_map(|(node, parent, index)| Op::Move { node, parent, index }),
        any::<usize>().prop_map(|parent| Op::Reverse { parent }),
    ]
}

fn apply(tree: &Template, registry: &StaticRegistry, op: &Op, fresh: usize) -> Result<Template, MutationError> {
    let ids = tree.all_ids();
    let pick = |i: usize| ids.get(i % ids.len().max(1)).map(String::as_str);
    match op {
        Op::Insert { section: true, .. } => {
            insert(tree, registry, None, Node::Section(Section::new(format!("n{}", fresh), "hero")), None)
        }
        Op::Insert { parent, section: false } => insert(
            tree,
            registry,
            pick(*parent),
            Node::Block(Block::new(format!("n{}", fresh), "text")),
            Some(0),
        ),
        Op::Remove { node } => match pick(*node) {
            Some(id) => remove(tree, id),
            None => Err(MutationError::NotFound(String::new())),
        },
        Op::Move { node, parent, index } => match pick(*node) {
            Some(id) => move_node(tree, registry, id, pick(*parent), Some(*index)),
            None => Err(MutationError::NotFound(String::new())),
        },
        Op::Reverse { parent } => {
            let parent = if *parent % 3 == 0 { None } else { pick(*parent) };
            let mut children = tree.child_ids(parent).unwrap_or_default();
            children.reverse();
            reorder_siblings(tree, parent, &children)
        }
    }
}

proptest! {
    #[test]
    fn prop_invariants_hold_after_any_sequence(tree in template(), ops in prop::collection::vec(op(), 1..20)) {
        let registry = registry();
        tree.check_invariants(&registry).unwrap();

        let mut tree = tree;
        for (i, op) in ops.iter().enumerate() {
            let before = tree.clone();
            match apply(&tree, &registry, op, i) {
                Ok(next) => {
                    prop_assert!(next.check_invariants(&registry).is_ok(), "{:?} broke invariants", op);
                    tree = next;
                }
                Err(_) => {
                    prop_assert_eq!(&tree, &before);
                }
            }
        }
    }

    #[test]
    fn prop_move_into_own_subtree_rejected(tree in template()) {
        let registry = registry();
        let parents = parents(&tree);
        let ids = tree.all_ids();

        for node in &ids {
            for target in ids.iter().filter(|t| is_descendant_or_self(&parents, node, t)) {
                let result = move_node(&tree, &registry, node, Some(target.as_str()), None);
                let is_cycle = matches!(result, Err(MutationError::CircularReference { .. }));
                prop_assert!(is_cycle, "moving {} under {} was not rejected", node, target);
            }
        }
    }

    #[test]
    fn prop_reorder_is_bijection(tree in template(), keys in prop::collection::vec(any::<u32>(), 16)) {
        let mut parents: Vec<Option<String>> = vec![None];
        parents.extend(tree.all_ids().into_iter().map(Some));

        for parent in parents {
            let Some(children) = tree.child_ids(parent.as_deref()) else { continue };
            let mut ordered: Vec<(u32, String)> = children
                .into_iter()
                .enumerate()
                .map(|(i, id)| (keys[i % keys.len()], id))
                .collect();
            ordered.sort();
            let ordered: Vec<String> = ordered.into_iter().map(|(_, id)| id).collect();

            let next = reorder_siblings(&tree, parent.as_deref(), &ordered).unwrap();
            prop_assert_eq!(next.child_ids(parent.as_deref()).unwrap(), ordered);
            prop_assert!(next.check_invariants(&registry()).is_ok());
        }
    }

    #[test]
    fn prop_flatten_unflatten_round_trip(tree in template()) {
        let rebuilt = unflatten(&tree.id, &tree.template_type, flatten(&tree)).unwrap();
        prop_assert_eq!(rebuilt, tree);
    }
}
