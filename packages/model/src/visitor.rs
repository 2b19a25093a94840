use crate::{Block, Section, Template};

/// Position of a block during a walk
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    pub section_id: &'a str,
    /// Owning section id for top-level blocks, container id otherwise
    pub parent_id: &'a str,
    /// 1 for top-level blocks; sections sit at depth 0
    pub depth: usize,
}

/// Visitor pattern for traversing the section/block tree immutably
///
/// Default implementations walk the entire tree in depth-first, sibling
/// order. Override specific visit_* methods to act on nodes.
pub trait Visitor: Sized {
    fn visit_template(&mut self, template: &Template) {
        walk_template(self, template);
    }

    fn visit_section(&mut self, section: &Section) {
        walk_section(self, section);
    }

    fn visit_block(&mut self, block: &Block, ctx: BlockContext<'_>) {
        walk_block(self, block, ctx);
    }
}

pub fn walk_template<V: Visitor>(visitor: &mut V, template: &Template) {
    for section in &template.sections {
        visitor.visit_section(section);
    }
}

pub fn walk_section<V: Visitor>(visitor: &mut V, section: &Section) {
    for block in &section.blocks {
        let ctx = BlockContext {
            section_id: &section.id,
            parent_id: &section.id,
            depth: 1,
        };
        visitor.visit_block(block, ctx);
    }
}

pub fn walk_block<V: Visitor>(visitor: &mut V, block: &Block, ctx: BlockContext<'_>) {
    for child in &block.children {
        let child_ctx = BlockContext {
            section_id: ctx.section_id,
            parent_id: &block.id,
            depth: ctx.depth + 1,
        };
        visitor.visit_block(child, child_ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DepthCollector(Vec<(String, usize)>);

    impl Visitor for DepthCollector {
        fn visit_section(&mut self, section: &Section) {
            self.0.push((section.id.clone(), 0));
            walk_section(self, section);
        }

        fn visit_block(&mut self, block: &Block, ctx: BlockContext<'_>) {
            self.0.push((block.id.clone(), ctx.depth));
            walk_block(self, block, ctx);
        }
    }

    #[test]
    fn test_walk_order_and_depth() {
        let template = Template::new("t", "index").with_sections([Section::new("s", "hero")
            .with_blocks([
                Block::new("g", "group").with_children([Block::new("x", "text")]),
                Block::new("y", "text"),
            ])]);

        let mut collector = DepthCollector(Vec::new());
        collector.visit_template(&template);

        let seen: Vec<(&str, usize)> = collector.0.iter().map(|(id, d)| (id.as_str(), *d)).collect();
        assert_eq!(seen, vec![("s", 0), ("g", 1), ("x", 2), ("y", 1)]);
    }
}
