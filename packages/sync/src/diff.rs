use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pagecraft_model::Section;

use crate::PreviewMessage;

/// Messages that bring a receiver holding `old` to `new`
///
/// When the surviving sections changed relative order the whole list is
/// replaced with a single `SECTIONS_REORDER`. Otherwise deletions come
/// first, then additions at their final index, then full-value updates for
/// sections whose content differs.
pub fn diff_sections(old: &[Arc<Section>], new: &[Arc<Section>]) -> Vec<PreviewMessage> {
    let old_ids: HashSet<&str> = old.iter().map(|s| s.id.as_str()).collect();
    let new_ids: HashSet<&str> = new.iter().map(|s| s.id.as_str()).collect();

    let surviving_old: Vec<&str> = old
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| new_ids.contains(id))
        .collect();
    let surviving_new: Vec<&str> = new
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| old_ids.contains(id))
        .collect();

    if surviving_old != surviving_new {
        return vec![PreviewMessage::SectionsReorder {
            sections: new.to_vec(),
        }];
    }

    let mut messages = Vec::new();

    for section in old.iter().filter(|s| !new_ids.contains(s.id.as_str())) {
        messages.push(PreviewMessage::SectionDelete {
            section_id: section.id.clone(),
        });
    }

    for (index, section) in new.iter().enumerate() {
        if !old_ids.contains(section.id.as_str()) {
            messages.push(PreviewMessage::SectionAdd {
                section: Arc::clone(section),
                index: Some(index),
            });
        }
    }

    let previous: HashMap<&str, &Arc<Section>> =
        old.iter().map(|s| (s.id.as_str(), s)).collect();
    for section in new {
        let Some(before) = previous.get(section.id.as_str()) else {
            continue;
        };
        if Arc::ptr_eq(before, section) || before.as_ref() == section.as_ref() {
            continue;
        }
        messages.push(PreviewMessage::section_update(section));
    }

    messages
}
