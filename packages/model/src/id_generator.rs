use crc32fast::Hasher;

use crate::Template;

/// Derive a short stable seed from a template id using CRC32
pub fn template_seed(template_id: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(template_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Sequential generator for temporary, client-side node ids
///
/// Ids look like `tmp-<seed>-<n>`. The persistence collaborator later hands
/// back the canonical id, which replaces the temporary one.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    seed: String,
    count: u32,
}

impl IdGenerator {
    pub fn new(template_id: &str) -> Self {
        Self {
            seed: template_seed(template_id),
            count: 0,
        }
    }

    pub fn from_seed(seed: String) -> Self {
        Self { seed, count: 0 }
    }

    /// Generate next sequential ID
    pub fn new_id(&mut self) -> String {
        self.count += 1;
        format!("tmp-{}-{}", self.seed, self.count)
    }

    /// Next id that does not already occur in `template`
    pub fn fresh_id(&mut self, template: &Template) -> String {
        loop {
            let id = self.new_id();
            if !template.contains_id(&id) {
                return id;
            }
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}
