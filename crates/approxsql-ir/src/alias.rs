use rustc_hash::FxHashSet;

pub const DEFAULT_ALIAS_PREFIX: &str = "vt";

/// Per-statement alias sequence. Owned by a session and reset for each
/// top-level statement, so numbering never leaks between statements.
#[derive(Debug, Clone)]
pub struct AliasGenerator {
    prefix: String,
    next: usize,
    taken: FxHashSet<String>,
}

impl Default for AliasGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ALIAS_PREFIX)
    }
}

impl AliasGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
            taken: FxHashSet::default(),
        }
    }

    /// Next unused alias, skipping names reserved by the query itself.
    pub fn next_alias(&mut self) -> String {
        loop {
            let candidate = format!("{}{}", self.prefix, self.next);
            self.next += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Marks a user-written alias as used.
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_lowercase());
    }

    pub fn reset(&mut self) {
        self.next = 1;
        self.taken.clear();
    }

    pub fn issued(&self) -> usize {
        self.next - 1
    }
}
