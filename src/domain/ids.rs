/// Identity for a `Load` within a single optimizer run. Minted by a
/// run-scoped `IdAllocator` rather than an instance-wide mutable counter, so
/// two concurrent `BuildLoads` calls never share or race over an id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadId(u64);

impl LoadId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// A throwaway id for loads built speculatively during candidate
    /// evaluation and discarded before ever entering an `ActiveSet` (the id
    /// is overwritten with a real `IdAllocator`-minted one on commit).
    pub fn default_placeholder() -> Self {
        LoadId(u64::MAX)
    }
}

impl std::fmt::Display for LoadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn next(&mut self) -> LoadId {
        let id = LoadId(self.next);
        self.next += 1;
        id
    }
}
