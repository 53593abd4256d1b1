#[derive(Debug, Clone)]
pub struct Parameters {
    pub(crate) slice_budget: usize,
    pub(crate) collect_every: Option<usize>,
    pub(crate) max_objects: Option<usize>,
}

/// Creates a default `Parameters` with `slice_budget` set to 64, and with neither an allocation
/// trigger nor a heap limit.
impl Default for Parameters {
    fn default() -> Parameters {
        const SLICE_BUDGET: usize = 64;

        Parameters {
            slice_budget: SLICE_BUDGET,
            collect_every: None,
            max_objects: None,
        }
    }
}

impl Parameters {
    /// The number of gray objects an incremental slice will blacken before returning control to
    /// the mutator. Must be >= 1.
    pub fn set_slice_budget(mut self, slice_budget: usize) -> Parameters {
        assert!(slice_budget >= 1);
        self.slice_budget = slice_budget;
        self
    }

    /// Run a full collection once this many objects have been allocated since the last completed
    /// collection. `None` disables allocation triggered collection entirely. Must be >= 1.
    pub fn set_collect_every(mut self, collect_every: Option<usize>) -> Parameters {
        assert!(collect_every.map_or(true, |n| n >= 1));
        self.collect_every = collect_every;
        self
    }

    /// The maximum number of live objects. An allocation that would exceed the limit first runs a
    /// full collection, and fails if that does not make room.
    pub fn set_max_objects(mut self, max_objects: Option<usize>) -> Parameters {
        self.max_objects = max_objects;
        self
    }

    pub fn slice_budget(&self) -> usize {
        self.slice_budget
    }

    pub fn collect_every(&self) -> Option<usize> {
        self.collect_every
    }

    pub fn max_objects(&self) -> Option<usize> {
        self.max_objects
    }
}
