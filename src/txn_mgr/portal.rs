use tracing::debug;

/// The per-transaction scratch scope: result cursors opened
/// by the current command plus a byte-accounted allocation
/// region. Bounded by begin-statement / end-statement; torn
/// down wholesale at transaction end.
#[derive(Debug, Default)]
pub struct Portal {
    cursors: Vec<String>,
    scratch_bytes: usize,
    active: bool,
}

impl Portal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction start: switch allocations into the portal
    /// scope.
    pub fn at_start(&mut self) {
        self.active = true;
        self.cursors.clear();
        self.scratch_bytes = 0;
    }

    pub fn open_cursor(&mut self, name: &str) {
        self.cursors.push(name.to_string());
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    /// Close every open result cursor; commit and abort both
    /// run this before touching durable state.
    pub fn close_cursors(&mut self) {
        if !self.cursors.is_empty() {
            debug!(count = self.cursors.len(), "closing result cursors");
        }
        self.cursors.clear();
    }

    pub fn alloc(&mut self, bytes: usize) {
        self.scratch_bytes += bytes;
    }

    pub fn allocated(&self) -> usize {
        self.scratch_bytes
    }

    /// Transaction end: discard the region and fall back to
    /// the worker-lifetime scope.
    pub fn at_end(&mut self) {
        self.active = false;
        self.cursors.clear();
        self.scratch_bytes = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
