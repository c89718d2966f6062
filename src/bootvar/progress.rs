use log::info;

/// Observer notified after every completed repetition.
///
/// Calls may arrive from several threads and out of repetition order;
/// `completed` counts finished repetitions so far.
pub trait Progress: Sync {
    /// `completed` of `total` repetitions have finished.
    fn repetition_done(&self, completed: usize, total: usize);
}

impl<F> Progress for F
where
    F: Fn(usize, usize) + Sync,
{
    fn repetition_done(&self, completed: usize, total: usize) {
        self(completed, total);
    }
}

/// Reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Progress for Silent {
    fn repetition_done(&self, _completed: usize, _total: usize) {}
}

/// Logs at `info` level every `every` repetitions.
#[derive(Debug, Clone, Copy)]
pub struct LogProgress {
    /// Repetitions between messages; 0 disables logging.
    pub every: usize,
    /// Log at all.
    pub enabled: bool,
}

impl LogProgress {
    /// Log every `every` repetitions when `enabled`.
    pub fn new(every: usize, enabled: bool) -> Self {
        Self { every, enabled }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10, false)
    }
}

impl Progress for LogProgress {
    fn repetition_done(&self, completed: usize, total: usize) {
        if self.enabled && self.every > 0 && completed % self.every == 0 {
            info!("bootstrap repetition {completed}/{total}");
        }
    }
}
