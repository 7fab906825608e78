use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Advisory cancellation flag shared between a caller and a running task.
///
/// Setting it never interrupts I/O in progress; the task observes it at
/// its next check point and stops without rolling anything back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
