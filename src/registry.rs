//! Host-side selection among candidate processors.

use std::path::Path;

use tracing::debug;

use crate::processor::AutoIngestProcessor;

#[derive(Default)]
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn AutoIngestProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Box<dyn AutoIngestProcessor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Highest-scoring processor for `path`. Zero scores are ineligible;
    /// ties go to the processor registered first.
    pub fn select(&self, path: &Path) -> Option<(&dyn AutoIngestProcessor, u8)> {
        let mut best: Option<(&dyn AutoIngestProcessor, u8)> = None;
        for processor in &self.processors {
            let score = processor.can_process(path);
            debug!(
                "{} scored {score} for {}",
                processor.data_source_type(),
                path.display()
            );
            if score == 0 {
                continue;
            }
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((processor.as_ref(), score));
            }
        }
        best
    }
}
