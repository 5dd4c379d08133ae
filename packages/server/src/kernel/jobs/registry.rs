//! Processor registry.
//!
//! Maps each [`JobKind`] to the processor that executes it. The scheduler
//! iterates the registered kinds on every ready tick, so an unregistered
//! kind is simply never claimed.

use std::collections::HashMap;
use std::sync::Arc;

use super::job::JobKind;
use super::processor::JobProcessor;

#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobKind, Arc<dyn JobProcessor>>,
}

pub type SharedProcessorRegistry = Arc<ProcessorRegistry>;

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Register a processor for its kind.
    ///
    /// Panics on a duplicate registration: two processors for one kind is
    /// a wiring bug that must surface at startup, not at dispatch time.
    pub fn register(&mut self, processor: Arc<dyn JobProcessor>) {
        let kind = processor.kind();
        if self.processors.insert(kind, processor).is_some() {
            panic!("processor for job kind '{kind}' registered twice");
        }
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobProcessor>> {
        self.processors.get(&kind).cloned()
    }

    pub fn is_registered(&self, kind: JobKind) -> bool {
        self.processors.contains_key(&kind)
    }

    /// Registered kinds, in stable order.
    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.processors.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::AutomationError;
    use crate::kernel::jobs::job::Job;
    use async_trait::async_trait;

    struct NoopProcessor(JobKind);

    #[async_trait]
    impl JobProcessor for NoopProcessor {
        fn kind(&self) -> JobKind {
            self.0
        }

        async fn process(&self, _job: &Job) -> Result<String, AutomationError> {
            Ok("done".into())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(NoopProcessor(JobKind::Post)));

        assert!(registry.is_registered(JobKind::Post));
        assert!(!registry.is_registered(JobKind::Comment));
        assert!(registry.get(JobKind::Post).is_some());
        assert_eq!(registry.kinds(), vec![JobKind::Post]);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(NoopProcessor(JobKind::Post)));
        registry.register(Arc::new(NoopProcessor(JobKind::Post)));
    }
}
