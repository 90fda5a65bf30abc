use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::json;
use strider_core::traits::Pipeline;
use strider_core::{
    CrawlerError, Item, Mid, Module, ModuleBase, ModuleSummary, ModuleType,
    calculate_score_simple,
};

/// One processing step. Returns the (possibly rewritten) item.
pub type ItemProcessor = Arc<dyn Fn(Item) -> Result<Item, CrawlerError> + Send + Sync>;

/// Pipeline module running every item through an ordered list of processors.
///
/// A failing step leaves the item unchanged for the next step. With
/// fail-fast set, processing stops at the first failure instead.
pub struct ProcessorPipeline {
    base: ModuleBase,
    processors: Vec<ItemProcessor>,
    fail_fast: AtomicBool,
}

impl ProcessorPipeline {
    pub fn new(id: Mid, processors: Vec<ItemProcessor>) -> Result<Self, CrawlerError> {
        if id.module_type() != ModuleType::Pipeline {
            return Err(CrawlerError::illegal_parameter(format!(
                "MID {id} does not identify a pipeline"
            )));
        }
        if processors.is_empty() {
            return Err(CrawlerError::illegal_parameter("empty item processor list"));
        }
        Ok(Self {
            base: ModuleBase::new(id, Some(calculate_score_simple)),
            processors,
            fail_fast: AtomicBool::new(false),
        })
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }
}

impl Module for ProcessorPipeline {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn summary(&self) -> ModuleSummary {
        self.base.summary(Some(json!({
            "fail_fast": self.fail_fast(),
            "processor_number": self.processors.len(),
        })))
    }
}

#[async_trait]
impl Pipeline for ProcessorPipeline {
    async fn send(&self, item: Item) -> Vec<CrawlerError> {
        let call = self.base.begin();
        call.accept();

        let fail_fast = self.fail_fast();
        let mut errors = Vec::new();
        let mut current = item;
        for (step, process) in self.processors.iter().enumerate() {
            match process(current.clone()) {
                Ok(next) => current = next,
                Err(e) => {
                    tracing::debug!(mid = %self.id(), step, error = %e, "Item processor failed");
                    errors.push(e.tag_with(Some(self.id())));
                    if fail_fast {
                        break;
                    }
                }
            }
        }

        if errors.is_empty() {
            call.complete();
        }
        errors
    }

    fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::Relaxed)
    }

    fn set_fail_fast(&self, fail_fast: bool) {
        self.fail_fast.store(fail_fast, Ordering::Relaxed);
    }
}
