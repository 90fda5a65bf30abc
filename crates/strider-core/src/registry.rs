use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::CrawlerError;
use crate::mid::Mid;
use crate::module::{ModuleInstance, ModuleType};
use crate::sync::{read, write};

/// Picks one module out of the registered candidates of a type.
pub trait SelectionStrategy: Send + Sync {
    /// `candidates` is non-empty and sorted by MID.
    fn select<'a>(&self, candidates: &'a [ModuleInstance]) -> Option<&'a ModuleInstance>;
}

/// Fewest in-flight calls first, then lowest score, then lowest MID.
///
/// Scores from [`calculate_score_simple`](crate::calculate_score_simple)
/// grow with every call a module has served, so the lower one is the
/// less-loaded module.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl SelectionStrategy for LeastLoaded {
    fn select<'a>(&self, candidates: &'a [ModuleInstance]) -> Option<&'a ModuleInstance> {
        candidates.iter().min_by(|a, b| {
            let (a, b) = (a.module(), b.module());
            a.handling_number()
                .cmp(&b.handling_number())
                .then_with(|| a.score().cmp(&b.score()))
                .then_with(|| a.id().cmp(b.id()))
        })
    }
}

/// Registered modules keyed by MID.
pub struct ModuleRegistry {
    modules: RwLock<BTreeMap<Mid, ModuleInstance>>,
    strategy: Arc<dyn SelectionStrategy>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_strategy(Arc::new(LeastLoaded))
    }

    pub fn with_strategy(strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self {
            modules: RwLock::new(BTreeMap::new()),
            strategy,
        }
    }

    /// Returns `Ok(false)` if a module with the same MID is already present.
    pub fn register(&self, module: impl Into<ModuleInstance>) -> Result<bool, CrawlerError> {
        let module = module.into();
        let id = module.id().clone();
        if id.module_type() != module.module_type() {
            return Err(CrawlerError::TypeMismatch(format!(
                "module {id} is registered as {} but its MID encodes {}",
                module.module_type(),
                id.module_type()
            )));
        }
        let mut modules = write(&self.modules);
        if modules.contains_key(&id) {
            return Ok(false);
        }
        tracing::info!(mid = %id, module_type = %module.module_type(), "Module registered");
        modules.insert(id, module);
        Ok(true)
    }

    pub fn unregister(&self, mid: &Mid) -> bool {
        write(&self.modules).remove(mid).is_some()
    }

    /// Selects one module of the given type.
    pub fn get(&self, module_type: ModuleType) -> Result<ModuleInstance, CrawlerError> {
        let candidates = self.get_all_by_type(module_type);
        if candidates.is_empty() {
            return Err(CrawlerError::ModuleNotFound(module_type));
        }
        self.strategy
            .select(&candidates)
            .cloned()
            .ok_or(CrawlerError::ModuleNotFound(module_type))
    }

    /// All modules of one type, sorted by MID.
    pub fn get_all_by_type(&self, module_type: ModuleType) -> Vec<ModuleInstance> {
        read(&self.modules)
            .values()
            .filter(|m| m.module_type() == module_type)
            .cloned()
            .collect()
    }

    pub fn get_all(&self) -> BTreeMap<Mid, ModuleInstance> {
        read(&self.modules).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.modules).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        write(&self.modules).clear();
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &read(&self.modules).keys().collect::<Vec<_>>())
            .finish()
    }
}
