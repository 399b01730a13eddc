//! Shared, immutable wiring for one ledger tree.

use std::fmt;
use std::sync::Arc;

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::observer::LedgerObserver;
use crate::strategy::{
    AcceptAll, BlockValidator, ChainPriority, LoadSignal, StablePriority, StaticLoad,
};

/// Configuration, policies and observers shared by every chain of a tree.
///
/// Built once before the tree starts; nothing in it changes afterwards.
pub struct LedgerContext {
    pub config: LedgerConfig,
    pub validator: Box<dyn BlockValidator>,
    pub load: Box<dyn LoadSignal>,
    pub priority: Box<dyn ChainPriority>,
    pub observers: Vec<Arc<dyn LedgerObserver>>,
}

impl LedgerContext {
    /// Accept-all validation, no resharding, [`StablePriority`] from config.
    #[must_use]
    pub fn new(config: LedgerConfig) -> Self {
        let priority = StablePriority {
            min_finalized_blocks: config.priority.min_finalized_blocks,
        };
        Self {
            config,
            validator: Box::new(AcceptAll),
            load: Box::new(StaticLoad),
            priority: Box::new(priority),
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: impl BlockValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    #[must_use]
    pub fn with_load(mut self, load: impl LoadSignal + 'static) -> Self {
        self.load = Box::new(load);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: impl ChainPriority + 'static) -> Self {
        self.priority = Box::new(priority);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn LedgerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Validate the configuration before the context is shared.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfig`] from [`LedgerConfig::validate`].
    pub fn validated(self) -> Result<Arc<Self>, LedgerError> {
        self.config.validate()?;
        Ok(Arc::new(self))
    }
}

impl Default for LedgerContext {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl fmt::Debug for LedgerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerContext")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
