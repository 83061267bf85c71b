//! Factories for the in-memory adapters.

use std::sync::Arc;

use polystore_core::{
    PersistenceError, PersistenceResult, Provider, ProviderConfig, ProviderFactory,
    TechnologyType,
};

use crate::provider::MemoryProvider;

/// Builds [`MemoryProvider`]s of one technology.
#[derive(Debug, Clone, Copy)]
pub struct MemoryProviderFactory {
    technology: TechnologyType,
}

impl MemoryProviderFactory {
    /// Factory for `technology`.
    #[must_use]
    pub const fn new(technology: TechnologyType) -> Self {
        Self { technology }
    }
}

impl ProviderFactory for MemoryProviderFactory {
    fn technology(&self) -> TechnologyType {
        self.technology
    }

    fn create(&self, config: &ProviderConfig) -> PersistenceResult<Arc<dyn Provider>> {
        if config.technology != self.technology {
            return Err(PersistenceError::Configuration(format!(
                "provider '{}' is {}, factory builds {}",
                config.name, config.technology, self.technology
            )));
        }
        if config.name.trim().is_empty() {
            return Err(PersistenceError::Configuration(
                "provider name must not be empty".into(),
            ));
        }
        Ok(Arc::new(MemoryProvider::new(config.clone())))
    }
}

/// One in-memory factory per technology.
#[must_use]
pub fn default_factories() -> Vec<Arc<dyn ProviderFactory>> {
    TechnologyType::ALL
        .into_iter()
        .map(|t| Arc::new(MemoryProviderFactory::new(t)) as Arc<dyn ProviderFactory>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_factory_per_technology() {
        let factories = default_factories();
        assert_eq!(factories.len(), TechnologyType::ALL.len());
        let mut techs: Vec<_> = factories.iter().map(|f| f.technology()).collect();
        techs.sort();
        techs.dedup();
        assert_eq!(techs.len(), TechnologyType::ALL.len());
    }

    #[test]
    fn mismatched_technology_rejected() {
        let factory = MemoryProviderFactory::new(TechnologyType::Graph);
        let err = factory
            .create(&ProviderConfig::new("pg", TechnologyType::Relational))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "configuration");
    }
}
