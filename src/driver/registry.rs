//! Driver lookup by ecosystem identifier

use super::generic::GenericDriver;
use super::huggingface::HuggingFaceDriver;
use super::npm::NpmDriver;
use super::Driver;
use crate::error::{HermitError, HermitResult};
use crate::request::Flag;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Maps ecosystem identifiers to drivers
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<&'static str, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every driver shipped with hermit
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GenericDriver));
        registry.register(Arc::new(NpmDriver));
        registry.register(Arc::new(HuggingFaceDriver));
        registry
    }

    /// Add or replace a driver
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.ecosystem(), driver);
    }

    /// Identifiers of every registered driver
    pub fn ecosystems(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.drivers.keys().copied()
    }

    /// Find the driver for `ecosystem`, honoring the experimental gate
    pub fn resolve(&self, ecosystem: &str, flags: &BTreeSet<Flag>) -> HermitResult<Arc<dyn Driver>> {
        let driver = self.drivers.get(ecosystem).ok_or_else(|| {
            let supported: Vec<_> = self
                .drivers
                .values()
                .filter(|d| !d.is_experimental())
                .map(|d| d.ecosystem())
                .collect();
            HermitError::UnsupportedFeature {
                reason: format!("Package manager not supported: {}", ecosystem),
                solution: Some(format!(
                    "Supported package managers: {}",
                    supported.join(", ")
                )),
            }
        })?;

        if driver.is_experimental() && !flags.contains(&Flag::DevPackageManagers) {
            return Err(HermitError::UnsupportedFeature {
                reason: format!("Package manager '{}' is experimental", ecosystem),
                solution: Some("Pass --dev-package-managers to enable it.".to_string()),
            });
        }

        Ok(Arc::clone(driver))
    }
}
