//! Breaker registry
//!
//! Hands out one breaker per name. The registry is an ordinary value: build
//! one at startup and pass it (usually behind an `Arc`) to whatever needs
//! breakers.

use super::circuit::{BreakerHealth, CircuitBreaker};
use super::config::CircuitBreakerConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Name-keyed collection of circuit breakers
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: RwLock<CircuitBreakerConfig>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry with default breaker settings
    pub fn new() -> Self {
        Self::with_default_config(CircuitBreakerConfig::default())
    }

    /// Create an empty registry that builds breakers from `config`
    pub fn with_default_config(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config: RwLock::new(config),
        }
    }

    /// Return the breaker registered under `name`, creating it if needed
    ///
    /// A supplied config is only used on creation, and its name is replaced
    /// with `name`.
    pub fn get_or_create(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return Arc::clone(existing);
        }

        let mut breakers = self.breakers.write();
        // Another caller may have won the race between the two locks
        if let Some(existing) = breakers.get(name) {
            return Arc::clone(existing);
        }

        let mut config = config.unwrap_or_else(|| self.default_config.read().clone());
        config.name = name.to_string();

        let breaker = Arc::new(CircuitBreaker::new(config));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        info!(name = %name, total = breakers.len(), "Registered circuit breaker");
        breaker
    }

    /// Look up an existing breaker
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Remove a breaker, returning it if it was registered
    ///
    /// Holders of the removed breaker keep using it; the next
    /// `get_or_create` under the same name builds a fresh one.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let removed = self.breakers.write().remove(name);
        if removed.is_some() {
            debug!(name = %name, "Removed circuit breaker");
        }
        removed
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered breakers
    pub fn all(&self) -> HashMap<String, Arc<CircuitBreaker>> {
        self.breakers.read().clone()
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Config used for breakers created without one
    pub fn set_default_config(&self, config: CircuitBreakerConfig) {
        *self.default_config.write() = config;
    }

    pub fn default_config(&self) -> CircuitBreakerConfig {
        self.default_config.read().clone()
    }

    /// Health of every breaker, sorted by name
    pub fn health(&self) -> Vec<BreakerHealth> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.read().values().cloned().collect();
        let mut health: Vec<BreakerHealth> = breakers.iter().map(|b| b.health()).collect();
        health.sort_by(|a, b| a.name.cmp(&b.name));
        health
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("db", None);
        let b = registry.get_or_create("db", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_supplied_config_takes_registry_name() {
        let registry = CircuitBreakerRegistry::new();
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::named("something-else")
        };
        let breaker = registry.get_or_create("api", Some(config));
        assert_eq!(breaker.name(), "api");
        assert_eq!(breaker.config().failure_threshold, 2);
    }

    #[test]
    fn test_default_config_applies_to_new_breakers() {
        let registry = CircuitBreakerRegistry::new();
        registry.set_default_config(CircuitBreakerConfig {
            timeout: Duration::from_secs(5),
            ..CircuitBreakerConfig::default()
        });
        let breaker = registry.get_or_create("cache", None);
        assert_eq!(breaker.config().timeout, Duration::from_secs(5));
        assert_eq!(breaker.name(), "cache");
    }

    #[test]
    fn test_remove_and_recreate() {
        let registry = CircuitBreakerRegistry::new();
        let first = registry.get_or_create("db", None);
        assert!(registry.remove("db").is_some());
        assert!(registry.get("db").is_none());
        assert!(registry.remove("db").is_none());

        let second = registry.get_or_create("db", None);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_health_sorted_by_name() {
        let registry = CircuitBreakerRegistry::new();
        registry.get_or_create("zeta", None);
        registry.get_or_create("alpha", None);
        registry.get_or_create("mid", None);

        let names: Vec<String> = registry.health().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.names(), names);
    }

    #[test]
    fn test_concurrent_first_access_creates_one() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("shared", None))
            })
            .collect();

        let breakers: Vec<Arc<CircuitBreaker>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
        assert_eq!(registry.len(), 1);
    }
}
