// ! Metrics collection for modswap
// !
// ! Module provides counters for lifecycle operations, scan ticks and
// ! update checks. A collector is owned by the service that records into
// ! it; there is no process-wide instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::error::PlugError;

/// Metrics collector for lifecycle and update operations
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    /// Lifecycle operations by kind and outcome
    lifecycle_counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
    /// Error counters by category
    error_counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
    /// Update check results by result type
    update_counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lifecycle operation (`load`, `unload`, `reload`, ...)
    pub async fn record_lifecycle(&self, operation: &str, success: bool) {
        let key = format!("modswap_lifecycle_total:operation={operation}:success={success}");
        self.increment_counter(&self.lifecycle_counters, &key).await;

        debug!(
            target: "modswap_metrics",
            operation = operation,
            success = success,
            "Lifecycle operation recorded"
        );
    }

    /// Record an error occurrence
    pub async fn record_error(&self, error: &PlugError, context: &str) {
        let category = error.category();
        let key = format!("modswap_errors_total:category={category}:context={context}");
        self.increment_counter(&self.error_counters, &key).await;

        let category_key = format!("modswap_errors_by_category:{category}");
        self.increment_counter(&self.error_counters, &category_key)
            .await;
    }

    /// Record the outcome of one update check
    pub async fn record_update_check(&self, module: &str, result: &str) {
        let key = format!("modswap_update_checks_total:module={module}:result={result}");
        self.increment_counter(&self.update_counters, &key).await;
    }

    /// Get lifecycle counters
    pub async fn get_lifecycle_metrics(&self) -> HashMap<String, u64> {
        Self::snapshot(&self.lifecycle_counters).await
    }

    /// Get error counters
    pub async fn get_error_metrics(&self) -> HashMap<String, u64> {
        Self::snapshot(&self.error_counters).await
    }

    /// Get update check counters
    pub async fn get_update_metrics(&self) -> HashMap<String, u64> {
        Self::snapshot(&self.update_counters).await
    }

    /// Sum of all counters whose key contains `needle`
    pub async fn count_matching(&self, needle: &str) -> u64 {
        let mut total = 0;
        for counters in [
            &self.lifecycle_counters,
            &self.error_counters,
            &self.update_counters,
        ] {
            total += counters
                .read()
                .await
                .iter()
                .filter(|(k, _)| k.contains(needle))
                .map(|(_, v)| v.load(Ordering::Relaxed))
                .sum::<u64>();
        }
        total
    }

    /// Reset all metrics (useful for testing)
    pub async fn reset(&self) {
        self.lifecycle_counters.write().await.clear();
        self.error_counters.write().await.clear();
        self.update_counters.write().await.clear();

        warn!(target: "modswap_metrics", "Metrics collector reset");
    }

    async fn snapshot(counters: &Arc<RwLock<HashMap<String, AtomicU64>>>) -> HashMap<String, u64> {
        counters
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    async fn increment_counter(
        &self,
        counters: &Arc<RwLock<HashMap<String, AtomicU64>>>,
        key: &str,
    ) {
        let mut counters_guard = counters.write().await;
        let counter = counters_guard
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
