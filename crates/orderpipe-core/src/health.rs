//! Health check system for monitoring pipeline stage status.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

/// Component names registered by the pipeline.
pub mod components {
    /// Stream reader stage
    pub const STREAM: &str = "stream";
    /// Batcher stage
    pub const BATCHER: &str = "batcher";
    /// Enrichment stage (invoker + bisection)
    pub const ENRICHMENT: &str = "enrichment";
    /// Event publisher
    pub const PUBLISHER: &str = "publisher";
    /// Rule router and sinks
    pub const ROUTER: &str = "router";

    /// All pipeline components.
    pub const ALL: [&str; 5] = [STREAM, BATCHER, ENRICHMENT, PUBLISHER, ROUTER];
}

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Component is healthy
    Healthy,
    /// Component is degraded but operational
    Degraded(String),
    /// Component is unhealthy
    Unhealthy(String),
    /// Component status is unknown
    Unknown,
}

/// Overall system health status.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// System is unhealthy
    Unhealthy,
}

/// Health check manager for tracking component health.
pub struct HealthCheck {
    components: RwLock<HashMap<String, ComponentStatus>>,
    started_at: RwLock<Option<Instant>>,
    pipeline_running: RwLock<bool>,
}

impl HealthCheck {
    /// Create a new health check manager.
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            started_at: RwLock::new(None),
            pipeline_running: RwLock::new(false),
        }
    }

    /// Create a health check with every pipeline component registered.
    pub fn for_pipeline() -> Self {
        let health = Self::new();
        for name in components::ALL {
            health.register_component(name);
        }
        health
    }

    /// Register a component to track.
    pub fn register_component(&self, name: &str) {
        let mut components = self.components.write();
        components.insert(name.to_string(), ComponentStatus::Unknown);
    }

    /// Mark a component as healthy.
    pub fn mark_healthy(&self, name: &str) {
        let mut components = self.components.write();
        components.insert(name.to_string(), ComponentStatus::Healthy);
    }

    /// Mark a component as degraded.
    pub fn mark_degraded(&self, name: &str, reason: &str) {
        let mut components = self.components.write();
        components.insert(
            name.to_string(),
            ComponentStatus::Degraded(reason.to_string()),
        );
    }

    /// Mark a component as unhealthy.
    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        let mut components = self.components.write();
        components.insert(
            name.to_string(),
            ComponentStatus::Unhealthy(reason.to_string()),
        );
    }

    /// Get the status of a specific component.
    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        let components = self.components.read();
        components.get(name).cloned()
    }

    /// Get all component statuses.
    pub fn get_all_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.components.read().clone()
    }

    /// Get overall system health status.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Check if the system is operational (healthy or degraded).
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status(),
            HealthStatus::Healthy | HealthStatus::Degraded
        )
    }

    /// Mark the pipeline as started.
    pub fn pipeline_started(&self) {
        *self.started_at.write() = Some(Instant::now());
        *self.pipeline_running.write() = true;
    }

    /// Mark the pipeline as stopped.
    pub fn pipeline_stopped(&self) {
        *self.pipeline_running.write() = false;
    }

    /// Check if the pipeline is running.
    pub fn is_pipeline_running(&self) -> bool {
        *self.pipeline_running.read()
    }

    /// Seconds since the pipeline was started.
    pub fn uptime_seconds(&self) -> Option<u64> {
        self.started_at.read().map(|t| t.elapsed().as_secs())
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}
