//! # Dispatch Configuration
//!
//! Typed configuration for the dispatch engine. Every section has a `Default`
//! so a bare deployment runs with no files at all; files and environment
//! variables only override what they name.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dispatch_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let batch_size = manager.config().processing.batch_size;
//! let exchange = manager.config().queues.exchange_name("Worker1");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::queues;
use crate::models::{WorkerConfig, WorkflowConfig, WorkflowStep};
use crate::routing::RoutingSnapshot;

const WORKER_TYPE_PLACEHOLDER: &str = "{worker_type}";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub tenant: TenantConfig,
    pub queues: QueuesConfig,
    pub processing: ProcessingConfig,
    pub workers: WorkersConfig,
    pub settings: SettingsConfig,
    pub database: DatabaseConfig,
    pub session_events: SessionEventsConfig,
    pub routing: RoutingConfig,
}

impl DispatchConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tenant.name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "tenant.name",
                "tenant configuration",
            ));
        }

        if self.processing.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "processing.batch_size",
                "0",
                "batch size must be greater than 0",
            ));
        }

        if self.processing.page_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "processing.page_size",
                "0",
                "page size must be greater than 0",
            ));
        }

        if self.processing.scan_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "processing.scan_interval_seconds",
                "0",
                "scan interval must be greater than 0",
            ));
        }

        if !self
            .queues
            .worker_request_template
            .contains(WORKER_TYPE_PLACEHOLDER)
        {
            return Err(ConfigurationError::invalid_value(
                "queues.worker_request_template",
                self.queues.worker_request_template.clone(),
                format!("template must contain {WORKER_TYPE_PLACEHOLDER}"),
            ));
        }

        if self.workers.heartbeat_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "workers.heartbeat_ttl_seconds",
                "0",
                "heartbeat TTL must be greater than 0",
            ));
        }

        if self.session_events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "session_events.channel_capacity",
                "0",
                "channel capacity must be greater than 0",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Whether submissions of this content type are skipped on arrival
    pub fn is_skipped_content_type(&self, content_type: &str) -> bool {
        self.settings
            .skip_content_types
            .iter()
            .any(|skipped| skipped == content_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    pub name: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
        }
    }
}

/// Transport names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// Inbound originator submissions
    pub request_queue: String,
    /// Outbound originator responses
    pub response_queue: String,
    /// Inbound worker outcomes
    pub worker_response_queue: String,
    /// Per-worker inbound exchange name, `{worker_type}` is substituted
    pub worker_request_template: String,
    /// Dead letters of worker requests
    pub worker_request_dlq: String,
    pub heartbeat_queue: String,
    pub routing_key: String,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            request_queue: queues::REQUEST_QUEUE.to_string(),
            response_queue: queues::RESPONSE_QUEUE.to_string(),
            worker_response_queue: queues::WORKER_RESPONSE_QUEUE.to_string(),
            worker_request_template: queues::WORKER_REQUEST_TEMPLATE.to_string(),
            worker_request_dlq: queues::WORKER_REQUEST_DLQ.to_string(),
            heartbeat_queue: queues::HEARTBEAT_QUEUE.to_string(),
            routing_key: queues::ROUTING_KEY.to_string(),
        }
    }
}

impl QueuesConfig {
    /// Inbound exchange of a worker type. Worker types are matched
    /// case-insensitively by lower-casing them.
    pub fn exchange_name(&self, worker_type: &str) -> String {
        self.worker_request_template
            .replace(WORKER_TYPE_PLACEHOLDER, &worker_type.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Maximum messages read per consumer poll
    pub batch_size: usize,
    pub polling_interval_ms: u64,
    /// Period of the no-worker rescan
    pub scan_interval_seconds: u64,
    /// Page size used by rescans and operator actions
    pub page_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            polling_interval_ms: 250,
            scan_interval_seconds: 60,
            page_size: 1000,
        }
    }
}

impl ProcessingConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub heartbeat_ttl_seconds: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_seconds: 30,
        }
    }
}

impl WorkersConfig {
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_seconds)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Content types rejected as skipped on arrival
    pub skip_content_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL. Without it the engine keeps requests in memory.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEventsConfig {
    pub channel_capacity: usize,
}

impl Default for SessionEventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Static worker and workflow definitions loaded with the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub workers: Vec<WorkerConfig>,
    pub workflows: Vec<WorkflowDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_type: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default = "default_keep_errors")]
    pub keep_errors: bool,
}

fn default_keep_errors() -> bool {
    true
}

impl RoutingConfig {
    pub fn to_snapshot(&self) -> RoutingSnapshot {
        let workflows = self
            .workflows
            .iter()
            .map(|definition| {
                WorkflowConfig::new(definition.workflow_type.clone(), definition.steps.clone())
                    .with_keep_errors(definition.keep_errors)
            })
            .collect();
        RoutingSnapshot::new(self.workers.clone(), workflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DispatchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_exchange_name_lowercases_worker_type() {
        let queues = QueuesConfig::default();
        assert_eq!(
            queues.exchange_name("Worker1"),
            "dispatch.worker.worker1.request"
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DispatchConfig::default();
        config.processing.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));

        let mut config = DispatchConfig::default();
        config.queues.worker_request_template = "static.queue".to_string();
        assert!(config.validate().is_err());

        let mut config = DispatchConfig::default();
        config.workers.heartbeat_ttl_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_skipped_content_types() {
        let mut config = DispatchConfig::default();
        config.settings.skip_content_types = vec!["ignored".to_string()];
        assert!(config.is_skipped_content_type("ignored"));
        assert!(!config.is_skipped_content_type("ct"));
    }

    #[test]
    fn test_routing_snapshot_sorts_workflow_steps() {
        let routing = RoutingConfig {
            workers: vec![WorkerConfig::new("w1", ["ct"])],
            workflows: vec![WorkflowDefinition {
                workflow_type: "wf".to_string(),
                steps: vec![
                    WorkflowStep {
                        step_number: 2,
                        worker_type: "b".to_string(),
                    },
                    WorkflowStep {
                        step_number: 1,
                        worker_type: "a".to_string(),
                    },
                ],
                keep_errors: false,
            }],
        };
        let snapshot = routing.to_snapshot();
        assert_eq!(snapshot.workflows[0].first_step().unwrap().worker_type, "a");
        assert!(!snapshot.workflows[0].keep_errors);
    }
}
