//! Worker and workflow routing configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maps content types to the worker type handling them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_type: String,
    /// Content types this worker accepts as input
    pub content_types: BTreeSet<String>,
    /// Keep failed requests for operator inspection instead of deleting them
    #[serde(default = "default_keep_errors")]
    pub keep_errors: bool,
}

fn default_keep_errors() -> bool {
    true
}

impl WorkerConfig {
    pub fn new<I, S>(worker_type: impl Into<String>, content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            worker_type: worker_type.into(),
            content_types: content_types.into_iter().map(Into::into).collect(),
            keep_errors: true,
        }
    }

    pub fn with_keep_errors(mut self, keep_errors: bool) -> Self {
        self.keep_errors = keep_errors;
        self
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        self.content_types.contains(content_type)
    }
}

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_number: i32,
    pub worker_type: String,
}

/// An ordered sequence of worker steps, selected by content type equal to
/// `workflow_type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub workflow_type: String,
    steps: Vec<WorkflowStep>,
    /// Overrides the per-worker policy for requests running inside the workflow
    #[serde(default = "default_keep_errors")]
    pub keep_errors: bool,
}

impl WorkflowConfig {
    /// Build a workflow; steps are kept sorted by step number
    pub fn new(workflow_type: impl Into<String>, mut steps: Vec<WorkflowStep>) -> Self {
        steps.sort_by_key(|step| step.step_number);
        Self {
            workflow_type: workflow_type.into(),
            steps,
            keep_errors: true,
        }
    }

    /// Build a workflow numbering the given worker types from zero
    pub fn from_worker_types<I, S>(workflow_type: impl Into<String>, worker_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = worker_types
            .into_iter()
            .enumerate()
            .map(|(index, worker_type)| WorkflowStep {
                step_number: index as i32,
                worker_type: worker_type.into(),
            })
            .collect();
        Self::new(workflow_type, steps)
    }

    pub fn with_keep_errors(mut self, keep_errors: bool) -> Self {
        self.keep_errors = keep_errors;
        self
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }

    pub fn step(&self, step_number: i32) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.step_number == step_number)
    }

    /// The step following `step_number` in ascending order
    pub fn next_step_after(&self, step_number: i32) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.step_number > step_number)
    }

    pub fn uses_worker_type(&self, worker_type: &str) -> bool {
        self.steps.iter().any(|step| step.worker_type == worker_type)
    }
}
