//! Task dispatcher routes typed task requests to registered handlers.
//!
//! `TaskKind` is a closed set: a request and its outcome are variants of the
//! same kind, so callers match on a typed result instead of downcasting.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::tasks::status::{StatusReassessmentRequest, StatusReassessmentResult, StatusReassessmentTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    DetermineStatus,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::DetermineStatus => "determine_status",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "determine_status" => Ok(TaskKind::DetermineStatus),
            other => Err(AppError::UnknownTaskType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskRequest {
    DetermineStatus(StatusReassessmentRequest),
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::DetermineStatus(_) => TaskKind::DetermineStatus,
        }
    }

    /// Decodes an untyped payload for `kind`.
    pub fn from_payload(kind: TaskKind, payload: Value) -> Result<Self, AppError> {
        match kind {
            TaskKind::DetermineStatus => serde_json::from_value(payload)
                .map(TaskRequest::DetermineStatus)
                .map_err(|e| AppError::Validation(format!("invalid {kind} payload: {e}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskOutcome {
    DetermineStatus(StatusReassessmentResult),
}

impl TaskOutcome {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskOutcome::DetermineStatus(_) => TaskKind::DetermineStatus,
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, request: TaskRequest) -> Result<TaskOutcome, AppError>;
}

#[derive(Default)]
pub struct TaskDispatcher {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher with every built-in handler registered.
    pub fn with_builtin_handlers() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(TaskKind::DetermineStatus, Arc::new(StatusReassessmentTask));
        dispatcher
    }

    /// Registers `handler` for `kind`, returning any handler it replaces.
    pub fn register(
        &mut self,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.insert(kind, handler)
    }

    pub async fn dispatch(&self, request: TaskRequest) -> Result<TaskOutcome, AppError> {
        let kind = request.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| AppError::UnknownTaskType(kind.to_string()))?;

        debug!("Dispatching {} task", kind);
        let outcome = handler.handle(request).await?;
        if outcome.kind() != kind {
            error!("Handler for {} returned a {} outcome", kind, outcome.kind());
            return Err(AppError::Internal(anyhow::anyhow!(
                "handler for {kind} returned a mismatched outcome"
            )));
        }
        Ok(outcome)
    }

    /// Entry point for untyped callers: resolves the kind name and decodes the payload.
    pub async fn dispatch_named(&self, kind: &str, payload: Value) -> Result<TaskOutcome, AppError> {
        let kind: TaskKind = kind.parse()?;
        self.dispatch(TaskRequest::from_payload(kind, payload)?).await
    }
}
