//! Operation context for correlating the log lines of one bulk operation.
//!
//! A refresh batch or a start-level change touches many bundles, possibly
//! from a worker thread. Entering an [`OperationContext`] span tags every
//! lifecycle log line emitted inside it with the same correlation id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation data for one framework operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Unique id of this operation.
    pub operation_id: Uuid,
    /// Shared by an operation and all of its children.
    pub correlation_id: Uuid,
    /// The operation that spawned this one, if any.
    pub parent_id: Option<Uuid>,
    /// When the operation started.
    pub started_at: DateTime<Utc>,
    /// Component that started the operation (e.g. `refresh`).
    pub component: String,
    /// Operation name (e.g. `refresh_bundles`).
    pub operation: Option<String>,
    /// Free-form fields, such as the target start level.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl OperationContext {
    /// Start a new, uncorrelated operation.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            operation_id: id,
            correlation_id: id,
            parent_id: None,
            started_at: Utc::now(),
            component: component.into(),
            operation: None,
            fields: BTreeMap::new(),
        }
    }

    /// Start a child operation sharing this one's correlation id.
    #[must_use]
    pub fn child(&self, component: impl Into<String>) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            parent_id: Some(self.operation_id),
            started_at: Utc::now(),
            component: component.into(),
            operation: None,
            fields: self.fields.clone(),
        }
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attach a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    /// Milliseconds since the operation started.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// First eight characters of the operation id.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.operation_id.simple().to_string().chars().take(8).collect()
    }

    /// A span carrying this context's ids.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "operation",
            operation_id = %self.short_id(),
            correlation_id = %self.correlation_id,
            component = %self.component,
            operation = self.operation.as_deref(),
        )
    }

    /// Enter the span and log start/completion around the guard's lifetime.
    #[must_use]
    pub fn enter(self) -> OperationGuard {
        OperationGuard::new(self)
    }
}

/// Keeps an operation span entered; logs the elapsed time when dropped.
pub struct OperationGuard {
    context: OperationContext,
    _span: tracing::span::EnteredSpan,
}

impl OperationGuard {
    fn new(context: OperationContext) -> Self {
        let span = context.span().entered();
        tracing::debug!(fields = ?context.fields, "Operation started");
        Self {
            context,
            _span: span,
        }
    }

    /// The context this guard was created from.
    #[must_use]
    pub fn context(&self) -> &OperationContext {
        &self.context
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        tracing::debug!(elapsed_ms = self.context.elapsed_ms(), "Operation completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_its_own_correlation() {
        let ctx = OperationContext::new("refresh");
        assert_eq!(ctx.operation_id, ctx.correlation_id);
        assert!(ctx.parent_id.is_none());
        assert_eq!(ctx.component, "refresh");
    }

    #[test]
    fn test_child_inherits_correlation_and_fields() {
        let parent = OperationContext::new("start_level")
            .with_operation("set_start_level")
            .with_field("target", 3);
        let child = parent.child("lifecycle");

        assert_ne!(child.operation_id, parent.operation_id);
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.parent_id, Some(parent.operation_id));
        assert_eq!(child.fields.get("target").map(String::as_str), Some("3"));
        assert!(child.operation.is_none());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(OperationContext::new("x").short_id().len(), 8);
    }

    #[test]
    fn test_guard_exposes_context() {
        let guard = OperationContext::new("refresh")
            .with_operation("refresh_bundles")
            .enter();
        assert_eq!(guard.context().operation.as_deref(), Some("refresh_bundles"));
        assert!(guard.context().elapsed_ms() >= 0);
    }

    #[test]
    fn test_serialization() {
        let ctx = OperationContext::new("refresh").with_field("bundles", "1,2");
        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"component\":\"refresh\""));

        let parsed: OperationContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.fields, ctx.fields);
    }
}
