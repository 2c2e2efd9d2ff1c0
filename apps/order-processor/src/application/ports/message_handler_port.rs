//! Message Handler Port (Driver Port)
//!
//! Consumers hand decoded envelopes to handlers registered per event kind.
//! Handlers must be idempotent: the same message may arrive more than once.

use async_trait::async_trait;

use crate::application::dto::EventMessage;
use crate::application::execution::ExecutionContext;
use crate::error::ExecutionError;

/// Processes one decoded message.
///
/// `Ok` acknowledges the delivery. A retryable error requeues it until the
/// retry budget is spent; any other error dead-letters it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a message.
    async fn handle(&self, ctx: &ExecutionContext, message: &EventMessage)
    -> Result<(), ExecutionError>;
}
