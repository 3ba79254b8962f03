//! Tool interface

use async_trait::async_trait;

use crate::signal::AbortSignal;
use crate::Result;

/// A capability an agent can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, args: serde_json::Value, signal: &AbortSignal) -> Result<String>;
}
