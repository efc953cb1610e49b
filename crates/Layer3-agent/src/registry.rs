//! Tool registry trait
//!
//! The engine sees tools through this seam: a definition list for the
//! provider request and an execute entry point. Concrete tool sets
//! (filesystem, shell, team coordination) implement it outside the
//! engine.

use async_trait::async_trait;
use ensemble_foundation::Result;
use ensemble_provider::ToolDef;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A named collection of executable tools
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Definitions of every tool in the registry
    fn definitions(&self) -> Vec<ToolDef>;

    /// Execute a tool by name. Implementations should watch the token
    /// and return `Error::Cancelled` when it fires mid-execution.
    async fn execute(&self, name: &str, input: Value, cancel: &CancellationToken)
        -> Result<String>;
}

/// Restrict `definitions` to an allow list, preserving registry order.
/// `None` means no restriction.
pub fn filter_definitions(definitions: Vec<ToolDef>, allowed: Option<&[String]>) -> Vec<ToolDef> {
    match allowed {
        None => definitions,
        Some(names) => definitions
            .into_iter()
            .filter(|def| names.iter().any(|n| n == &def.name))
            .collect(),
    }
}
