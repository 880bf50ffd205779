use crate::types::ToolArgs;
use async_trait::async_trait;

/// External contract this crate consumes rather than reinvents: given a tool
/// name and its arguments, run the tool and return its flattened text result.
/// The literal substring `isError=True` inside that text is the ground truth
/// for failure everywhere downstream (the Assessor, the Polling Driver, the
/// Scheduler) — concrete adapters are responsible for producing it from
/// whatever structured error signal their transport actually carries.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool_name: &str, args: &ToolArgs) -> Result<String, String>;
}
