use thiserror::Error;

use crate::application::tooling::ToolInvokeError;

/// Only unrecoverable transport failures abort the loop; everything else is
/// absorbed as context and lands in the manifest.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("tool transport failure: {0}")]
    Transport(#[from] ToolInvokeError),
}
