mod manifest;
mod recorder;

pub use manifest::{EventStatus, ManifestEvent, RunManifest};
pub use recorder::{
    MANIFEST_FILE_NAME, ManifestError, ModelCall, ToolCall, TraceRecorder, truncate_preview,
};
