use std::path::PathBuf;

use async_trait::async_trait;
use rp_compiler::{CompiledRule, DeclarativeSink, InstallError};

/// Stands in for the host filter engine by writing the compiled table to a
/// JSON file, replacing whatever was there.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DeclarativeSink for FileSink {
    async fn install(&self, rules: Vec<CompiledRule>) -> Result<(), InstallError> {
        let text = serde_json::to_string_pretty(&rules).map_err(|e| InstallError::Rejected(e.to_string()))?;
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| InstallError::Rejected(format!("{}: {}", self.path.display(), e)))
    }
}
