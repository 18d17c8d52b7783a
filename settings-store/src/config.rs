use serde::Deserialize;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("filesystem settings store requires a non-empty base_dir")]
    EmptyBaseDir,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum BackendType {
    Filesystem { base_dir: PathBuf },
    Memory,
    Noop,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SettingsStoreConfig {
    #[serde(flatten)]
    pub r#type: BackendType,
}

impl SettingsStoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.r#type {
            BackendType::Filesystem { base_dir } if base_dir.as_os_str().is_empty() => {
                Err(ValidationError::EmptyBaseDir)
            }
            _ => Ok(()),
        }
    }
}
