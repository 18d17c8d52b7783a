use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ImageId = String;

/// Display settings of a single image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSettings {
    /// Display width in layout units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<u32>,
    /// Crop to fill the block instead of letterboxing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fill: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl ImageSettings {
    /// Settings of an image seen for the first time. The caption starts out
    /// as the image id.
    pub fn for_new_image(image_id: &str) -> Self {
        ImageSettings {
            caption: Some(image_id.to_string()),
            ..Default::default()
        }
    }

    /// The caption, falling back to the image id for entries written
    /// without one.
    pub fn caption_or<'a>(&'a self, image_id: &'a str) -> &'a str {
        self.caption.as_deref().unwrap_or(image_id)
    }
}

/// Per-project settings document.
///
/// Serialized with the legacy `settings` key so documents written by older
/// servers stay readable; `imageSettings` is accepted on input as well.
/// `image_order` is maintained independently of `image_settings`: an id can
/// appear in one and not the other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(rename = "settings", alias = "imageSettings", default)]
    pub image_settings: IndexMap<ImageId, ImageSettings>,
    #[serde(rename = "imageOrder", default)]
    pub image_order: Vec<ImageId>,
}

impl SettingsDocument {
    pub fn is_empty(&self) -> bool {
        self.image_settings.is_empty() && self.image_order.is_empty()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid project id {0:?}")]
pub struct InvalidProjectId(pub String);

/// Identifier of a project, safe to use as a single path component.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new<S: Into<String>>(raw: S) -> Result<Self, InvalidProjectId> {
        let raw = raw.into();
        let is_valid = !raw.is_empty()
            && raw != "."
            && raw != ".."
            && !raw.contains(['/', '\\', '\0']);

        if is_valid {
            Ok(ProjectId(raw))
        } else {
            Err(InvalidProjectId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
