//! Patch payloads and the merge protocol for settings documents.
//!
//! A payload is one of two shapes:
//!
//! ```text
//! { "fullReorder": true, "newOrder": ["a", "b"] }          -> Reorder
//! { "imageId": "a", "units"?, "isFill"?, "caption"?, "order"? }  -> Fields
//! ```
//!
//! `fullReorder: true` wins over every other key. Anything that is neither
//! shape is rejected. A `null` value is treated the same as a missing key.

use crate::types::{ImageId, ImageSettings, SettingsDocument};
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("payload must contain either `fullReorder: true` with `newOrder`, or `imageId`")]
    UnknownShape,

    #[error("invalid `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingsPatch {
    /// Replace the display order wholesale.
    Reorder { new_order: Vec<ImageId> },
    /// Merge fields into the settings of one image.
    Fields(FieldUpdate),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldUpdate {
    pub image_id: ImageId,
    pub units: Option<u32>,
    pub is_fill: Option<bool>,
    pub caption: Option<String>,
    /// Target position in the display order. Clamped into range on apply.
    pub order: Option<i64>,
}

impl FieldUpdate {
    pub fn new<S: Into<ImageId>>(image_id: S) -> Self {
        FieldUpdate {
            image_id: image_id.into(),
            ..Default::default()
        }
    }
}

impl TryFrom<Value> for SettingsPatch {
    type Error = PayloadError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(fields) = value else {
            return Err(PayloadError::NotAnObject);
        };

        if fields.get("fullReorder") == Some(&Value::Bool(true)) {
            let new_order = match present(&fields, "newOrder") {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_owned)
                            .ok_or(invalid("newOrder", "entries must be strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => return Err(invalid("newOrder", "expected an array of image ids")),
                None => return Err(invalid("newOrder", "required with `fullReorder`")),
            };
            return Ok(SettingsPatch::Reorder { new_order });
        }

        let image_id = match present(&fields, "imageId") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(_) => return Err(invalid("imageId", "expected a non-empty string")),
            None => return Err(PayloadError::UnknownShape),
        };

        let units = present(&fields, "units")
            .map(|value| {
                as_integer(value)
                    .filter(|units| *units > 0)
                    .and_then(|units| u32::try_from(units).ok())
                    .ok_or(invalid("units", "expected a positive integer"))
            })
            .transpose()?;

        let is_fill = present(&fields, "isFill")
            .map(|value| value.as_bool().ok_or(invalid("isFill", "expected a boolean")))
            .transpose()?;

        let caption = present(&fields, "caption")
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_owned)
                    .ok_or(invalid("caption", "expected a string"))
            })
            .transpose()?;

        let order = present(&fields, "order")
            .map(|value| as_integer(value).ok_or(invalid("order", "expected an integer")))
            .transpose()?;

        Ok(SettingsPatch::Fields(FieldUpdate {
            image_id,
            units,
            is_fill,
            caption,
            order,
        }))
    }
}

fn present<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|value| !value.is_null())
}

fn invalid(field: &'static str, reason: &'static str) -> PayloadError {
    PayloadError::InvalidField { field, reason }
}

// Browsers may send integral floats such as `4.0`.
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

impl SettingsDocument {
    /// Applies `patch` in place. Never fails: every well-formed patch is
    /// valid against every document, including the empty one.
    pub fn apply(&mut self, patch: SettingsPatch) {
        match patch {
            SettingsPatch::Reorder { new_order } => self.image_order = new_order,
            SettingsPatch::Fields(update) => self.apply_fields(update),
        }
    }

    fn apply_fields(&mut self, update: FieldUpdate) {
        let FieldUpdate {
            image_id,
            units,
            is_fill,
            caption,
            order,
        } = update;

        let entry = self
            .image_settings
            .entry(image_id.clone())
            .or_insert_with(|| ImageSettings::for_new_image(&image_id));

        if let Some(units) = units {
            entry.units = Some(units);
        }
        if let Some(is_fill) = is_fill {
            entry.is_fill = Some(is_fill);
        }
        if let Some(caption) = caption {
            entry.caption = Some(caption);
        }

        if let Some(order) = order {
            self.image_order.retain(|id| *id != image_id);
            let index = order.clamp(0, self.image_order.len() as i64) as usize;
            self.image_order.insert(index, image_id);
        }
    }
}
