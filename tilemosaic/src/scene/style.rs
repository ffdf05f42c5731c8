//! Stylesheet documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ConfigError;

/// Layer types the vector paint pipeline never draws.
const UNPAINTABLE_LAYER_TYPES: [&str; 2] = ["raster", "background"];

/// A style document: named sources and an ordered list of layers.
///
/// Only the structure needed for orchestration is modelled; everything else
/// in a layer is carried in `layout`/`paint` as raw JSON for the renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stylesheet {
    #[serde(default)]
    pub sources: Map<String, Value>,
    #[serde(default)]
    pub layers: Vec<StyleLayer>,
}

/// One layer of a [`Stylesheet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleLayer {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        rename = "source-layer",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default)]
    pub layout: Map<String, Value>,
    #[serde(default)]
    pub paint: Map<String, Value>,
}

impl StyleLayer {
    /// Whether the vector pipeline can paint this layer at all.
    pub fn is_paintable(&self) -> bool {
        !UNPAINTABLE_LAYER_TYPES.contains(&self.kind.as_str())
    }

    /// Layout visibility; anything but `"none"` counts as visible.
    pub fn is_visible(&self) -> bool {
        self.layout.get("visibility").and_then(Value::as_str) != Some("none")
    }
}

impl Stylesheet {
    /// Parse a stylesheet from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a stylesheet from an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Source names, sorted.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}
