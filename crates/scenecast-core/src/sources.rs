//! Source registry types.
//!
//! A source is something that produces pixels: a capture device, a media
//! file, or another scene. Scene items reference sources by id.

use crate::geometry::Size;
use crate::scene::{SceneItem, Transform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("Invalid value for property {name}: {reason}")]
    InvalidProperty { name: String, reason: String },
    #[error("Duplicate property: {0}")]
    DuplicateProperty(String),
}

/// What kind of source this is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A scene used as a source. Shares its id with the scene.
    Scene,
    /// An engine-provided source, identified by the engine's type name.
    Capture(String),
}

/// One entry of a [`SourceProperty::List`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOption {
    pub label: String,
    pub value: String,
}

/// A configurable property of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceProperty {
    Boolean {
        name: String,
        description: String,
        value: bool,
    },
    Int {
        name: String,
        description: String,
        value: i64,
        min: i64,
        max: i64,
        step: i64,
    },
    Float {
        name: String,
        description: String,
        value: f64,
        min: f64,
        max: f64,
        step: f64,
    },
    Text {
        name: String,
        description: String,
        value: String,
        #[serde(default)]
        multiline: bool,
    },
    Path {
        name: String,
        description: String,
        value: String,
        /// File dialog filter, e.g. `"Images (*.png *.jpg)"`.
        #[serde(default)]
        filter: String,
    },
    List {
        name: String,
        description: String,
        value: String,
        options: Vec<ListOption>,
    },
    Color {
        name: String,
        description: String,
        /// `0xAARRGGBB`.
        value: u32,
    },
    Font {
        name: String,
        description: String,
        face: String,
        size: u32,
    },
    /// Triggers an engine action; carries no value.
    Button { name: String, description: String },
}

impl SourceProperty {
    pub fn name(&self) -> &str {
        match self {
            SourceProperty::Boolean { name, .. }
            | SourceProperty::Int { name, .. }
            | SourceProperty::Float { name, .. }
            | SourceProperty::Text { name, .. }
            | SourceProperty::Path { name, .. }
            | SourceProperty::List { name, .. }
            | SourceProperty::Color { name, .. }
            | SourceProperty::Font { name, .. }
            | SourceProperty::Button { name, .. } => name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            SourceProperty::Boolean { description, .. }
            | SourceProperty::Int { description, .. }
            | SourceProperty::Float { description, .. }
            | SourceProperty::Text { description, .. }
            | SourceProperty::Path { description, .. }
            | SourceProperty::List { description, .. }
            | SourceProperty::Color { description, .. }
            | SourceProperty::Font { description, .. }
            | SourceProperty::Button { description, .. } => description,
        }
    }

    /// Check that the value fits the property's constraints.
    pub fn validate(&self) -> Result<(), SourceError> {
        let invalid = |reason: String| {
            Err(SourceError::InvalidProperty { name: self.name().to_string(), reason })
        };
        match self {
            SourceProperty::Int { value, min, max, .. } if value < min || value > max => {
                invalid(format!("{value} is outside [{min}, {max}]"))
            }
            SourceProperty::Float { value, min, max, .. }
                if !value.is_finite() || value < min || value > max =>
            {
                invalid(format!("{value} is outside [{min}, {max}]"))
            }
            SourceProperty::List { value, options, .. }
                if !options.iter().any(|option| &option.value == value) =>
            {
                invalid(format!("{value} is not one of the listed options"))
            }
            SourceProperty::Font { size: 0, .. } => invalid("font size must be positive".to_string()),
            _ => Ok(()),
        }
    }
}

/// A registered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    id: String,
    name: String,
    kind: SourceKind,
    width: f64,
    height: f64,
    #[serde(default)]
    properties: Vec<SourceProperty>,
}

impl Source {
    /// The source side of a scene. Scene sources are as large as the canvas.
    pub fn scene(id: impl Into<String>, name: impl Into<String>, canvas: Size) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: SourceKind::Scene,
            width: canvas.width,
            height: canvas.height,
            properties: Vec::new(),
        }
    }

    /// An engine-provided source.
    pub fn capture(
        id: impl Into<String>,
        name: impl Into<String>,
        type_name: impl Into<String>,
        size: Size,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: SourceKind::Capture(type_name.into()),
            width: size.width,
            height: size.height,
            properties: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn is_scene(&self) -> bool {
        self.kind == SourceKind::Scene
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn properties(&self) -> &[SourceProperty] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&SourceProperty> {
        self.properties.iter().find(|property| property.name() == name)
    }

    pub(crate) fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_size(&mut self, size: Size) {
        self.width = size.width;
        self.height = size.height;
    }

    /// Replace the property list after validating every entry.
    pub fn set_properties(&mut self, properties: Vec<SourceProperty>) -> Result<(), SourceError> {
        for (index, property) in properties.iter().enumerate() {
            property.validate()?;
            if properties[..index].iter().any(|other| other.name() == property.name()) {
                return Err(SourceError::DuplicateProperty(property.name().to_string()));
            }
        }
        self.properties = properties;
        Ok(())
    }
}

/// A scene item together with the static fields of its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedView {
    pub scene_id: String,
    pub item_id: String,
    pub parent_id: Option<String>,
    pub source_id: String,
    pub name: String,
    pub kind: SourceKind,
    pub transform: Transform,
    pub visible: bool,
    pub locked: bool,
    pub width: f64,
    pub height: f64,
    pub scaled_width: f64,
    pub scaled_height: f64,
}

impl MergedView {
    pub fn new(scene_id: &str, item: &SceneItem, source: &Source) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            item_id: item.id().to_string(),
            parent_id: item.parent_id().map(str::to_string),
            source_id: source.id().to_string(),
            name: source.name().to_string(),
            kind: source.kind().clone(),
            transform: *item.transform(),
            visible: item.visible(),
            locked: item.locked(),
            width: item.width(),
            height: item.height(),
            scaled_width: item.scaled_width(),
            scaled_height: item.scaled_height(),
        }
    }
}
