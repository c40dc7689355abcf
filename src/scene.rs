use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

/// Cone angle given to spotlights that do not specify one, in degrees.
pub const DEFAULT_SPOT_ANGLE: f32 = 30.0;

/// Level scene published to plugins under the `levelScene` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub lights: Vec<Light>,
}

impl Scene {
    /// Parses the level XML exported by the level editor.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let objects = document
            .descendants()
            .filter(|node| node.has_tag_name("object"))
            .map(|node| parse_object(&node))
            .collect::<Result<Vec<_>>>()?;

        let lights = objects
            .iter()
            .filter(|object| object.object_type == "light")
            .map(Light::from_object)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { objects, lights })
    }

    /// First light of the requested kind, in document order.
    pub fn first_light(&self, kind: LightKind) -> Option<&Light> {
        self.lights.iter().find(|light| light.kind == kind)
    }
}

/// Object entry of a level scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default = "default_color")]
    pub color: Vec3,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
}

impl Default for SceneObject {
    fn default() -> Self {
        Self {
            name: String::new(),
            object_type: String::new(),
            color: default_color(),
            position: Vec3::ZERO,
            intensity: default_intensity(),
            kind: None,
            angle: None,
        }
    }
}

fn default_color() -> Vec3 {
    Vec3::ONE
}

fn default_intensity() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightKind {
    Point,
    Spot,
}

impl LightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Spot => "spot",
        }
    }
}

impl fmt::Display for LightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LightKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "point" => Ok(Self::Point),
            "spot" | "spotlight" => Ok(Self::Spot),
            other => Err(anyhow!("unknown light kind `{other}`")),
        }
    }
}

/// Constructor signature published under the `Light` shared type.
pub type LightConstructor = fn(LightKind, Vec3, Vec3, f32) -> Light;

/// Light description handed to the light plugins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub kind: LightKind,
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
}

impl Light {
    pub fn new(kind: LightKind, position: Vec3, color: Vec3, intensity: f32) -> Self {
        let angle = match kind {
            LightKind::Spot => Some(DEFAULT_SPOT_ANGLE),
            LightKind::Point => None,
        };
        Self {
            kind,
            position,
            color,
            intensity,
            angle,
        }
    }

    fn from_object(object: &SceneObject) -> Result<Self> {
        let kind = match object.kind.as_deref() {
            Some(kind) => kind
                .parse()
                .with_context(|| format!("light `{}`", object.name))?,
            None => LightKind::Point,
        };
        let mut light = Self::new(kind, object.position, object.color, object.intensity);
        if kind == LightKind::Spot {
            light.angle = object.angle.or(light.angle);
        }
        Ok(light)
    }
}

fn parse_object(node: &Node<'_, '_>) -> Result<SceneObject> {
    let name = child_text(node, "name").ok_or_else(|| anyhow!("<name> tag is missing"))?;
    let defaults = SceneObject::default();
    let context = || format!("object `{name}`");

    Ok(SceneObject {
        object_type: child_text(node, "type").unwrap_or_else(|| "mesh".to_string()),
        color: parse_triple(child_text(node, "color"))
            .with_context(context)?
            .map(|rgb| rgb / 255.0)
            .unwrap_or(defaults.color),
        position: parse_triple(child_text(node, "position"))
            .with_context(context)?
            .unwrap_or(defaults.position),
        intensity: parse_number(child_text(node, "intensity"))
            .with_context(context)?
            .unwrap_or(defaults.intensity),
        kind: child_text(node, "kind"),
        angle: parse_number(child_text(node, "angle")).with_context(context)?,
        name,
    })
}

fn child_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn parse_triple(value: Option<String>) -> Result<Option<Vec3>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let components = value
        .split_whitespace()
        .map(|component| {
            component
                .parse::<f32>()
                .map_err(|err| anyhow!("bad component `{component}`: {err}"))
        })
        .collect::<Result<Vec<_>>>()?;
    match components.as_slice() {
        [x, y, z] => Ok(Some(Vec3::new(*x, *y, *z))),
        other => bail!("expected 3 components, found {}", other.len()),
    }
}

fn parse_number(value: Option<String>) -> Result<Option<f32>> {
    value
        .map(|value| {
            value
                .parse::<f32>()
                .map_err(|err| anyhow!("failed to parse float `{value}`: {err}"))
        })
        .transpose()
}
