use anyhow::{Context, Result};
use glam::Vec3;
use log::debug;
use serde_json::Value as JsonValue;

use crate::keys::{self, LIGHT_TYPE};
use crate::registry::{Registry, TrackedKey};
use crate::scene::{Light, LightConstructor, LightKind, Scene};
use crate::tracker::Subscription;

use super::Plugin;

/// Publishes the level's first light of one kind.
///
/// The plugin stays idle until `core` is published, then follows every
/// `levelScene` change. Scenes without a matching light leave the published
/// value as it was.
#[derive(Debug, Clone, Copy)]
pub struct LightPlugin {
    kind: LightKind,
    key: TrackedKey<Light>,
}

impl LightPlugin {
    pub fn spotlight() -> Self {
        Self {
            kind: LightKind::Spot,
            key: keys::SPOTLIGHT,
        }
    }

    pub fn point_light() -> Self {
        Self {
            kind: LightKind::Point,
            key: keys::POINT_LIGHT,
        }
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }
}

impl Plugin for LightPlugin {
    fn name(&self) -> &str {
        self.key.name()
    }

    fn install(&self, registry: &Registry) -> Result<()> {
        registry.set_scripted_type(LIGHT_TYPE, Light::new as LightConstructor, light_from_json);

        let core = registry.tracker_for(keys::CORE)?;
        let scene = registry.tracker_for(keys::LEVEL_SCENE)?;
        let output = registry.tracker_for(self.key)?;
        let kind = self.kind;

        core.subscribe(Subscription::Once, move |_| {
            let output = output.clone();
            scene.subscribe(Subscription::EveryChange, move |scene: &Scene| {
                match scene.first_light(kind) {
                    Some(light) => output.set_value(*light),
                    None => debug!("level scene has no {kind} light"),
                }
            });
        });
        Ok(())
    }
}

/// Script entry point of the `Light` type: `Light(kind, position, color, intensity)`.
fn light_from_json(args: Vec<JsonValue>) -> Result<JsonValue> {
    let (kind, position, color, intensity): (LightKind, Vec3, Vec3, f32) =
        serde_json::from_value(JsonValue::Array(args))
            .context("expected (kind, position, color, intensity)")?;
    let light = Light::new(kind, position, color, intensity);
    Ok(serde_json::to_value(light)?)
}
