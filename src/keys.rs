//! Well-known registry names used across the game's plugins.
//!
//! These constants only give the names a static value type; the registry
//! never validates names against this list and plugins are free to track
//! any other string.

use serde::{Deserialize, Serialize};

use crate::registry::TrackedKey;
use crate::scene::{Light, Scene};

/// Published once the runtime has finished loading plugins.
pub const CORE: TrackedKey<CoreStatus> = TrackedKey::new("core");
pub const LEVEL_SCENE: TrackedKey<Scene> = TrackedKey::new("levelScene");
pub const SPOTLIGHT: TrackedKey<Light> = TrackedKey::new("spotlight");
pub const POINT_LIGHT: TrackedKey<Light> = TrackedKey::new("pointLight");

/// Shared type name of the [`Light`] constructor.
pub const LIGHT_TYPE: &str = "Light";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoreStatus {
    pub ready: bool,
}
