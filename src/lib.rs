//! Plugin registry runtime for the Cosmos space game.
//!
//! Independently loaded plugins publish named values into a [`Registry`]
//! and subscribe to values published by others through [`ChangeTracker`]
//! cells, so producers and consumers never import each other. Rust plugins
//! implement [`Plugin`]; Lua plugins run inside a [`LuaPluginHost`] and see
//! the same registry through the `runtime` global.

pub mod keys;
pub mod plugins;
pub mod registry;
pub mod scene;
pub mod scripting;
pub mod tracker;

pub use keys::CoreStatus;
pub use plugins::{builtin_plugins, LightPlugin, Plugin, PluginSet};
pub use registry::{
    DynamicTracker, Registry, RegistryError, RegistryView, ScriptConstructor, Trackable, TrackedKey,
    ViewKind,
};
pub use scene::{Light, LightConstructor, LightKind, Scene, SceneObject};
pub use scripting::LuaPluginHost;
pub use tracker::{ChangeTracker, Subscription};
