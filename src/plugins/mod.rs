use anyhow::{Context, Result};
use log::info;

use crate::registry::Registry;

pub mod lights;

pub use lights::LightPlugin;

/// Unit of game logic that publishes into and reads from a [`Registry`].
pub trait Plugin {
    /// Registry name the plugin publishes under.
    fn name(&self) -> &str;

    /// Wires the plugin's subscriptions and shared types into `registry`.
    fn install(&self, registry: &Registry) -> Result<()>;
}

/// Ordered collection of plugins installed into one registry.
#[derive(Default)]
pub struct PluginSet {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, plugin: impl Plugin + 'static) -> Self {
        self.push(plugin);
        self
    }

    pub fn push(&mut self, plugin: impl Plugin + 'static) {
        self.plugins.push(Box::new(plugin));
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Installs every plugin in order, stopping at the first failure.
    pub fn install_all(&self, registry: &Registry) -> Result<usize> {
        for plugin in &self.plugins {
            info!("installing plugin {}", plugin.name());
            plugin
                .install(registry)
                .with_context(|| format!("failed to install plugin {}", plugin.name()))?;
        }
        Ok(self.plugins.len())
    }
}

/// Plugins that ship with the runtime.
pub fn builtin_plugins() -> PluginSet {
    PluginSet::new()
        .with(LightPlugin::spotlight())
        .with(LightPlugin::point_light())
}
