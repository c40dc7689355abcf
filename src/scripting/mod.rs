mod bindings;
mod host;

pub use host::LuaPluginHost;
