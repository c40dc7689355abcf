use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use log::info;
use mlua::Lua;

use crate::registry::Registry;

use super::bindings::register_globals;

/// Runs Lua plugin scripts against a shared [`Registry`].
///
/// All scripts share one Lua state, so a callback registered by one plugin
/// may run while another plugin's script is executing.
pub struct LuaPluginHost {
    lua: Rc<Lua>,
    registry: Registry,
}

impl LuaPluginHost {
    pub fn new(registry: Registry) -> Result<Self> {
        let lua = Rc::new(Lua::new());
        register_globals(&lua, &registry)
            .map_err(anyhow::Error::from)
            .context("failed to register Lua globals")?;
        Ok(Self { lua, registry })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Executes a single plugin script.
    pub fn run_source(&self, name: &str, source: &str) -> Result<()> {
        info!("running plugin script {name}");
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(anyhow::Error::from)
            .with_context(|| format!("plugin script {name} failed"))
    }

    /// Runs every `*.lua` file in `dir` in file-name order and returns how
    /// many scripts were executed.
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let scripts = plugin_scripts(dir)?;
        for path in &scripts {
            let source = fs::read_to_string(path)
                .with_context(|| format!("unable to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            self.run_source(&name, &source)?;
        }
        info!("ran {} plugin script(s) from {}", scripts.len(), dir.display());
        Ok(scripts.len())
    }
}

fn plugin_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("unable to list {}", dir.display()))?;
    let mut scripts = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("unable to list {}", dir.display()))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "lua") {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{self, CoreStatus};
    use crate::plugins::{LightPlugin, Plugin};
    use crate::tracker::Subscription;
    use serde_json::{json, Value as JsonValue};
    use std::cell::RefCell;

    fn host() -> LuaPluginHost {
        LuaPluginHost::new(Registry::new()).unwrap()
    }

    fn value_of(host: &LuaPluginHost, name: &str) -> Option<JsonValue> {
        host.registry().find(name)?.value().unwrap()
    }

    #[test]
    fn script_publishes_into_registry() {
        let host = host();
        host.run_source(
            "galaxy.lua",
            r#"runtime:get_tracked("galaxy"):set_value({ systems = 3 })"#,
        )
        .unwrap();
        assert_eq!(value_of(&host, "galaxy"), Some(json!({ "systems": 3 })));
    }

    #[test]
    fn script_waits_for_typed_core_value() {
        let host = host();
        let core = host.registry().tracker_for(keys::CORE).unwrap();
        host.run_source(
            "hud.lua",
            r#"
            runtime:get_tracked("core"):get_once(function(status)
                runtime:get_tracked("hud"):set_value({ visible = status.ready })
            end)
            "#,
        )
        .unwrap();
        assert_eq!(value_of(&host, "hud"), None);

        core.set_value(CoreStatus { ready: true });
        assert_eq!(value_of(&host, "hud"), Some(json!({ "visible": true })));
    }

    #[test]
    fn once_and_every_change_from_lua() {
        let host = host();
        host.run_source(
            "counter.lua",
            r#"
            local once_calls, every_calls = 0, 0
            local score = runtime:get_tracked("score")
            score:get_once(function() once_calls = once_calls + 1 end)
            score:subscribe("every_change", function(v)
                every_calls = every_calls + 1
                runtime:get_tracked("last"):set_value(v)
            end)
            score:set_value(1)
            score:set_value(2)
            score:set_value(2)
            runtime:get_tracked("calls"):set_value({ once = once_calls, every = every_calls })
            "#,
        )
        .unwrap();
        assert_eq!(
            value_of(&host, "calls"),
            Some(json!({ "once": 1, "every": 3 }))
        );
        assert_eq!(value_of(&host, "last"), Some(json!(2)));
    }

    #[test]
    fn rust_subscribers_see_lua_publishes() {
        let host = host();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        host.registry()
            .dynamic("fonts")
            .subscribe(Subscription::EveryChange, move |value| {
                sink.borrow_mut().push(value)
            });
        host.run_source(
            "fonts.lua",
            r#"runtime:get_tracked("fonts"):set_value({ "orbitron" })"#,
        )
        .unwrap();
        assert_eq!(*seen.borrow(), vec![json!(["orbitron"])]);
    }

    #[test]
    fn views_are_read_only() {
        let host = host();
        host.registry().set_shared("quality", json!("high"));
        host.run_source(
            "guard.lua",
            r#"
            local results = {}
            for _, field in ipairs({ "tracked", "shared", "types" }) do
                local ok, err = pcall(function() runtime[field] = {} end)
                results[field] = { ok = ok, message = tostring(err) }
            end
            local ok, err = pcall(function() runtime.shared.quality = "low" end)
            results.entry = { ok = ok, message = tostring(err) }
            runtime:get_tracked("guard"):set_value(results)
            "#,
        )
        .unwrap();

        let results = value_of(&host, "guard").unwrap();
        for field in ["tracked", "shared", "types", "entry"] {
            assert_eq!(results[field]["ok"], json!(false), "{field}");
            let message = results[field]["message"].as_str().unwrap();
            assert!(message.contains("read-only"), "{field}: {message}");
        }
        let quality = host
            .registry()
            .shared::<JsonValue>("quality")
            .unwrap()
            .unwrap();
        assert_eq!(*quality, json!("high"));
    }

    #[test]
    fn views_list_registry_entries() {
        let host = host();
        host.run_source(
            "views.lua",
            r#"
            runtime:get_tracked("core")
            runtime:set_shared("difficulty", "hard")
            runtime:set_type("Asteroid", function(size) return { size = size } end)
            local make = runtime.types:get("Asteroid")
            local report = {
                tracked = #runtime.tracked,
                has_core = runtime.tracked:contains("core"),
                shared = runtime:get_shared("difficulty"),
                types = runtime.types:names(),
                asteroid = make(4),
                missing = runtime:get_type("Comet") == nil,
            }
            runtime:get_tracked("report"):set_value(report)
            "#,
        )
        .unwrap();
        assert_eq!(
            value_of(&host, "report"),
            Some(json!({
                "tracked": 1,
                "has_core": true,
                "shared": "hard",
                "types": ["Asteroid"],
                "asteroid": { "size": 4 },
                "missing": true,
            }))
        );
    }

    #[test]
    fn rust_light_type_is_callable_from_lua() {
        let registry = Registry::new();
        LightPlugin::spotlight().install(&registry).unwrap();
        registry.set_shared("seed", 42_u64);
        let host = LuaPluginHost::new(registry).unwrap();
        host.run_source(
            "forge.lua",
            r#"
            local Light = runtime.types:get("Light")
            local light = Light("spot", { 0, 1, 0 }, { 1, 1, 1 }, 2)
            local ok, err = pcall(Light, "area")
            runtime:get_tracked("forged"):set_value({
                kind = light.kind,
                angle = light.angle,
                intensity = light.intensity,
                same = runtime:get_type("Light") ~= nil,
                rejected = not ok and tostring(err):find("constructing `Light` failed") ~= nil,
                seed = runtime:get_shared("seed"),
                seed_view = runtime.shared:get("seed"),
            })
            "#,
        )
        .unwrap();
        assert_eq!(
            value_of(&host, "forged"),
            Some(json!({
                "kind": "spot",
                "angle": 30.0,
                "intensity": 2.0,
                "same": true,
                "rejected": true,
                "seed": 42,
                "seed_view": 42,
            }))
        );
    }

    #[test]
    fn lua_types_are_shared_across_hosts() {
        let registry = Registry::new();
        let author = LuaPluginHost::new(registry.clone()).unwrap();
        author
            .run_source(
                "asteroid.lua",
                r#"runtime:set_type("Asteroid", function(size) return { size = size * 2 } end)"#,
            )
            .unwrap();

        let reader = LuaPluginHost::new(registry.clone()).unwrap();
        reader
            .run_source(
                "belt.lua",
                r#"runtime:get_tracked("belt"):set_value(runtime:get_type("Asteroid")(3))"#,
            )
            .unwrap();
        assert_eq!(value_of(&reader, "belt"), Some(json!({ "size": 6 })));

        let script = registry.script_constructor("Asteroid").unwrap();
        assert_eq!(script(vec![json!(5)]).unwrap(), json!({ "size": 10 }));

        drop(author);
        assert!(script(vec![json!(5)]).is_err());
    }

    #[test]
    fn json_null_reaches_lua_as_nil() {
        let host = host();
        host.run_source(
            "void.lua",
            r#"
            local void = runtime:get_tracked("void")
            local ok, err = pcall(function() void:set_value(nil) end)
            runtime:get_tracked("rejected"):set_value({
                ok = ok,
                named = tostring(err):find("cannot publish nil") ~= nil,
                has_value = void:has_value(),
            })
            void:get_every_change(function(v)
                runtime:get_tracked("heard"):set_value({
                    is_nil = v == nil,
                    inner_nil = type(v) == "table" and v.pilot == nil,
                })
            end)
            "#,
        )
        .unwrap();
        assert_eq!(
            value_of(&host, "rejected"),
            Some(json!({ "ok": false, "named": true, "has_value": false }))
        );

        let void = host.registry().find("void").unwrap();
        void.set_value(JsonValue::Null).unwrap();
        assert_eq!(
            value_of(&host, "heard"),
            Some(json!({ "is_nil": true, "inner_nil": false }))
        );

        host.run_source(
            "read.lua",
            r#"runtime:get_tracked("read"):set_value({ is_nil = runtime:get_tracked("void"):value() == nil })"#,
        )
        .unwrap();
        assert_eq!(value_of(&host, "read"), Some(json!({ "is_nil": true })));

        void.set_value(json!({ "pilot": null, "fuel": 3 })).unwrap();
        assert_eq!(
            value_of(&host, "heard"),
            Some(json!({ "is_nil": false, "inner_nil": true }))
        );
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let host = host();
        host.run_source(
            "faulty.lua",
            r#"
            local status = runtime:get_tracked("status")
            status:get_every_change(function() error("boom") end)
            status:get_every_change(function(v) runtime:get_tracked("echo"):set_value(v) end)
            status:set_value("green")
            "#,
        )
        .unwrap();
        assert_eq!(value_of(&host, "echo"), Some(json!("green")));
    }

    #[test]
    fn load_dir_runs_scripts_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("20-second.lua"),
            r#"runtime:get_tracked("order"):set_value(runtime:get_tracked("order"):value() .. ",second")"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("10-first.lua"),
            r#"runtime:get_tracked("order"):set_value("first")"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a plugin").unwrap();

        let host = host();
        assert_eq!(host.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(value_of(&host, "order"), Some(json!("first,second")));
    }

    #[test]
    fn script_errors_name_the_script() {
        let host = host();
        let err = host.run_source("broken.lua", "this is not lua").unwrap_err();
        assert!(err.to_string().contains("broken.lua"));
    }

    #[test]
    fn dropped_host_skips_lua_subscribers() {
        let registry = Registry::new();
        {
            let host = LuaPluginHost::new(registry.clone()).unwrap();
            host.run_source(
                "late.lua",
                r#"runtime:get_tracked("late"):get_once(function() error("unreachable") end)"#,
            )
            .unwrap();
        }
        registry.dynamic("late").set_value(json!(1)).unwrap();
        assert_eq!(registry.find("late").unwrap().value().unwrap(), Some(json!(1)));
    }
}
