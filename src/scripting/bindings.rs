use std::rc::{Rc, Weak};

use anyhow::anyhow;
use log::{debug, error, warn};
use mlua::{
    Function, Lua, LuaSerdeExt, MetaMethod, MultiValue, RegistryKey, Result as LuaResult,
    SerializeOptions, UserData, UserDataFields, UserDataMethods, Value, Variadic,
};
use serde_json::Value as JsonValue;

use crate::registry::{DynamicTracker, Registry, RegistryError, ScriptConstructor, ViewKind};
use crate::tracker::Subscription;

/// Lua function stored in the registry's `types` map.
///
/// Scripts running in the owning Lua state get the function back as is;
/// everyone else goes through the JSON entry point registered with it.
struct LuaConstructor {
    key: Rc<RegistryKey>,
}

pub(super) fn register_globals(lua: &Rc<Lua>, registry: &Registry) -> LuaResult<()> {
    register_print(lua)?;
    let runtime = LuaRuntime {
        registry: registry.clone(),
        host: Rc::downgrade(lua),
    };
    lua.globals().set("runtime", lua.create_userdata(runtime)?)?;
    Ok(())
}

fn register_print(lua: &Lua) -> LuaResult<()> {
    let print = lua.create_function(|lua, values: Variadic<Value>| {
        let mut out = Vec::with_capacity(values.len());
        for value in values.iter() {
            let text = match value {
                Value::Nil => "nil".to_string(),
                Value::Boolean(b) => b.to_string(),
                Value::String(s) => s.to_str()?.to_string(),
                _ => match lua.coerce_string(value.clone())? {
                    Some(s) => s.to_str()?.to_string(),
                    None => format!("{value:?}"),
                },
            };
            out.push(text);
        }
        println!("[lua] {}", out.join("\t"));
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    Ok(())
}

fn read_only(kind: ViewKind) -> mlua::Error {
    mlua::Error::external(RegistryError::ReadOnly(kind))
}

/// JSON `null` becomes `nil`, at the top level and inside tables.
fn json_to_lua<'lua>(lua: &'lua Lua, value: Option<&JsonValue>) -> LuaResult<Value<'lua>> {
    let options = SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false);
    match value {
        Some(value) => lua.to_value_with(value, options),
        None => Ok(Value::Nil),
    }
}

fn lua_to_json(lua: &Lua, values: &[Value]) -> LuaResult<Vec<JsonValue>> {
    values
        .iter()
        .map(|value| lua.from_value(value.clone()))
        .collect()
}

/// Resolves `name` in the `types` map to something Lua can call, or `nil`
/// when the type has no script entry point.
fn stored_constructor<'lua>(
    lua: &'lua Lua,
    registry: &Registry,
    name: &str,
) -> LuaResult<Option<Function<'lua>>> {
    if let Ok(Some(constructor)) = registry.shared_type::<LuaConstructor>(name) {
        if lua.owns_registry_value(&constructor.key) {
            return lua.registry_value::<Function>(&constructor.key).map(Some);
        }
    }
    match registry.script_constructor(name) {
        Some(script) => script_function(lua, name, script).map(Some),
        None => {
            if registry.types().contains(name) {
                debug!("shared type `{name}` is not callable from Lua");
            }
            Ok(None)
        }
    }
}

fn script_function<'lua>(
    lua: &'lua Lua,
    name: &str,
    script: ScriptConstructor,
) -> LuaResult<Function<'lua>> {
    let name = name.to_string();
    lua.create_function(move |lua, args: Variadic<Value>| {
        let args = lua_to_json(lua, &args)?;
        let value = script(args).map_err(|err| {
            mlua::Error::RuntimeError(format!("constructing `{name}` failed: {err:#}"))
        })?;
        json_to_lua(lua, Some(&value))
    })
}

/// Stores a Lua constructor together with a JSON entry point that calls back
/// into this Lua state.
fn store_constructor(
    lua: &Lua,
    host: Weak<Lua>,
    registry: &Registry,
    name: &str,
    function: Function,
) -> LuaResult<()> {
    let key = Rc::new(lua.create_registry_value(function)?);
    let script_key = Rc::clone(&key);
    registry.set_scripted_type(name, LuaConstructor { key }, move |args| {
        let lua = host
            .upgrade()
            .ok_or_else(|| anyhow!("the Lua host that defined this type was dropped"))?;
        let function = lua.registry_value::<Function>(&script_key)?;
        let args = args
            .iter()
            .map(|arg| json_to_lua(&lua, Some(arg)))
            .collect::<LuaResult<Vec<_>>>()?;
        let value: Value = function.call(MultiValue::from_vec(args))?;
        Ok(lua.from_value::<JsonValue>(value)?)
    });
    Ok(())
}

fn stored_shared<'lua>(lua: &'lua Lua, registry: &Registry, name: &str) -> LuaResult<Value<'lua>> {
    let value = registry
        .shared_json(name)
        .map_err(mlua::Error::external)?;
    json_to_lua(lua, value.as_ref())
}

/// The `runtime` global: entry point of the registry for Lua plugins.
struct LuaRuntime {
    registry: Registry,
    host: Weak<Lua>,
}

impl LuaRuntime {
    fn view(&self, kind: ViewKind) -> LuaView {
        LuaView {
            registry: self.registry.clone(),
            kind,
            host: self.host.clone(),
        }
    }
}

impl UserData for LuaRuntime {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("tracked", |_, this| Ok(this.view(ViewKind::Tracked)));
        fields.add_field_method_get("shared", |_, this| Ok(this.view(ViewKind::Shared)));
        fields.add_field_method_get("types", |_, this| Ok(this.view(ViewKind::Types)));
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("get_tracked", |_, this, name: String| {
            Ok(LuaTracker {
                tracker: this.registry.dynamic(&name),
                host: this.host.clone(),
            })
        });

        methods.add_method("set_shared", |lua, this, (name, value): (String, Value)| {
            let value: JsonValue = lua.from_value(value)?;
            this.registry.set_shared(&name, value);
            Ok(())
        });
        methods.add_method("get_shared", |lua, this, name: String| {
            stored_shared(lua, &this.registry, &name)
        });

        methods.add_method("set_type", |lua, this, (name, constructor): (String, Function)| {
            store_constructor(lua, this.host.clone(), &this.registry, &name, constructor)
        });
        methods.add_method("get_type", |lua, this, name: String| {
            stored_constructor(lua, &this.registry, &name)
        });

        methods.add_meta_method(
            MetaMethod::NewIndex,
            |_, _this, (field, _value): (String, Value)| {
                match ViewKind::from_field(&field) {
                    Some(kind) => Err::<(), _>(read_only(kind)),
                    None => Err(mlua::Error::RuntimeError(format!(
                        "runtime has no assignable field `{field}`"
                    ))),
                }
            },
        );
    }
}

/// Read-only listing of `runtime.tracked`, `runtime.shared` or `runtime.types`.
struct LuaView {
    registry: Registry,
    kind: ViewKind,
    host: Weak<Lua>,
}

impl LuaView {
    fn get<'lua>(&self, lua: &'lua Lua, name: &str) -> LuaResult<Value<'lua>> {
        match self.kind {
            ViewKind::Tracked => match self.registry.find(name) {
                Some(tracker) => {
                    let tracker = LuaTracker {
                        tracker,
                        host: self.host.clone(),
                    };
                    Ok(Value::UserData(lua.create_userdata(tracker)?))
                }
                None => Ok(Value::Nil),
            },
            ViewKind::Shared => stored_shared(lua, &self.registry, name),
            ViewKind::Types => Ok(stored_constructor(lua, &self.registry, name)?
                .map(Value::Function)
                .unwrap_or(Value::Nil)),
        }
    }
}

impl UserData for LuaView {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("names", |_, this, ()| {
            Ok(this.registry.view(this.kind).names())
        });
        methods.add_method("contains", |_, this, name: String| {
            Ok(this.registry.view(this.kind).contains(&name))
        });
        methods.add_method("get", |lua, this, name: String| this.get(lua, &name));
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| {
            Ok(this.registry.view(this.kind).len())
        });
        methods.add_meta_method(
            MetaMethod::NewIndex,
            |_, this, _args: (Value, Value)| Err::<(), _>(read_only(this.kind)),
        );
    }
}

/// Lua handle to one tracked cell; values cross the boundary as JSON.
struct LuaTracker {
    tracker: DynamicTracker,
    host: Weak<Lua>,
}

impl LuaTracker {
    fn subscribe(&self, lua: &Lua, kind: Subscription, callback: Function) -> LuaResult<()> {
        let key = lua.create_registry_value(callback)?;
        let host = self.host.clone();
        let name = self.tracker.name().to_string();
        self.tracker
            .subscribe(kind, move |value| deliver(&host, &key, &name, value));
        Ok(())
    }
}

impl UserData for LuaTracker {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("name", |_, this| Ok(this.tracker.name().to_string()));
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("has_value", |_, this, ()| Ok(this.tracker.has_value()));
        methods.add_method("value", |lua, this, ()| {
            let value = this.tracker.value().map_err(mlua::Error::external)?;
            json_to_lua(lua, value.as_ref())
        });
        methods.add_method("set_value", |lua, this, value: Value| {
            if let Value::Nil = value {
                return Err(mlua::Error::RuntimeError(format!(
                    "cannot publish nil to `{}`",
                    this.tracker.name()
                )));
            }
            let value: JsonValue = lua.from_value(value)?;
            this.tracker.set_value(value).map_err(mlua::Error::external)
        });
        methods.add_method("get_once", |lua, this, callback: Function| {
            this.subscribe(lua, Subscription::Once, callback)
        });
        methods.add_method("get_every_change", |lua, this, callback: Function| {
            this.subscribe(lua, Subscription::EveryChange, callback)
        });
        methods.add_method(
            "subscribe",
            |lua, this, (kind, callback): (String, Function)| {
                let kind = match kind.as_str() {
                    "once" => Subscription::Once,
                    "every_change" => Subscription::EveryChange,
                    other => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "unknown subscription kind `{other}` (expected once or every_change)"
                        )))
                    }
                };
                this.subscribe(lua, kind, callback)
            },
        );
    }
}

fn deliver(host: &Weak<Lua>, key: &RegistryKey, name: &str, value: JsonValue) {
    let Some(lua) = host.upgrade() else {
        warn!("skipping Lua subscriber of `{name}`: script host was dropped");
        return;
    };
    debug!("delivering `{name}` to Lua subscriber");
    let result = lua.registry_value::<Function>(key).and_then(|callback| {
        let argument = json_to_lua(&lua, Some(&value))?;
        callback.call::<_, ()>(argument)
    });
    if let Err(err) = result {
        error!("Lua subscriber of `{name}` failed: {err}");
    }
}
