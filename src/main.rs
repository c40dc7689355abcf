use std::env;
use std::fs;

use anyhow::{anyhow, Context, Result};
use log::info;

use cosmos_runtime::keys::{self, CoreStatus};
use cosmos_runtime::{builtin_plugins, LuaPluginHost, Registry, Scene};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let registry = Registry::new();

    // Typed cells exist before any script runs so Lua plugins bind to them.
    let core = registry.tracker_for(keys::CORE)?;
    let level = registry.tracker_for(keys::LEVEL_SCENE)?;

    if options.builtin {
        let count = builtin_plugins().install_all(&registry)?;
        info!("installed {count} built-in plugin(s)");
    }

    let host = LuaPluginHost::new(registry.clone())?;
    let count = host
        .load_dir(&options.plugin_dir)
        .with_context(|| format!("failed to load plugins from {}", options.plugin_dir))?;
    println!("Loaded {count} plugin script(s)");

    core.set_value(CoreStatus { ready: true });

    if let Some(path) = &options.scene {
        let xml = fs::read_to_string(path).with_context(|| format!("unable to read {path}"))?;
        let scene = Scene::from_xml(&xml).context("failed to parse scene XML")?;
        println!(
            "Loaded scene with {} objects ({} lights)",
            scene.objects.len(),
            scene.lights.len()
        );
        for object in &scene.objects {
            println!(" - {} ({})", object.name, object.object_type);
        }
        level.set_value(scene);
    }

    print_registry(&registry)
}

fn print_registry(registry: &Registry) -> Result<()> {
    println!("Registry state:");
    for name in registry.tracked().names() {
        let Some(tracker) = registry.find(&name) else {
            continue;
        };
        match tracker.value()? {
            Some(value) if name == keys::LEVEL_SCENE.name() => {
                let objects = value["objects"].as_array().map_or(0, Vec::len);
                println!(" - {name} = <scene with {objects} objects>");
            }
            Some(value) => println!(" - {name} = {value}"),
            None => println!(" - {name} = <pending>"),
        }
    }
    println!("Shared values: {}", registry.shared_values().names().join(", "));
    println!("Shared types: {}", registry.types().names().join(", "));
    Ok(())
}

struct CliOptions {
    plugin_dir: String,
    scene: Option<String>,
    builtin: bool,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        const USAGE: &str = "Usage: cosmos-runtime <plugin-dir> [--scene <scene.xml>] [--no-builtin]";
        let mut args = env::args().skip(1);
        let Some(plugin_dir) = args.next() else {
            return Err(anyhow!(USAGE));
        };
        let mut scene = None;
        let mut builtin = true;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--scene" => {
                    let path = args
                        .next()
                        .ok_or_else(|| anyhow!("--scene expects a path. {USAGE}"))?;
                    scene = Some(path);
                }
                "--no-builtin" => builtin = false,
                other => {
                    return Err(anyhow!(
                        "Unknown argument: {other}. Expected --scene or --no-builtin"
                    ));
                }
            }
        }
        Ok(Self {
            plugin_dir,
            scene,
            builtin,
        })
    }
}
