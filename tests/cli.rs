use assert_cmd::prelude::*;
use predicates::str::contains;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

const SCENE: &str = r#"<scene>
  <object>
    <name>Hull</name>
    <type>mesh</type>
  </object>
  <object>
    <name>Beacon</name>
    <type>light</type>
    <kind>spot</kind>
    <intensity>2.5</intensity>
    <angle>25</angle>
  </object>
</scene>
"#;

const BEACON_PLUGIN: &str = r#"
runtime:get_tracked("core"):get_once(function(status)
  runtime:get_tracked("beacon"):set_value({ online = status.ready })
end)
runtime:get_tracked("spotlight"):get_every_change(function(light)
  print("spotlight intensity", light.intensity)
end)
runtime:set_shared("difficulty", "hard")
"#;

fn plugin_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("temp plugin dir");
    fs::write(dir.path().join("10-beacon.lua"), BEACON_PLUGIN).expect("write plugin");
    fs::write(dir.path().join("level.xml"), SCENE).expect("write scene");
    dir
}

#[test]
fn cli_runs_plugins_and_prints_registry_state() {
    let dir = plugin_dir();
    let mut cmd = Command::cargo_bin("cosmos-runtime").expect("binary exists");
    cmd.arg(dir.path())
        .arg("--scene")
        .arg(dir.path().join("level.xml"));
    cmd.assert()
        .success()
        .stdout(contains("Loaded 1 plugin script(s)"))
        .stdout(contains("Loaded scene with 2 objects (1 lights)"))
        .stdout(contains(" - Beacon (light)"))
        .stdout(contains("[lua] spotlight intensity\t2.5"))
        .stdout(contains(r#" - beacon = {"online":true}"#))
        .stdout(contains(r#" - core = {"ready":true}"#))
        .stdout(contains(" - levelScene = <scene with 2 objects>"))
        .stdout(contains(" - pointLight = <pending>"))
        .stdout(contains(r#""kind":"spot""#))
        .stdout(contains("Shared values: difficulty"))
        .stdout(contains("Shared types: Light"));
}

#[test]
fn cli_without_builtins_leaves_lights_untracked() {
    let dir = plugin_dir();
    let mut cmd = Command::cargo_bin("cosmos-runtime").expect("binary exists");
    cmd.arg(dir.path()).arg("--no-builtin");
    cmd.assert()
        .success()
        .stdout(contains(r#" - beacon = {"online":true}"#))
        .stdout(contains(" - levelScene = <pending>"))
        .stdout(contains(" - spotlight = <pending>"))
        .stdout(contains("Shared types: \n"));
}

#[test]
fn cli_rejects_unknown_arguments() {
    let dir = plugin_dir();
    let mut cmd = Command::cargo_bin("cosmos-runtime").expect("binary exists");
    cmd.arg(dir.path()).arg("--fullscreen");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument: --fullscreen"));
}
