use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{TempDir, tempdir};

fn write_config(dir: &TempDir, extra: &str) -> PathBuf {
    let data = dir.path().join("data");
    let toml = format!(
        r#"
[experiment]
vessels = [0, 1]
data_dir = "{}"

[turbidostat]
lower_thresh = 1.6
upper_thresh = 2.0

[fluidics]
influx_flow_rate = 1.0
dosing_flow_rate = 1.0

[selection]
stock_conc = 1000.0
min_level = 25.0
max_level = 500.0
step_count = 20
{extra}
"#,
        data.display()
    );
    let path = dir.path().join("evolver.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn evolver(cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("evolver").unwrap();
    cmd.arg("--config").arg(cfg).arg("--log-level").arg("warn");
    cmd
}

fn stdout_json(out: &std::process::Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|l| serde_json::from_str(l).expect("stdout line is JSON"))
        .collect()
}

#[test]
fn self_check_passes_on_a_valid_config() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    evolver(&cfg)
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("self-check ok: 2 vessels"));
}

#[rstest]
#[case("upper_thresh = 1.0", "upper_thresh")]
#[case("spacing = \"log\"\nmin_level = 0.0", "min_level")]
fn config_errors_exit_2(#[case] patch: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let text = fs::read_to_string(&cfg).unwrap();
    let text = if patch.starts_with("upper") {
        text.replace("upper_thresh = 2.0", patch)
    } else {
        text.replace("min_level = 25.0", patch)
    };
    fs::write(&cfg, text).unwrap();

    evolver(&cfg)
        .arg("self-check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains(needle));
}

#[test]
fn missing_config_is_a_config_error() {
    let dir = tempdir().unwrap();
    evolver(&dir.path().join("nope.toml"))
        .arg("self-check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn json_errors_are_structured() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let text = fs::read_to_string(&cfg).unwrap().replace("upper_thresh = 2.0", "upper_thresh = 1.0");
    fs::write(&cfg, text).unwrap();

    let out = evolver(&cfg).arg("--json").arg("self-check").output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    let last = stderr.lines().last().unwrap();
    let v: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(v["reason"], "Config");
    assert_eq!(v["exit_code"], 2);
}

#[test]
fn init_creates_seeded_streams() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    evolver(&cfg).arg("init").assert().success();

    let data = dir.path().join("data");
    let step_log = fs::read_to_string(data.join("step_log/vial1_step_log.txt")).unwrap();
    assert_eq!(
        step_log,
        "time,step_changed_time,target_level,concentration,status\n0,0,0,0,\n"
    );
    let od_set = fs::read_to_string(data.join("ODset/vial0_ODset.txt")).unwrap();
    assert_eq!(od_set, "time,target\n");
    assert!(data.join("step_config/vial0_step_config.txt").exists());

    // a second init changes nothing
    evolver(&cfg).arg("init").assert().success();
    let again = fs::read_to_string(data.join("step_log/vial1_step_log.txt")).unwrap();
    assert_eq!(again, step_log);
}

#[test]
fn tick_dilutes_a_dense_culture() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    evolver(&cfg).arg("init").assert().success();

    let od = dir.path().join("data/OD/vial0_OD.txt");
    let mut text = fs::read_to_string(&od).unwrap();
    for i in 0..6 {
        text.push_str(&format!("{},2.5\n", 0.9 + f64::from(i) * 0.01));
    }
    fs::write(&od, text).unwrap();

    let out = evolver(&cfg)
        .args(["tick", "--elapsed-hours", "1"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let cmds = stdout_json(&out);
    assert_eq!(cmds.len(), 1);
    assert_eq!(cmds[0]["param"], "pump");
    assert_eq!(cmds[0]["value"].as_array().unwrap().len(), 48);
    // -ln(1.6 / 2.5) * 25 mL / 1 mL/s
    assert_eq!(cmds[0]["value"][0], "11.16");
    assert_eq!(cmds[0]["value"][16], "16.16");
    assert_eq!(cmds[0]["value"][1], "--");

    let pumps = fs::read_to_string(dir.path().join("data/pump_log/vial0_pump_log.txt")).unwrap();
    assert!(pumps.ends_with("1,11.16\n"));
}

#[test]
fn transport_output_file_receives_commands() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("commands.jsonl");
    let cfg = write_config(
        &dir,
        &format!("\n[transport]\noutput = \"{}\"\n", out_path.display()),
    );
    evolver(&cfg)
        .args(["set", "temp", "37"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    let line = fs::read_to_string(&out_path).unwrap();
    let v: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(v["param"], "temp");
    assert_eq!(v["value"].as_array().unwrap().len(), 16);
    assert_eq!(v["immediate"], true);
}

#[rstest]
#[case("light", "0", 32)]
#[case("pump", "0", 48)]
#[case("stir", "8", 16)]
fn set_broadcasts_scalars(#[case] param: &str, #[case] value: &str, #[case] width: usize) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let out = evolver(&cfg).args(["set", param, value]).output().unwrap();
    assert!(out.status.success());
    let cmds = stdout_json(&out);
    assert_eq!(cmds[0]["value"].as_array().unwrap().len(), width);
    assert_eq!(cmds[0]["value"][width - 1], value);
}

#[test]
fn set_rejects_wrong_array_width() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    evolver(&cfg)
        .args(["set", "pump", "1,2"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("expects 1 or 48 values"));
}

#[test]
fn light_calibration_sweep_sends_every_value() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let out = evolver(&cfg)
        .args(["light-cal", "3", "--on-secs", "0", "--off-secs", "0"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let cmds = stdout_json(&out);
    assert_eq!(cmds.len(), 17);
    assert_eq!(cmds[1]["value"][3], "2080");
    assert_eq!(cmds[15]["value"][3], "4095");
    assert!(cmds[16]["value"].as_array().unwrap().iter().all(|v| v == "0"));
}

#[test]
fn run_loop_stops_after_max_ticks() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    evolver(&cfg).arg("init").assert().success();
    evolver(&cfg)
        .args(["run", "--interval-secs", "0", "--max-ticks", "2"])
        .assert()
        .success();
}
