use assert_cmd::Command;
use convband::{read_image, write_image, Image, RunConfig};
use predicates::prelude::*;
use std::fs;

fn checker(width: usize, height: usize) -> Image {
    let data = (0..width * height * 3)
        .map(|i| if (i / 3) % 2 == 0 { 1.0 } else { 0.0 })
        .collect();
    Image::new(width, height, 3, 255, data).expect("image")
}

fn convband() -> Command {
    let mut cmd = Command::cargo_bin("convband").expect("binary");
    cmd.env_remove("CONVBAND_LOG");
    cmd
}

#[test]
fn positional_run_prints_written_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("in.ppm");
    write_image(&src, &checker(6, 4)).expect("write");
    let out = dir.path().join("out");

    convband()
        .arg(&src)
        .arg(&out)
        .arg("blur,edge")
        .arg("custom:2")
        .assert()
        .success()
        .stdout(predicate::str::contains("output_threads2.ppm"));

    let img = read_image(out.join("output_threads2.ppm")).expect("decode");
    assert_eq!(img.header(), [6, 4, 3, 255]);
}

#[test]
fn distributed_mode_logs_step_times() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("in.ppm");
    write_image(&src, &checker(5, 10)).expect("write");

    convband()
        .arg(&src)
        .arg(dir.path().join("out"))
        .arg("blur+mirror")
        .arg("mpi:3")
        .args(["--log-level", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("output_mpi3.ppm"))
        .stderr(predicate::str::contains("step 1 (code=").and(predicate::str::contains("max time")))
        .stderr(predicate::str::contains("step 2 (code=1)"));
}

#[test]
fn invalid_mode_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("in.ppm");
    write_image(&src, &checker(2, 2)).expect("write");

    convband()
        .arg(&src)
        .arg(dir.path().join("out"))
        .arg("blur")
        .arg("many")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid execution mode"));
}

#[test]
fn empty_operation_list_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = dir.path().join("in.ppm");
    write_image(&src, &checker(2, 2)).expect("write");

    convband()
        .arg(&src)
        .arg(dir.path().join("out"))
        .arg(" , + ")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no operations"));
}

#[test]
fn config_file_and_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inputs = dir.path().join("inputs");
    fs::create_dir(&inputs).expect("mkdir");
    write_image(inputs.join("one.ppm"), &checker(4, 4)).expect("one");
    write_image(inputs.join("two.ppm"), &checker(3, 5)).expect("two");

    let mut cfg = RunConfig::new(&inputs, dir.path().join("out"), "sharpen", Some("sequential"));
    cfg.ops.push("mirror".into());
    let cfg_path = dir.path().join("run.json");
    cfg.write_json(&cfg_path).expect("config");
    let summary_path = dir.path().join("summary.json");

    convband()
        .arg("--config")
        .arg(&cfg_path)
        .args(["--clamp", "band-anchored"])
        .arg("--json-summary")
        .arg(&summary_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("output_one.ppm").and(predicate::str::contains("output_two.ppm")));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary_path).expect("summary")).expect("json");
    assert_eq!(summary["ops"], serde_json::json!(["sharpen", "mirror"]));
    assert_eq!(summary["context"]["column_clamp"], "band-anchored");
    assert_eq!(summary["files"].as_array().map(Vec::len), Some(2));
}

#[test]
fn missing_arguments_show_usage() {
    convband()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
