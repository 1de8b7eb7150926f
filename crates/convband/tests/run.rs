use approx::assert_abs_diff_eq;
use convband::{
    read_image, run, write_image, ColumnClamp, FailureKind, Image, RunConfig, RunError,
};
use std::fs;
use std::path::Path;

// Strategies agree to 1e-5 before quantisation; ceil may still split a sample
// sitting on a level boundary.
const QUANT_TOL: f32 = 1.0 / 255.0 + 1e-4;

fn ramp(width: usize, height: usize, channels: usize, seed: usize) -> Image {
    let data = (0..width * height * channels)
        .map(|i| ((i * 7 + seed * 13) % 256) as f32 / 255.0)
        .collect();
    Image::new(width, height, channels, 255, data).expect("image")
}

fn seed_inputs(dir: &Path) {
    write_image(dir.join("a.ppm"), &ramp(9, 10, 3, 1)).expect("a");
    write_image(dir.join("b.pgm"), &ramp(5, 4, 1, 2)).expect("b");
    write_image(dir.join("c.PPM"), &ramp(3, 7, 3, 3)).expect("c");
    fs::write(dir.join("broken.ppm"), b"P6\nnot an image").expect("broken");
    fs::write(dir.join("readme.txt"), b"ignored").expect("txt");
}

fn assert_close(a: &Image, b: &Image) {
    assert_eq!(a.header(), b.header());
    for (x, y) in a.data().iter().zip(b.data()) {
        assert_abs_diff_eq!(*x, *y, epsilon = QUANT_TOL);
    }
}

#[test]
fn directory_run_matches_across_modes_and_skips_broken_input() {
    let inputs = tempfile::tempdir().expect("inputs");
    seed_inputs(inputs.path());

    let mut outputs = Vec::new();
    for mode in ["sequential", "custom:3", "distributed:2", "mpi:4"] {
        let out = tempfile::tempdir().expect("out");
        let cfg = RunConfig::new(inputs.path(), out.path(), "blur+edge,mirror", Some(mode));
        let summary = run(&cfg).expect(mode);

        assert_eq!(summary.files.len(), 4, "{mode}");
        assert_eq!(summary.written().count(), 3, "{mode}");
        let skipped: Vec<_> = summary.skipped().collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].input.ends_with("broken.ppm"));
        let failure = skipped[0].error.as_ref().expect("failure recorded");
        assert_eq!(failure.kind, FailureKind::Decode, "{mode}");

        for name in ["output_a.ppm", "output_b.pgm", "output_c.PPM"] {
            assert!(out.path().join(name).is_file(), "{mode}: {name}");
        }
        assert!(!out.path().join("output_broken.ppm").exists());
        outputs.push(out);
    }

    for name in ["output_a.ppm", "output_b.pgm", "output_c.PPM"] {
        let reference = read_image(outputs[0].path().join(name)).expect("reference");
        for out in &outputs[1..] {
            assert_close(&reference, &read_image(out.path().join(name)).expect("output"));
        }
    }
}

#[test]
fn greyscale_input_stays_greyscale() {
    let inputs = tempfile::tempdir().expect("inputs");
    let src = inputs.path().join("grey.pgm");
    write_image(&src, &ramp(6, 6, 1, 4)).expect("write");
    let out = tempfile::tempdir().expect("out");
    run(&RunConfig::new(&src, out.path(), "sharpen", Some("seq"))).expect("run");

    let raw = fs::read(out.path().join("output_seq.ppm")).expect("read");
    assert_eq!(&raw[..2], b"P5");
    let img = read_image(out.path().join("output_seq.ppm")).expect("decode");
    assert_eq!(img.channels(), 1);
}

#[test]
fn single_input_output_is_named_after_mode() {
    let inputs = tempfile::tempdir().expect("inputs");
    let src = inputs.path().join("photo.ppm");
    write_image(&src, &ramp(8, 5, 3, 5)).expect("write");
    let out = tempfile::tempdir().expect("out");

    for (mode, name) in [
        ("sequential", "output_seq.ppm"),
        ("1", "output_seq.ppm"),
        ("custom:3", "output_threads3.ppm"),
        ("distributed:2", "output_mpi2.ppm"),
    ] {
        let summary = run(&RunConfig::new(&src, out.path(), "blur", Some(mode))).expect(mode);
        let written: Vec<_> = summary.written().collect();
        assert_eq!(written, [out.path().join(name).as_path()]);
    }
    let seq = read_image(out.path().join("output_seq.ppm")).expect("seq");
    assert_close(&seq, &read_image(out.path().join("output_mpi2.ppm")).expect("mpi"));
    assert_close(&seq, &read_image(out.path().join("output_threads3.ppm")).expect("threads"));
}

#[test]
fn band_anchored_clamp_matches_global_for_three_by_three_kernels() {
    let inputs = tempfile::tempdir().expect("inputs");
    let src = inputs.path().join("in.ppm");
    write_image(&src, &ramp(12, 6, 3, 6)).expect("write");

    let global = tempfile::tempdir().expect("global");
    run(&RunConfig::new(&src, global.path(), "blur,edge", Some("4"))).expect("global");

    let anchored = tempfile::tempdir().expect("anchored");
    let mut cfg = RunConfig::new(&src, anchored.path(), "blur,edge", Some("4"));
    cfg.column_clamp = ColumnClamp::BandAnchored;
    run(&cfg).expect("anchored");

    assert_close(
        &read_image(global.path().join("output_threads4.ppm")).expect("g"),
        &read_image(anchored.path().join("output_threads4.ppm")).expect("a"),
    );
}

#[test]
fn summary_is_written_as_json() {
    let inputs = tempfile::tempdir().expect("inputs");
    seed_inputs(inputs.path());
    let out = tempfile::tempdir().expect("out");
    let summary = run(&RunConfig::new(inputs.path(), out.path(), "edge", Some("mpi:3"))).expect("run");
    let path = out.path().join("summary.json");
    summary.write_json(&path).expect("write");

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
    assert_eq!(json["context"]["strategy"], "distributed");
    assert_eq!(json["context"]["workers"], 3);
    assert_eq!(json["files"].as_array().map(Vec::len), Some(4));
    assert_eq!(json["files"][0]["step_max_seconds"].as_array().map(Vec::len), Some(1));
    let broken = json["files"]
        .as_array()
        .and_then(|files| files.iter().find(|f| !f["error"].is_null()))
        .expect("broken input");
    assert_eq!(broken["error"]["kind"], "decode");
}

#[test]
fn unwritable_output_directory_is_a_config_error() {
    let inputs = tempfile::tempdir().expect("inputs");
    let src = inputs.path().join("in.ppm");
    write_image(&src, &ramp(2, 2, 3, 7)).expect("write");
    // a regular file where the output directory should go
    let blocker = inputs.path().join("blocker");
    fs::write(&blocker, b"file").expect("blocker");

    let err = run(&RunConfig::new(&src, blocker.join("out"), "blur", Some("seq")))
        .expect_err("must fail");
    assert!(matches!(
        err,
        RunError::Config(convband::ConfigError::OutputDir { .. })
    ));
}

#[test]
fn bad_mode_is_rejected_before_running() {
    let inputs = tempfile::tempdir().expect("inputs");
    let out = tempfile::tempdir().expect("out");
    let err = run(&RunConfig::new(inputs.path(), out.path(), "blur", Some("custom:0")))
        .expect_err("must fail");
    assert!(matches!(err, RunError::Config(convband::ConfigError::Mode(_))));
}
