use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn canopy() -> Command {
    Command::cargo_bin("canopy").unwrap()
}

fn write_global_table(path: &Path) {
    fs::write(
        path,
        "tile,class,confidence,x,y,w,h\n\
         scene_tile_0_0,Oil Palm,0.71,630,100,40,40\n\
         scene_tile_640_0,Oil Palm,0.88,642,100,40,40\n\
         scene_tile_640_0,VOP,0.52,900,400,40,40\n",
    )
    .unwrap();
}

fn write_config(dir: &Path, extra: serde_json::Value) -> std::path::PathBuf {
    let source = dir.join("scene.png");
    image::RgbImage::from_pixel(700, 300, image::Rgb([20, 90, 30]))
        .save(&source)
        .unwrap();
    let mut cfg = serde_json::json!({
        "sources": [source],
        "work_dir": dir.join("work"),
        "output_dir": dir.join("out"),
        "tile_format": "png",
        "workers": 1,
        "eps": 15.0,
        "convention": "top_left",
    });
    if let (Some(base), Some(extra)) = (cfg.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    let path = dir.join("run.json");
    fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
    path
}

#[test]
fn dedup_subcommand_merges_the_boundary_pair() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("global.csv");
    let output = dir.path().join("dedup.csv");
    write_global_table(&input);

    canopy()
        .args(["dedup", "--eps", "15", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let text = fs::read_to_string(&output).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("scene_tile_640_0,Oil Palm,0.88,642"));
    assert!(!text.contains("0.71"));
}

#[test]
fn dedup_rejects_non_positive_eps() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("global.csv");
    write_global_table(&input);

    canopy()
        .args(["dedup", "--eps", "0", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("dedup.csv"))
        .assert()
        .code(64);
}

#[test]
fn export_bottom_left_needs_a_height() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("global.csv");
    write_global_table(&input);

    canopy()
        .args(["export", "--convention", "bottom_left", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("points.geojson"))
        .assert()
        .code(64)
        .stderr(predicate::str::contains("height"));
}

#[test]
fn export_writes_flipped_points() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("global.csv");
    let output = dir.path().join("points.geojson");
    write_global_table(&input);

    canopy()
        .args(["export", "--convention", "bottom-left", "--height", "640", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let fc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(fc["type"], "FeatureCollection");
    assert_eq!(fc["features"].as_array().unwrap().len(), 3);
    assert_eq!(fc["features"][1]["geometry"]["coordinates"], serde_json::json!([642.0, 540.0]));
}

#[test]
fn run_rejects_zero_eps_as_configuration() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), serde_json::json!({ "eps": 0.0 }));

    canopy()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .assert()
        .code(64)
        .stderr(predicate::str::contains("eps"));
}

#[test]
fn run_without_detection_table_fails_in_detection() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        serde_json::json!({ "detections_path": dir.path().join("absent.csv") }),
    );

    canopy()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .assert()
        .code(2);
}

#[test]
fn run_end_to_end() {
    let dir = TempDir::new().unwrap();
    let table = dir.path().join("tiles.csv");
    fs::write(
        &table,
        "tile,class,confidence,x,y,w,h\nscene_tile_640_0,Oil Palm,0.9,30,120,25,25\n",
    )
    .unwrap();
    let config = write_config(dir.path(), serde_json::json!({ "detections_path": table }));

    canopy()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--skip-metadata")
        .assert()
        .success();

    let out = dir.path().join("out");
    assert!(out.join("scene_mosaic.jpg").exists());
    assert!(out.join("scene_detections.geojson").exists());
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("run_report.json")).unwrap()).unwrap();
    assert_eq!(report["tiles"], 2);
    assert_eq!(report["deduplicated_detections"], 1);
}

#[test]
fn unknown_stage_is_a_usage_error() {
    canopy()
        .args(["run", "--config", "run.json", "--from", "merge"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown stage"));
}
