use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use image::{ImageBuffer, Rgb, RgbImage};
use predicates::prelude::*;
use tempfile::TempDir;

macro_rules! cargo_run {
    ($($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin("imgroup")?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

fn solid(path: &Path, rgb: [u8; 3]) -> Result<()> {
    let img: RgbImage = ImageBuffer::from_fn(40, 30, |x, y| {
        if x == 0 && y == 0 {
            Rgb([rgb[0] / 2, rgb[1] / 2, rgb[2] / 2])
        } else {
            Rgb(rgb)
        }
    });
    img.save(path)?;
    Ok(())
}

/// Three near-black images, one white image and one undecodable file.
/// Also writes an empty config so a per-user config file is never picked up.
fn dataset() -> Result<(TempDir, String, String)> {
    let dir = TempDir::new()?;
    let photos = dir.path().join("photos");
    fs::create_dir(&photos)?;

    solid(&photos.join("black1.png"), [0, 0, 0])?;
    solid(&photos.join("black2.png"), [3, 3, 3])?;
    solid(&photos.join("black3.png"), [6, 6, 6])?;
    solid(&photos.join("white.png"), [255, 255, 255])?;
    fs::write(photos.join("broken.png"), b"definitely not a png")?;

    let config = dir.path().join("config.json");
    fs::write(&config, "{}")?;

    Ok((
        dir,
        photos.to_string_lossy().to_string(),
        config.to_string_lossy().to_string(),
    ))
}

#[test]
fn scan_groups_similar_images() -> Result<()> {
    let (_dir, photos, config) = dataset()?;

    cargo_run!("scan", &photos, "--config", &config, "--threshold", "0.9")
        .success()
        .stdout(predicate::str::contains("Found 1 group(s)"))
        .stdout(predicate::str::contains("Remainder (1 image(s))"))
        .stdout(predicate::str::contains("Excluded 1 file(s)"))
        .stdout(predicate::str::contains("broken.png"));

    Ok(())
}

#[test]
fn scan_json_report() -> Result<()> {
    let (dir, photos, config) = dataset()?;
    let report_path = dir.path().join("report.json");

    let assert = cargo_run!(
        "scan", &photos, "--config", &config, "--threshold", "0.9", "--json", "--report",
        &report_path
    )
    .success();

    let stdout: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout)?;
    let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report_path)?)?;
    assert_eq!(stdout["groups"], written["groups"]);

    let groups = stdout["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);

    assert_eq!(groups[0]["name"], "group_0001");
    let members = groups[0]["members"].as_array().unwrap();
    assert_eq!(members.len(), 3);
    assert!(members[0]["path"].as_str().unwrap().ends_with("black1.png"));
    let scores: Vec<f64> = members.iter().map(|m| m["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!(scores.iter().all(|s| *s >= 0.9));

    assert_eq!(groups[1]["name"], "remainder");
    assert_eq!(groups[1]["remainder"], true);
    assert!(
        groups[1]["members"][0]["path"]
            .as_str()
            .unwrap()
            .ends_with("white.png")
    );

    let failures = stdout["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0]["source_id"].as_str().unwrap().ends_with("broken.png"));
    assert_eq!(stdout["threshold"], 0.9);

    Ok(())
}

#[test]
fn scan_copies_into_group_directories() -> Result<()> {
    let (dir, photos, config) = dataset()?;
    let dest = dir.path().join("sorted");

    cargo_run!(
        "scan", &photos, "--config", &config, "--threshold", "0.9", "--dest", &dest
    )
    .success()
    .stdout(predicate::str::contains("Placed 4 file(s)"));

    let group = dest.join("group_0001");
    for name in ["black1.png", "black2.png", "black3.png"] {
        assert!(group.join(name).is_file());
        assert!(Path::new(&photos).join(name).is_file());
    }
    assert!(dest.join("remainder").join("white.png").is_file());
    assert!(!dest.join("remainder").join("broken.png").exists());

    Ok(())
}

#[test]
fn scan_dry_run_changes_nothing() -> Result<()> {
    let (dir, photos, config) = dataset()?;
    let dest = dir.path().join("sorted");

    cargo_run!(
        "scan", &photos, "--config", &config, "--threshold", "0.9", "--dest", &dest, "--move",
        "--dry-run"
    )
    .success()
    .stdout(predicate::str::contains("[dry-run] MOVE"));

    assert!(!dest.exists());
    assert!(Path::new(&photos).join("black1.png").is_file());

    Ok(())
}

#[test]
fn scan_json_dry_run_keeps_stdout_parseable() -> Result<()> {
    let (dir, photos, config) = dataset()?;
    let dest = dir.path().join("sorted");

    let assert = cargo_run!(
        "scan", &photos, "--config", &config, "--threshold", "0.9", "--json", "--dest", &dest,
        "--dry-run"
    )
    .success();

    let stdout: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(stdout["groups"].as_array().unwrap().len(), 2);
    assert!(!dest.exists());

    Ok(())
}

#[test]
fn scan_glob_without_matches_finds_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("config.json");
    fs::write(&config, "{}")?;
    let pattern = dir.path().join("*.png");

    cargo_run!("scan", &pattern, "--config", &config)
        .success()
        .stdout(predicate::str::contains("No images found."));

    Ok(())
}

#[test]
fn scan_stale_glob_does_not_abort_other_inputs() -> Result<()> {
    let (dir, photos, config) = dataset()?;
    let stale = dir.path().join("gone").join("*.jpg");

    cargo_run!("scan", &stale, &photos, "--config", &config, "--threshold", "0.9")
        .success()
        .stdout(predicate::str::contains("Found 1 group(s)"));

    Ok(())
}

#[test]
fn scan_missing_literal_path_fails() -> Result<()> {
    let (dir, _photos, config) = dataset()?;

    cargo_run!("scan", dir.path().join("nope.png"), "--config", &config)
        .failure()
        .stderr(predicate::str::contains("No such file or directory"));

    Ok(())
}

#[test]
fn scan_excludes_patterns() -> Result<()> {
    let (_dir, photos, config) = dataset()?;

    cargo_run!(
        "scan", &photos, "--config", &config, "--exclude", "*/broken.png", "--exclude",
        "*/white.png"
    )
    .success()
    .stdout(predicate::str::contains("Excluded").not())
    .stdout(predicate::str::contains("white.png").not());

    Ok(())
}

#[test]
fn scan_empty_directory() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("config.json");
    fs::write(&config, "{}")?;
    let empty = dir.path().join("empty");
    fs::create_dir(&empty)?;

    cargo_run!("scan", &empty, "--config", &config)
        .success()
        .stdout(predicate::str::contains("No images found."));

    Ok(())
}

#[test]
fn invalid_threshold_is_rejected() -> Result<()> {
    let (_dir, photos, config) = dataset()?;

    cargo_run!("scan", &photos, "--config", &config, "--threshold", "1.5")
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));

    cargo_run!("scan", &photos, "--config", &config, "--workers", "0")
        .failure()
        .stderr(predicate::str::contains("Worker budget"));

    Ok(())
}

#[test]
fn invalid_config_file_is_rejected() -> Result<()> {
    let (dir, photos, _config) = dataset()?;
    let config = dir.path().join("bad.json");
    fs::write(&config, r#"{ "treshold": 0.5 }"#)?;

    cargo_run!("scan", &photos, "--config", &config)
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));

    Ok(())
}

#[test]
fn move_requires_dest() -> Result<()> {
    let (_dir, photos, config) = dataset()?;

    cargo_run!("scan", &photos, "--config", &config, "--move").failure();

    Ok(())
}

#[test]
fn compare_scores_images() -> Result<()> {
    let (_dir, photos, config) = dataset()?;
    let black = Path::new(&photos).join("black1.png");
    let white = Path::new(&photos).join("white.png");

    cargo_run!("compare", &black, &black, "--config", &config)
        .success()
        .stdout(predicate::str::diff("1.000000\n"));

    cargo_run!("compare", &black, &white, "--config", &config)
        .success()
        .stdout(predicate::str::starts_with("0.0"));

    cargo_run!("compare", &black, Path::new(&photos).join("broken.png"), "--config", &config)
        .failure()
        .stderr(predicate::str::contains("Failed to load"));

    Ok(())
}
