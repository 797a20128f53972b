use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

fn slidecache(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("slidecache").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(home.join("missing.toml"));
    cmd
}

#[test]
fn simulate_reports_window_around_visited_page() {
    let home = TempDir::new().unwrap();
    let assert = slidecache(home.path())
        .args(["simulate", "--pages", "10", "--max-slides", "3"])
        .args(["--max-memory", "-1", "--json", "2", "5"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let reports: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(reports.len(), 2);

    let last = &reports[1];
    assert_eq!(last["page"], 5);
    let cached: Vec<u64> = last["cached"]
        .as_array()
        .unwrap()
        .iter()
        .map(|page| page.as_u64().unwrap())
        .collect();
    assert!(cached.contains(&5), "{cached:?}");
    assert!(cached.len() <= 3, "{cached:?}");
}

#[test]
fn simulate_rejects_pages_outside_document() {
    let home = TempDir::new().unwrap();
    slidecache(home.path())
        .args(["simulate", "--pages", "4", "7"])
        .assert()
        .failure();
}

#[test]
fn drawings_clear_page_and_write_back() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("drawings.xml");
    let output = home.path().join("out").join("drawings.xml");
    fs::write(
        &input,
        r##"<?xml version="1.0"?>
<xournal>
<page><layer>
<stroke tool="pen" color="#ff0000ff" width="2">0 0 10 10</stroke>
<stroke tool="highlighter" color="#ffff0080" width="8">0 5 20 5</stroke>
</layer></page>
<page><layer>
<text font="Sans" size="12" color="#000000ff" x="4" y="4">hello</text>
</layer></page>
</xournal>"##,
    )
    .unwrap();

    let assert = slidecache(home.path())
        .arg("drawings")
        .arg(&input)
        .args(["--clear", "0", "--output"])
        .arg(&output)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("page    0 FullPage: 0 items"), "{stdout}");
    assert!(stdout.contains("page    1 FullPage: 1 items"), "{stdout}");

    let written = fs::read_to_string(&output).unwrap();
    assert!(!written.contains("<stroke"), "{written}");
    assert!(written.contains(">hello</text>"), "{written}");
}

#[test]
fn log_file_is_written_to_data_directory() {
    let home = TempDir::new().unwrap();
    let assert = slidecache(home.path())
        .env("RUST_LOG", "info")
        .args(["simulate", "--pages", "3", "0"])
        .assert()
        .success();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("simulating"), "{stderr}");

    let log = home
        .path()
        .join("data")
        .join("slidecache")
        .join("logs")
        .join("slidecache.log");
    let contents = fs::read_to_string(&log).unwrap();
    assert!(contents.contains("simulating"), "{contents}");
}
