//! CLI tests for psat-analyzer.
//!
//! These run the built binary against captures written to a temp dir.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::{json, Value};

fn psat(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_psat-analyzer"))
        .args(args)
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute psat-analyzer")
}

fn write_capture(dir: &Path, name: &str, capture: &Value) -> String {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string(capture).unwrap()).unwrap();
    path.display().to_string()
}

fn doubleclick_capture() -> Value {
    json!({
        "pageUrl": "https://www.example.com/",
        "frames": [{"frameId": "MAIN", "url": "https://www.example.com/"}],
        "events": [
            {"type": "requestWillBeSent", "requestId": "1", "frameId": "MAIN",
             "url": "https://ad.doubleclick.net/pixel"},
            {"type": "responseReceivedExtraInfo", "requestId": "1",
             "cookies": [{
                "cookie": {"name": "test_cookie", "value": "CheckForPermission",
                           "domain": ".doubleclick.net", "path": "/"},
                "blockedReasons": ["ThirdPartyPhaseout"]
             }]}
        ]
    })
}

/// Test that the binary can show help
#[test]
fn test_help_command() {
    let home = tempfile::tempdir().unwrap();
    let output = psat(home.path(), &["--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    for subcommand in ["page", "sitemap", "lookup"] {
        assert!(stdout.contains(subcommand), "help should list '{}'", subcommand);
    }
}

/// Test that version command works
#[test]
fn test_version_command() {
    let home = tempfile::tempdir().unwrap();
    let output = psat(home.path(), &["--version"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_lookup_json() {
    let home = tempfile::tempdir().unwrap();
    let output = psat(home.path(), &["lookup", "test_cookie", ".doubleclick.net", "--json"]);
    assert!(output.status.success());

    let annotation: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(annotation["platform"], "DoubleClick/Google Marketing");
    assert_eq!(annotation["category"], "Marketing");
}

#[test]
fn test_page_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let capture = write_capture(dir.path(), "page.json", &doubleclick_capture());
    let out = dir.path().join("report.json");

    let output = psat(
        dir.path(),
        &["page", &capture, "-o", out.to_str().unwrap(), "--json"],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["type"], "url");
    assert_eq!(report["json"][0]["pageUrl"], "https://www.example.com/");
    let cookie = &report["json"][0]["cookieData"]["https://www.example.com"]["frameCookies"]
        ["test_cookie:.doubleclick.net:/"];
    assert_eq!(cookie["isBlocked"], true);

    let line: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(line["summary"]["totalCookies"], 1);
    assert_eq!(line["summary"]["blockedCookies"], 1);
}

#[test]
fn test_sitemap_keeps_going_after_bad_capture() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_capture(dir.path(), "a.json", &doubleclick_capture());
    let missing = dir.path().join("missing.json").display().to_string();
    let out = dir.path().join("sitemap.json");

    let output = psat(
        dir.path(),
        &[
            "sitemap", &good, &missing,
            "--site", "https://www.example.com",
            "-c", "2",
            "-o", out.to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["type"], "sitemap");
    assert_eq!(report["selectedSite"], "https://www.example.com");
    assert_eq!(report["json"].as_array().unwrap().len(), 2);
    assert_eq!(report["json"][1]["note"]["status"], "error");
    assert_eq!(report["erroredOutUrls"][0]["errorCode"], "CAPTURE_ERROR");
}

#[test]
fn test_sitemap_dir_input() {
    let dir = tempfile::tempdir().unwrap();
    let captures = dir.path().join("captures");
    std::fs::create_dir(&captures).unwrap();
    write_capture(&captures, "1.json", &doubleclick_capture());
    write_capture(&captures, "2.json", &json!({"pageUrl": "https://www.example.com/about"}));
    std::fs::write(captures.join("notes.txt"), "ignored").unwrap();
    let out = dir.path().join("sitemap.json");

    let output = psat(
        dir.path(),
        &["sitemap", "--dir", captures.to_str().unwrap(), "-o", out.to_str().unwrap(), "--progressive"],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let urls: Vec<&str> = report["json"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["pageUrl"].as_str().unwrap())
        .collect();
    assert_eq!(urls, vec!["https://www.example.com/", "https://www.example.com/about"]);
}

#[test]
fn test_zero_concurrency_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let capture = write_capture(dir.path(), "a.json", &doubleclick_capture());
    let out = dir.path().join("never.json");

    let output = psat(dir.path(), &["sitemap", &capture, "-c", "0", "-o", out.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
    assert!(!out.exists(), "no report may be written on a fatal error");
}

#[test]
fn test_bad_knowledge_base_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let kb = dir.path().join("kb.json");
    std::fs::write(&kb, "{not json").unwrap();

    let output = psat(
        dir.path(),
        &["--knowledge-base", kb.to_str().unwrap(), "lookup", "_ga", "example.com"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("knowledge base"));
}

#[test]
fn test_custom_knowledge_base() {
    let dir = tempfile::tempdir().unwrap();
    let kb = dir.path().join("kb.json");
    std::fs::write(
        &kb,
        r#"{"version": "custom", "cookies": [{"name": "acme_*", "platform": "Acme", "category": "Analytics"}]}"#,
    )
    .unwrap();

    let output = psat(
        dir.path(),
        &["--knowledge-base", kb.to_str().unwrap(), "lookup", "acme_visitor", "shop.test", "--json"],
    );
    assert!(output.status.success());
    let annotation: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(annotation["platform"], "Acme");
    assert_eq!(annotation["wildcard"], "1");
}
