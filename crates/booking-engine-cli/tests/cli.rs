use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn booking() -> Command {
    Command::cargo_bin("booking").unwrap()
}

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn run_json(args: &[&str]) -> Value {
    let output = booking().args(args).output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn dates(view: &Value) -> Vec<String> {
    view["occurrences"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["date"].as_str().unwrap().to_string())
        .collect()
}

// ── preview ─────────────────────────────────────────────────────────────────

#[test]
fn test_preview_free_calendar() {
    let view = run_json(&[
        "preview", "--anchor", "2024-03-04", "--time", "10:00", "--frequency", "weekly",
        "--count", "3", "--today", "2024-03-01",
    ]);
    assert_eq!(dates(&view), ["2024-03-04", "2024-03-11", "2024-03-18"]);
    assert_eq!(view["ready"], true);
    assert_eq!(view["unresolved"], 0);
    assert_eq!(view["occurrences"][0]["status"], "available");
}

#[test]
fn test_preview_flags_conflict() {
    let view = run_json(&[
        "preview", "--anchor", "2024-03-04", "--time", "10:00", "--frequency", "weekly",
        "--count", "3", "--today", "2024-03-01", "--fixture", &fixture("conflict.json"),
    ]);
    assert_eq!(view["occurrences"][1]["status"], "conflict");
    assert_eq!(view["occurrences"][1]["reason"], "time_occupied");
    // cancelled slot on 03-18 does not block
    assert_eq!(view["occurrences"][2]["status"], "available");
    assert_eq!(view["unresolved"], 1);
    assert_eq!(view["ready"], false);
}

#[test]
fn test_preview_monthly_clamps() {
    let view = run_json(&[
        "preview", "--anchor", "2024-01-31", "--time", "09:00", "--frequency", "monthly",
        "--count", "3", "--today", "2024-01-01",
    ]);
    assert_eq!(dates(&view), ["2024-01-31", "2024-02-29", "2024-03-31"]);
}

#[test]
fn test_preview_respects_config_cap() {
    let view = run_json(&[
        "--config", &fixture("small_cap.toml"), "preview", "--anchor", "2024-03-04", "--time",
        "10:00", "--frequency", "weekly", "--count", "5", "--today", "2024-03-01",
    ]);
    assert_eq!(view["occurrences"].as_array().unwrap().len(), 2);
    assert_eq!(view["truncated"], 3);
}

#[test]
fn test_preview_rejects_unknown_frequency() {
    booking()
        .args([
            "preview", "--anchor", "2024-03-04", "--time", "10:00", "--frequency", "daily",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown frequency"));
}

#[test]
fn test_preview_rejects_bad_date() {
    booking()
        .args([
            "preview", "--anchor", "04/03/2024", "--time", "10:00", "--frequency", "weekly",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid date"));
}

#[test]
fn test_bad_timezone_config_fails() {
    booking()
        .args([
            "--config", &fixture("bad_timezone.toml"), "preview", "--anchor", "2024-03-04",
            "--time", "10:00", "--frequency", "weekly",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Mars/Olympus"));
}

// ── plan ────────────────────────────────────────────────────────────────────

#[test]
fn test_plan_resolves_conflict() {
    let out = run_json(&["plan", "--session", &fixture("plan_resolve.json")]);
    assert_eq!(out["ready"], true);
    assert_eq!(out["unresolved"], 0);
    assert_eq!(dates(&out), ["2024-03-04", "2024-03-11", "2024-03-18"]);
    assert_eq!(out["occurrences"][1]["time"], "14:00");
    assert_eq!(out["occurrences"][1]["status"], "resolved");
    assert!(out["rejected"].as_array().unwrap().is_empty());
}

#[test]
fn test_plan_skip_appends_and_reports_rejections() {
    let out = run_json(&["plan", "--session", &fixture("plan_skip.json")]);
    assert_eq!(dates(&out), ["2024-03-04", "2024-03-18", "2024-03-25"]);
    assert_eq!(out["skipped"][0]["date"], "2024-03-11");
    assert_eq!(out["ready"], true);

    let rejected = out["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["occurrence_index"], 0);
    assert!(rejected[0]["error"].as_str().unwrap().contains("in the past"));
}

#[test]
fn test_plan_checks_dates_appended_past_first_fetch() {
    let out = run_json(&["plan", "--session", &fixture("plan_skip_far.json")]);
    assert_eq!(dates(&out), ["2024-03-25", "2024-04-01"]);
    assert_eq!(out["occurrences"][1]["status"], "conflict");
    assert_eq!(out["ready"], false);

    let rejected = out["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["occurrence_index"], 3);
    assert!(rejected[0]["error"]
        .as_str()
        .unwrap()
        .contains("outside the checked availability range"));
}

#[test]
fn test_plan_missing_file() {
    booking()
        .args(["plan", "--session", "does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reading session"));
}

// ── bulk ────────────────────────────────────────────────────────────────────

#[test]
fn test_bulk_plan() {
    let out = run_json(&[
        "bulk", "--request", &fixture("bulk.json"), "--fixture", &fixture("bulk_fixture.json"),
        "--today", "2024-03-01",
    ]);
    let candidates = out["candidates"].as_array().unwrap();
    let got: Vec<_> = candidates
        .iter()
        .map(|c| c["classification"].as_str().unwrap())
        .collect();
    assert_eq!(got, ["conflict", "available", "occupied"]);
    assert_eq!(candidates[2]["reason"], "day_blocked");
    assert_eq!(out["duplicates_dropped"], 1);
}

#[test]
fn test_bulk_past_dates_dropped() {
    let out = run_json(&["bulk", "--request", &fixture("bulk.json"), "--today", "2024-03-06"]);
    assert_eq!(out["past_excluded"], 1);
    assert_eq!(out["candidates"].as_array().unwrap().len(), 2);
}

#[test]
fn test_verbose_logs_to_stderr() {
    booking()
        .env_remove("RUST_LOG")
        .args([
            "--verbose", "preview", "--anchor", "2024-03-04", "--time", "10:00", "--frequency",
            "weekly", "--count", "2", "--today", "2024-03-01",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("availability snapshot applied"));
}

// ── commit ──────────────────────────────────────────────────────────────────

#[test]
fn test_commit_dry_run() {
    let out = run_json(&[
        "commit", "--session", &fixture("commit_session.json"), "--draft", &fixture("draft.json"),
    ]);
    assert_eq!(out["report"]["created_count"], 3);
    assert!(out["report"]["failed"].as_array().unwrap().is_empty());

    let request = &out["request"];
    assert_eq!(request["anchor_slot_id"], "s-1");
    assert_eq!(request["occurrences"][1]["date"], "2024-03-12");
    assert_eq!(request["inaugural_flags"]["2024-03-04"], true);
    assert_eq!(request["inaugural_flags"]["2024-03-12"], false);
    assert_eq!(request["reminder_flags"]["2024-03-18"], true);
    assert_eq!(request["payment_flags"]["2024-03-04"], true);
}

#[test]
fn test_commit_rejects_second_inaugural() {
    booking()
        .args([
            "commit", "--session", &fixture("commit_session.json"), "--draft",
            &fixture("draft_double_inaugural.json"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at most one"));
}

#[test]
fn test_commit_refuses_rejected_resolutions() {
    booking()
        .args([
            "commit", "--session", &fixture("plan_skip.json"), "--draft", &fixture("draft.json"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("rejected"));
}
