//! End-to-end runs of the orchestrator against temporary log trees.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
use tokio::time::timeout;

use cidtrack_core::config::TrackerConfig;
use cidtrack_daemon::cli::Cli;
use cidtrack_daemon::orchestrator::{EXIT_OK, Orchestrator, SHUTDOWN_DEADLINE};
use cidtrack_daemon::settings::Settings;

const SETTLE: Duration = Duration::from_millis(300);
const V5: &str = "550e8400-e29b-51d4-a716-446655440000";

fn settings(dirs: &[&Path], extra: &[&str]) -> Settings {
    let sources: Vec<String> = dirs
        .iter()
        .map(|d| format!(r#"{{"path": {:?}}}"#, d.display().to_string()))
        .collect();
    let config = TrackerConfig::parse(&format!(
        r#"{{"log_sources": [{}], "watch_interval": "20ms"}}"#,
        sources.join(",")
    ))
    .unwrap();

    let mut argv = vec!["cidtrack"];
    argv.extend_from_slice(extra);
    Settings::resolve(config, &Cli::parse_from(argv)).unwrap()
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
}

async fn next_line(reader: &mut BufReader<DuplexStream>) -> String {
    let mut line = String::new();
    timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for output")
        .unwrap();
    line
}

#[tokio::test]
async fn streams_json_records_and_stops_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    append(&log, "old CID[0] line\n");

    let orchestrator = Orchestrator::build(settings(&[dir.path()], &[])).unwrap();
    let cancel = orchestrator.cancellation_token();
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let run = tokio::spawn(orchestrator.run(writer));
    tokio::time::sleep(SETTLE).await;

    append(&log, &format!("INFO CID[{V5}] request done\n"));

    let mut reader = BufReader::new(reader);
    let line = next_line(&mut reader).await;
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["cid"], V5);
    assert_eq!(value["uuid"], V5);
    assert_eq!(value["is_valid"], true);
    assert!(value["log_file"].as_str().unwrap().ends_with("app.log"));

    cancel.cancel();
    let summary = timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.exit_code(), EXIT_OK);
    assert_eq!(summary.records_written, 1);
}

#[tokio::test]
async fn structured_output_from_two_sources() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::build(settings(
        &[first.path(), second.path()],
        &["--output", "structured"],
    ))
    .unwrap();
    assert_eq!(orchestrator.pipelines().len(), 2);

    let cancel = orchestrator.cancellation_token();
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let run = tokio::spawn(orchestrator.run(writer));
    tokio::time::sleep(SETTLE).await;

    append(&first.path().join("one.log"), "CID[alpha]\n");
    let mut reader = BufReader::new(reader);
    let line = next_line(&mut reader).await;
    assert!(line.contains("CID:alpha FILE:one.log"), "{line}");

    append(&second.path().join("two.log"), "CID[beta]\n");
    let line = next_line(&mut reader).await;
    assert!(line.contains("CID:beta FILE:two.log"), "{line}");

    cancel.cancel();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.exit_code(), EXIT_OK);
}

#[tokio::test]
async fn missing_directory_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone");

    let orchestrator = Orchestrator::build(settings(&[dir.path(), &missing], &[])).unwrap();
    let (writer, _reader) = tokio::io::duplex(1024);

    let err = orchestrator.run(writer).await.unwrap_err();
    assert!(err.to_string().contains("gone"), "{err}");
}

#[tokio::test]
async fn closed_output_shuts_down_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");

    let orchestrator = Orchestrator::build(settings(&[dir.path()], &[])).unwrap();
    let (writer, reader) = tokio::io::duplex(64);
    drop(reader);
    let run = tokio::spawn(orchestrator.run(writer));
    tokio::time::sleep(SETTLE).await;

    append(&log, &format!("CID[{V5}]\n"));

    let summary = timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_ne!(summary.exit_code(), EXIT_OK);
}

#[tokio::test]
async fn shutdown_of_many_sources_with_stuck_output_meets_one_deadline() {
    let dirs: Vec<_> = (0..4).map(|_| tempfile::tempdir().unwrap()).collect();
    let paths: Vec<&Path> = dirs.iter().map(|d| d.path()).collect();

    let orchestrator =
        Orchestrator::build(settings(&paths, &["--buffer-size", "2"])).unwrap();
    let cancel = orchestrator.cancellation_token();
    // nobody reads this side, so the sink stalls once it is full
    let (writer, _reader) = tokio::io::duplex(64);
    let run = tokio::spawn(orchestrator.run(writer));
    tokio::time::sleep(SETTLE).await;

    for dir in &paths {
        let lines: String = (0..50).map(|i| format!("CID[req-{i}]\n")).collect();
        append(&dir.join("busy.log"), &lines);
    }
    tokio::time::sleep(SETTLE).await;

    let started = std::time::Instant::now();
    cancel.cancel();
    let summary = timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < SHUTDOWN_DEADLINE + Duration::from_millis(750),
        "shutdown took {elapsed:?}"
    );
    assert_eq!(summary.exit_code(), EXIT_OK);
}
