use print_notify::config::PrintLogConfig;
use print_notify::print_log::{filtered_entry, log_file_name};
use print_notify::status::PercentMode;
use print_notify::{GcodeState, NormalizedStatus, PrintLogWriter, StatusNormalizer, StatusRecord};
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};

fn status(state: &str, layer: i64) -> NormalizedStatus {
    let mut record = StatusRecord {
        gcode_state: Some(GcodeState::from(state)),
        layer_num: Some(layer),
        total_layer_num: Some(10),
        project_id: Some("111".to_string()),
        task_id: Some("222".to_string()),
        subtask_id: Some("333".to_string()),
        ..Default::default()
    };
    record.extra.insert("ams".to_string(), json!({"tray": [1, 2, 3]}));
    record.extra.insert("nozzle_temper".to_string(), json!(220.5));
    StatusNormalizer::new(PercentMode::Layer).normalize(record)
}

fn writer(dir: &Path) -> PrintLogWriter {
    PrintLogWriter::new(PrintLogConfig {
        directory: dir.join("logs"),
        interval: Duration::from_secs(60),
        excluded_keys: vec!["ams".to_string()],
    })
}

fn read_lines(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_log_lifecycle_with_interval() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = writer(dir.path());
    let t0 = Instant::now();

    log.observe_at(&status("IDLE", 0), t0);
    assert!(!log.is_logging());

    log.observe_at(&status("RUNNING", 1), t0);
    let path = log.current_path().unwrap().to_path_buf();
    assert_eq!(path.file_name().unwrap().to_str().unwrap(), log_file_name(&status("RUNNING", 1).record));

    // Within the interval: skipped. After it: written.
    log.observe_at(&status("RUNNING", 2), t0 + Duration::from_secs(30));
    log.observe_at(&status("RUNNING", 3), t0 + Duration::from_secs(61));
    log.observe_at(&status("RUNNING", 4), t0 + Duration::from_secs(62));
    // Paused statuses are not written.
    log.observe_at(&status("PAUSE", 4), t0 + Duration::from_secs(200));
    log.observe_at(&status("FINISH", 10), t0 + Duration::from_secs(201));
    assert!(!log.is_logging());

    let lines = read_lines(&path);
    let layers: Vec<i64> = lines
        .iter()
        .map(|l| l["layer_num"].as_i64().unwrap())
        .collect();
    assert_eq!(layers, vec![1, 3, 10]);
    assert_eq!(lines[2]["gcode_state"], "FINISH");
    assert_eq!(lines[0]["mc_percent"], 10);
    assert!(lines.iter().all(|l| l.get("ams").is_none()));
    assert_eq!(lines[0]["nozzle_temper"], 220.5);
}

#[test]
fn test_file_name_uses_job_identifiers() {
    let name = log_file_name(&status("RUNNING", 1).record);
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    assert_eq!(name, format!("print_{}_111_222_333.log", date));

    let anonymous = log_file_name(&StatusRecord::default());
    assert!(anonymous.ends_with("_0_0_0.log"));
}

#[test]
fn test_filtering_only_drops_listed_keys() {
    let entry = filtered_entry(&status("RUNNING", 1).record, &["ams".to_string()]);
    let object = entry.as_object().unwrap();
    assert!(!object.contains_key("ams"));
    assert!(object.contains_key("nozzle_temper"));
    assert!(object.contains_key("project_id"));
}

#[test]
fn test_unwritable_directory_disables_logging() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("logs");
    std::fs::write(&blocker, "not a directory").unwrap();

    let mut log = writer(dir.path());
    let t0 = Instant::now();

    log.observe_at(&status("RUNNING", 1), t0);
    assert!(!log.is_logging());
    log.observe_at(&status("RUNNING", 2), t0 + Duration::from_secs(120));
    assert!(!log.is_logging());

    // A new job after the failed one tries again.
    log.observe_at(&status("FAILED", 2), t0 + Duration::from_secs(121));
    std::fs::remove_file(&blocker).unwrap();
    log.observe_at(&status("RUNNING", 1), t0 + Duration::from_secs(122));
    assert!(log.is_logging());
}

#[test]
fn test_close_flushes_open_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = writer(dir.path());

    log.observe(&status("RUNNING", 1));
    let path = log.current_path().unwrap().to_path_buf();
    log.close();

    assert!(!log.is_logging());
    assert_eq!(read_lines(&path).len(), 1);
}
