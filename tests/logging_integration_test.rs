// Initializes the global subscriber, so this file holds a single test.

use std::fs;
use std::time::Duration;

use maestro::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl, RotationPolicy};
use tempfile::TempDir;
use tracing::{info, instrument, warn};

#[test]
fn test_file_logging_writes_json_lines() {
    let temp_dir = TempDir::new().unwrap();
    let config = LogConfig {
        level: "info".to_string(),
        format: LogFormat::Json,
        log_dir: Some(temp_dir.path().to_path_buf()),
        enable_console: false,
        rotation: RotationPolicy::Never,
    };

    let logger = LoggerImpl::init(&config).unwrap();

    info!(mission_id = "3f2a", "mission created");
    tracing::debug!("filtered out below info");

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        run_step("planning").await;
    });

    // Dropping the logger flushes the non-blocking writer.
    drop(logger);
    std::thread::sleep(Duration::from_millis(100));

    let contents = fs::read_to_string(temp_dir.path().join("maestro.log")).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is JSON"))
        .collect();

    assert!(lines
        .iter()
        .any(|l| l["fields"]["message"] == "mission created" && l["fields"]["mission_id"] == "3f2a"));
    assert!(lines.iter().any(|l| l["span"]["name"] == "run_step"));
    assert!(!contents.contains("filtered out below info"));

    // A second global subscriber is refused.
    assert!(LoggerImpl::init(&LogConfig::default()).is_err());
}

#[instrument]
async fn run_step(phase: &str) {
    tokio::task::yield_now().await;
    warn!(phase, "step took longer than expected");
}
