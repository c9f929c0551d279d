//! Parser for aria2c console output and exit codes

use super::EngineProgress;
use crate::error::FetchError;
use regex::Regex;
use std::sync::OnceLock;

// Literal patterns, compiled once
#[allow(clippy::expect_used)]
fn readout_regex() -> &'static Regex {
    static READOUT: OnceLock<Regex> = OnceLock::new();
    READOUT.get_or_init(|| {
        Regex::new(r"\[#[0-9a-fA-F]+\s+([\d.]+)(B|KiB|MiB|GiB)/([\d.]+)(B|KiB|MiB|GiB)")
            .expect("valid readout pattern")
    })
}

#[allow(clippy::expect_used)]
fn status_regex() -> &'static Regex {
    static STATUS: OnceLock<Regex> = OnceLock::new();
    STATUS.get_or_init(|| Regex::new(r"status=(\d{3})").expect("valid status pattern"))
}

fn to_bytes(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let multiplier = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

/// Parse a console readout such as `[#2089b0 400.0KiB/33.2MiB(1%) CN:1 DL:115.7KiB]`
///
/// Returns `None` for lines that carry no transfer figures. A total of zero
/// (aria2c reports `0B` before the response headers arrive) is reported as
/// unknown.
pub fn parse_readout(line: &str) -> Option<EngineProgress> {
    let caps = readout_regex().captures(line)?;
    let done = to_bytes(caps.get(1)?.as_str(), caps.get(2)?.as_str())?;
    let total = to_bytes(caps.get(3)?.as_str(), caps.get(4)?.as_str())?;

    Some(EngineProgress {
        bytes_so_far: done,
        bytes_total: (total > 0).then_some(total),
    })
}

/// Map an HTTP status to a fetch error
pub fn classify_http_status(status: u16) -> FetchError {
    match status {
        404 | 410 => FetchError::NotFound,
        401 | 403 => FetchError::Forbidden,
        429 | 500..=599 => FetchError::ServerError(status),
        other => FetchError::EngineFailure(format!("unexpected HTTP status {other}")),
    }
}

/// Classify a failed aria2c run from its exit code and combined output
///
/// `code` is `None` when the process was terminated by a signal.
pub fn classify_exit(code: Option<i32>, output: &str) -> FetchError {
    let http_status = status_regex()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok());

    let Some(code) = code else {
        return FetchError::EngineFailure("aria2c terminated by signal".to_string());
    };

    match code {
        // Network timeout / transfer too slow
        2 | 5 => FetchError::Timeout,
        3 => FetchError::NotFound,
        6 => FetchError::Connection(last_error_line(output)),
        19 => FetchError::Connection("name resolution failed".to_string()),
        // Disk and file errors
        9 | 15 | 16 | 17 | 18 => FetchError::Io(last_error_line(output)),
        24 => FetchError::Forbidden,
        // Bad HTTP response; unknown errors may still carry a status
        1 | 22 => match http_status {
            Some(status) => classify_http_status(status),
            None => FetchError::EngineFailure(format!(
                "aria2c exited with code {code}: {}",
                last_error_line(output)
            )),
        },
        other => FetchError::EngineFailure(format!(
            "aria2c exited with code {other}: {}",
            last_error_line(output)
        )),
    }
}

fn last_error_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.contains("ERROR") || line.contains("errorCode"))
        .or_else(|| output.lines().rev().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("no output")
        .to_string()
}
