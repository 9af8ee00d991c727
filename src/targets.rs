//! Target list assembly
//!
//! Sites come from the `--site` flag, then the lines of the `--sites` file,
//! then stdin when it is piped.

use std::io::IsTerminal;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Collect targets in flag, file, stdin order. Duplicates are kept.
pub async fn collect_targets(site: Option<&str>, sites_file: Option<&Path>) -> Vec<String> {
    let mut targets = Vec::new();

    if let Some(site) = site.map(str::trim).filter(|site| !site.is_empty()) {
        targets.push(site.to_string());
    }

    if let Some(path) = sites_file {
        targets.extend(read_sites_file(path).await);
    }

    if !std::io::stdin().is_terminal() {
        let stdin = BufReader::new(tokio::io::stdin());
        match read_lines(stdin).await {
            Ok(lines) => targets.extend(lines),
            Err(e) => warn!("Failed to read targets from stdin: {}", e),
        }
    }

    debug!("Collected {} targets", targets.len());
    targets
}

/// Non-blank lines of a sites file. An unreadable file yields nothing.
pub async fn read_sites_file(path: &Path) -> Vec<String> {
    match tokio::fs::File::open(path).await {
        Ok(file) => match read_lines(BufReader::new(file)).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Failed to read sites file {}: {}", path.display(), e);
                Vec::new()
            }
        },
        Err(e) => {
            warn!("Failed to open sites file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Trimmed, non-blank lines of a reader
pub async fn read_lines<R: AsyncBufRead + Unpin>(reader: R) -> std::io::Result<Vec<String>> {
    let mut lines = reader.lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    Ok(out)
}
