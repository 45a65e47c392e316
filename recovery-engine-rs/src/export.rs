//! # Decision Path Export
//!
//! Renders a finished path for audit systems (`json`) or for humans
//! (`text`). The JSON form parses back with [`DecisionPath::from_json`].

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::DecisionPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Pretty-printed JSON with RFC 3339 timestamps
    Json,
    /// Plain-text operator report
    Text,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" => Ok(ExportFormat::Text),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Serializes `path` in the requested format
pub fn export(path: &DecisionPath, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(path)?),
        ExportFormat::Text => Ok(render_text(path)),
    }
}

fn render_text(path: &DecisionPath) -> String {
    let mut out = String::new();
    let result = path.final_result.map(|r| r.as_str()).unwrap_or("UNFINISHED");

    // Writing into a String cannot fail
    let _ = writeln!(out, "Decision path {}", path.path_id);
    let _ = writeln!(out, "  failure:   {}", path.failure_id);
    let _ = writeln!(out, "  strategy:  {}", path.strategy_id.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "  dry run:   {}", path.dry_run);
    let _ = writeln!(out, "  started:   {}", path.start_time.to_rfc3339());
    if let Some(end) = path.end_time {
        let _ = writeln!(out, "  finished:  {}", end.to_rfc3339());
    }
    let _ = writeln!(out, "  result:    {} (success: {})", result, path.success);
    let _ = writeln!(out, "  duration:  {:.1} ms", path.total_execution_time_ms);
    if let Some(error) = &path.error_message {
        let _ = writeln!(out, "  error:     {}", error);
    }
    if let Some(node) = &path.suspended_at {
        let _ = writeln!(out, "  suspended: awaiting approval at '{}'", node);
    }

    let _ = writeln!(out, "\nNodes visited: {}", path.nodes_visited.join(" -> "));

    let _ = writeln!(
        out,
        "\nActions ({} ok, {} failed):",
        path.actions_successful, path.actions_failed
    );
    if path.actions_taken.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for (i, action) in path.actions_taken.iter().enumerate() {
        let _ = write!(
            out,
            "  {}. {} [{}] -> {} in {:.1} ms, {} attempt(s)",
            i + 1,
            action.action,
            action.node_id,
            action.result,
            action.duration_ms,
            action.attempts
        );
        if action.dry_run {
            let _ = write!(out, " (simulated)");
        }
        match &action.message {
            Some(message) => {
                let _ = writeln!(out, ": {}", message);
            }
            None => {
                let _ = writeln!(out);
            }
        }
    }

    if !path.approvals.is_empty() {
        let _ = writeln!(out, "\nApprovals:");
        for approval in &path.approvals {
            let _ = writeln!(
                out,
                "  {} -> {:?}{}",
                approval.subject,
                approval.status,
                approval
                    .approver
                    .as_deref()
                    .map(|a| format!(" by {}", a))
                    .unwrap_or_default()
            );
        }
    }

    let _ = writeln!(out, "\nReasoning:");
    for line in &path.decision_reasoning {
        let _ = writeln!(out, "  - {}", line);
    }

    out
}
