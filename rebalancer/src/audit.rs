//! JSONL audit trail.
//!
//! Each rebalance appends events to an audit.jsonl file, one JSON object
//! per line, so a run can be replayed from the record alone.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use spotsync_broker::AccountState;

use crate::error::Result;
use crate::execution::ExecutionReport;
use crate::plan::Plan;

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: BufWriter<std::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            data,
        };
        let json = serde_json::to_string(&entry)?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_simple(&mut self, event: &'static str) -> Result<()> {
        self.log(event, serde_json::json!({}))
    }
}

pub fn log_run_started(audit: &mut AuditLog, target_file: &str, account_id: &str) -> Result<()> {
    audit.log(
        "run_started",
        serde_json::json!({
            "target_file": target_file,
            "account": account_id,
        }),
    )
}

/// The snapshot a plan was computed against.
pub fn log_snapshot(audit: &mut AuditLog, state: &AccountState) -> Result<()> {
    audit.log(
        "snapshot",
        serde_json::json!({
            "positions": state.positions,
            "open_orders": state.open_orders,
        }),
    )
}

pub fn log_plan(audit: &mut AuditLog, plan: &Plan) -> Result<()> {
    audit.log("plan_computed", serde_json::to_value(plan)?)
}

/// One event per action outcome, then a summary.
pub fn log_report(audit: &mut AuditLog, report: &ExecutionReport) -> Result<()> {
    for record in &report.outcomes {
        audit.log("action", serde_json::to_value(record)?)?;
    }
    for skipped in report.skipped() {
        audit.log("symbol_skipped", serde_json::to_value(skipped)?)?;
    }
    audit.log(
        "run_completed",
        serde_json::json!({
            "account": report.account,
            "started_at": report.started_at,
            "finished_at": report.finished_at,
            "succeeded": report.succeeded().count(),
            "failed": report.failed().count(),
            "skipped": report.skipped_actions().count(),
            "residuals": report.residuals(),
            "aborted": report.aborted,
        }),
    )
}
