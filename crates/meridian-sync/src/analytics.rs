//! # Sync Analytics
//!
//! Builds the activity report the back office asks for: how many operations
//! ran in a period, how many succeeded, how much data moved. Pure
//! computation over snapshots the engine already holds; nothing here reads
//! live state.

use chrono::{DateTime, Utc};

use meridian_core::{
    BackupRecord, ConflictRecord, OperationStatus, SyncAnalytics, SyncOperation,
};

/// Computes the report for `[period_start, period_end]`, both ends inclusive.
///
/// Operations belong to the period their `created_at` falls in, conflicts by
/// `detected_at`, backups by `created_at`. Average duration and transferred
/// bytes only count completed operations.
pub fn build_report(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    operations: &[SyncOperation],
    conflicts: &[ConflictRecord],
    active_devices: u64,
    backups: &[BackupRecord],
) -> SyncAnalytics {
    let in_period = |t: DateTime<Utc>| t >= period_start && t <= period_end;

    let mut total = 0u64;
    let mut successful = 0u64;
    let mut failed = 0u64;
    let mut duration_sum_ms = 0u64;
    let mut duration_samples = 0u64;
    let mut transferred = 0u64;

    for op in operations.iter().filter(|op| in_period(op.created_at)) {
        total += 1;
        match op.status {
            OperationStatus::Completed => {
                successful += 1;
                transferred += op.payload_bytes();
                if let Some(ms) = op.duration_ms() {
                    duration_sum_ms += ms.max(0) as u64;
                    duration_samples += 1;
                }
            }
            OperationStatus::Failed => failed += 1,
            _ => {}
        }
    }

    let average_duration_ms = if duration_samples > 0 {
        duration_sum_ms / duration_samples
    } else {
        0
    };

    let conflicts_detected = conflicts
        .iter()
        .filter(|c| in_period(c.detected_at))
        .count() as u64;

    let backups_created = backups
        .iter()
        .filter(|b| in_period(b.created_at))
        .count() as u64;

    SyncAnalytics {
        period_start,
        period_end,
        total_operations: total,
        successful_operations: successful,
        failed_operations: failed,
        average_duration_ms,
        data_transferred_bytes: transferred,
        conflicts_detected,
        active_devices,
        backups_created,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meridian_core::{BackupKind, SyncPriority};
    use serde_json::json;

    fn completed_op(created: DateTime<Utc>, payload: serde_json::Value, secs: i64) -> SyncOperation {
        let mut op = SyncOperation::upload("customer", "c-1", payload, 0, SyncPriority::Normal, created);
        op.begin(created);
        op.complete(created + Duration::seconds(secs));
        op
    }

    #[test]
    fn test_report_windows_and_averages() {
        let start = Utc::now();
        let end = start + Duration::hours(1);

        let inside_a = completed_op(start + Duration::minutes(5), json!({"n": 1}), 2);
        let inside_b = completed_op(start + Duration::minutes(10), json!({"n": 2}), 4);
        let outside = completed_op(end + Duration::minutes(1), json!({"n": 3}), 2);

        let mut failed = SyncOperation::upload(
            "customer",
            "c-2",
            json!({"n": 4}),
            0,
            SyncPriority::Normal,
            start + Duration::minutes(15),
        );
        failed.begin(start + Duration::minutes(15));
        failed.fail("remote rejected", start + Duration::minutes(16));

        let pending = SyncOperation::upload(
            "customer",
            "c-3",
            json!({"n": 5}),
            0,
            SyncPriority::Normal,
            start + Duration::minutes(20),
        );

        let report = build_report(
            start,
            end,
            &[inside_a.clone(), inside_b.clone(), outside, failed, pending],
            &[],
            2,
            &[],
        );

        assert_eq!(report.total_operations, 4);
        assert_eq!(report.successful_operations, 2);
        assert_eq!(report.failed_operations, 1);
        assert_eq!(report.average_duration_ms, 3000);
        assert_eq!(
            report.data_transferred_bytes,
            inside_a.payload_bytes() + inside_b.payload_bytes()
        );
        assert_eq!(report.active_devices, 2);
        assert!((report.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_period() {
        let start = Utc::now();
        let report = build_report(start, start + Duration::hours(1), &[], &[], 0, &[]);
        assert_eq!(report.total_operations, 0);
        assert_eq!(report.average_duration_ms, 0);
        assert_eq!(report.success_rate(), 0.0);
    }

    #[test]
    fn test_conflicts_and_backups_counted_by_timestamp() {
        let start = Utc::now();
        let end = start + Duration::hours(1);

        let conflict_in = ConflictRecord::new(
            "op-1",
            "customer",
            "c-1",
            json!({"a": 1}),
            1,
            json!({"a": 2}),
            2,
            start + Duration::minutes(1),
        );
        let mut conflict_out = conflict_in.clone();
        conflict_out.detected_at = end + Duration::minutes(1);

        let backup_in = BackupRecord::new(
            "daily",
            BackupKind::Full,
            vec!["customer".to_string()],
            start + Duration::minutes(2),
        );
        let backup_out = BackupRecord::new(
            "daily",
            BackupKind::Full,
            vec!["customer".to_string()],
            end + Duration::minutes(2),
        );

        let report = build_report(
            start,
            end,
            &[],
            &[conflict_in, conflict_out],
            1,
            &[backup_in, backup_out],
        );
        assert_eq!(report.conflicts_detected, 1);
        assert_eq!(report.backups_created, 1);
    }
}
