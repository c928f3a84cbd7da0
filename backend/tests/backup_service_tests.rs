//! Backup service tests against the in-memory store.

mod common;

use std::collections::HashSet;

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use common::{doc, TestContext};
use heritage_keeper_backend::error::AppError;
use heritage_keeper_backend::models::audit_log::AuditQuery;
use heritage_keeper_backend::models::backup::{
    Backup, BackupRealm, BackupStatus, TriggerType,
};
use heritage_keeper_backend::models::backup_settings::UpdateScheduleRequest;
use heritage_keeper_backend::models::snapshot::{SnapshotPayload, PERSONS};
use heritage_keeper_backend::services::audit_service::AuditContext;
use heritage_keeper_backend::services::backup_service::{
    BackupOutcome, StaleTtl, PRE_RESTORE_CREATOR,
};

fn ctx(realm: BackupRealm) -> AuditContext {
    AuditContext::new("alice", "super-admin", realm, Some("127.0.0.1".into()))
}

async fn manual_backup(tc: &TestContext, realm: BackupRealm) -> String {
    match tc
        .state
        .backup_service
        .create_backup(realm, TriggerType::Manual, "alice", &ctx(realm))
        .await
    {
        BackupOutcome::Completed(summary) => summary.backup_id,
        BackupOutcome::Failed { message, .. } => panic!("backup failed: {}", message),
    }
}

async fn audit_entries(tc: &TestContext, action: &str) -> Vec<heritage_keeper_backend::models::audit_log::AuditLog> {
    tc.state
        .audit
        .query(&AuditQuery {
            action: Some(action.to_string()),
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn live_person_ids(tc: &TestContext) -> HashSet<String> {
    tc.stores()
        .content
        .fetch_all(PERSONS)
        .await
        .unwrap()
        .iter()
        .filter_map(|d| d.get("_id").and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_manual_backup_captures_realm_collections() {
    let tc = TestContext::new();
    tc.seed_persons(&["Amina", "Yusuf"]).await;
    tc.seed_news(&["Harvest festival"]).await;

    let id = manual_backup(&tc, BackupRealm::FamilyTree).await;
    let backup = tc
        .state
        .backup_service
        .get_backup(BackupRealm::FamilyTree, &id, true)
        .await
        .unwrap();

    assert_eq!(backup.status, BackupStatus::Completed);
    assert_eq!(backup.trigger_type, TriggerType::Manual);
    assert_eq!(backup.source_dashboard, "family-tree");
    assert!(id.starts_with("family-tree-manual-"));
    let stats = backup.stats.as_ref().unwrap();
    assert_eq!(stats.total_records, 2);
    match backup.data.as_ref().unwrap() {
        SnapshotPayload::FamilyTree { persons } => assert_eq!(persons.len(), 2),
        other => panic!("unexpected payload {:?}", other),
    }

    // Checksum recomputed over the stored payload matches.
    let stored = backup.metadata.checksum_sha256.clone().unwrap();
    assert_eq!(backup.data.unwrap().checksum_sha256().unwrap(), stored);
}

#[tokio::test]
async fn test_backup_resets_schedule_clock() {
    let tc = TestContext::new();
    let before = Utc::now();
    manual_backup(&tc, BackupRealm::Cms).await;

    let schedule = tc.state.backup_service.schedule(BackupRealm::Cms).await.unwrap();
    assert!(schedule.last_auto_backup.unwrap() >= before);
    let other = tc
        .state
        .backup_service
        .schedule(BackupRealm::FamilyTree)
        .await
        .unwrap();
    assert!(other.last_auto_backup.is_none());
}

#[tokio::test]
async fn test_retention_keeps_newest_completed() {
    let tc = TestContext::new();
    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(manual_backup(&tc, BackupRealm::FamilyTree).await);
    }

    let deleted = tc
        .state
        .backup_service
        .cleanup_old_backups(BackupRealm::FamilyTree, 5)
        .await
        .unwrap();
    assert_eq!(deleted, 3);

    let remaining = tc
        .state
        .backup_service
        .list_backups(BackupRealm::FamilyTree, Some(BackupStatus::Completed), Some(100))
        .await
        .unwrap();
    let remaining: Vec<String> = remaining.into_iter().map(|b| b.backup_id).collect();
    let expected: Vec<String> = ids[3..].iter().rev().cloned().collect();
    assert_eq!(remaining, expected);

    let cleanup = audit_entries(&tc, "BACKUP_CLEANUP").await;
    assert_eq!(cleanup.len(), 1);
    assert_eq!(cleanup[0].details["deleted_count"], 3);
}

#[tokio::test]
async fn test_retention_ignores_failed_and_other_realm() {
    let tc = TestContext::new();
    for _ in 0..3 {
        manual_backup(&tc, BackupRealm::Cms).await;
    }
    for _ in 0..3 {
        manual_backup(&tc, BackupRealm::FamilyTree).await;
    }
    tc.content.set_fail_fetch(true);
    let failed = tc
        .state
        .backup_service
        .create_backup(BackupRealm::Cms, TriggerType::Manual, "alice", &ctx(BackupRealm::Cms))
        .await;
    assert!(!failed.is_completed());
    tc.content.set_fail_fetch(false);

    let deleted = tc
        .state
        .backup_service
        .cleanup_old_backups(BackupRealm::Cms, 1)
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let cms_all = tc
        .state
        .backup_service
        .list_backups(BackupRealm::Cms, None, Some(100))
        .await
        .unwrap();
    assert_eq!(cms_all.len(), 2);
    assert!(cms_all.iter().any(|b| b.status == BackupStatus::Failed));

    let tree = tc
        .state
        .backup_service
        .list_backups(BackupRealm::FamilyTree, None, Some(100))
        .await
        .unwrap();
    assert_eq!(tree.len(), 3);
}

#[tokio::test]
async fn test_fetch_failure_marks_backup_failed() {
    let tc = TestContext::new();
    tc.content.set_fail_fetch(true);

    let outcome = tc
        .state
        .backup_service
        .create_backup(
            BackupRealm::FamilyTree,
            TriggerType::Manual,
            "alice",
            &ctx(BackupRealm::FamilyTree),
        )
        .await;
    let BackupOutcome::Failed { backup_id, message } = outcome else {
        panic!("expected a failed outcome");
    };
    assert!(message.contains("refused"));

    let record = tc
        .state
        .backup_service
        .get_backup(BackupRealm::FamilyTree, &backup_id, true)
        .await
        .unwrap();
    assert_eq!(record.status, BackupStatus::Failed);
    assert!(record.data.is_none());
    assert!(record.error_info.unwrap().message.contains("refused"));
    assert!(record.completed_at.is_some());

    let failures = audit_entries(&tc, "BACKUP_FAILED").await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].resource.as_deref(), Some(backup_id.as_str()));
    assert!(!failures[0].success);

    // The schedule clock only moves on success.
    let schedule = tc
        .state
        .backup_service
        .schedule(BackupRealm::FamilyTree)
        .await
        .unwrap();
    assert!(schedule.last_auto_backup.is_none());
}

#[tokio::test]
async fn test_restore_takes_pre_restore_snapshot() {
    let tc = TestContext::new();
    tc.seed_persons(&["Amina", "Yusuf"]).await;
    let original = manual_backup(&tc, BackupRealm::FamilyTree).await;
    tc.seed_persons(&["Added later"]).await;

    let result = tc
        .state
        .backup_service
        .restore_backup(BackupRealm::FamilyTree, &original, &ctx(BackupRealm::FamilyTree))
        .await
        .unwrap();
    let finished = Utc::now();

    assert_eq!(result.backup_id, original);
    assert_eq!(result.restored_records, 2);
    assert_eq!(result.failed_records, 0);
    assert_eq!(tc.stores().content.count(PERSONS).await.unwrap(), 2);

    let safety = tc
        .state
        .backup_service
        .get_backup(BackupRealm::FamilyTree, &result.pre_restore_backup_id, false)
        .await
        .unwrap();
    assert_eq!(safety.status, BackupStatus::Completed);
    assert_eq!(safety.created_by, PRE_RESTORE_CREATOR);
    assert_eq!(safety.trigger_type, TriggerType::Manual);
    assert_eq!(safety.stats.unwrap().total_records, 3);
    assert!(safety.created_at <= finished);

    let completed = audit_entries(&tc, "RESTORE_COMPLETED").await;
    assert_eq!(completed.len(), 1);
    assert_eq!(
        completed[0].details["pre_restore_backup_id"],
        json!(result.pre_restore_backup_id)
    );
    assert_eq!(completed[0].user, "alice");
}

#[tokio::test]
async fn test_restore_strips_identity_fields() {
    let tc = TestContext::new();
    tc.seed_persons(&["Amina", "Yusuf", "Layla"]).await;
    let before = live_person_ids(&tc).await;
    let id = manual_backup(&tc, BackupRealm::FamilyTree).await;

    tc.state
        .backup_service
        .restore_backup(BackupRealm::FamilyTree, &id, &ctx(BackupRealm::FamilyTree))
        .await
        .unwrap();

    let after = live_person_ids(&tc).await;
    assert_eq!(after.len(), 3);
    assert!(before.is_disjoint(&after));
}

#[tokio::test]
async fn test_tampered_backup_is_rejected_without_mutation() {
    let tc = TestContext::new();
    tc.seed_persons(&["Amina"]).await;
    let id = manual_backup(&tc, BackupRealm::FamilyTree).await;

    let mut backup = tc
        .stores()
        .backups
        .find(BackupRealm::FamilyTree, &id)
        .await
        .unwrap()
        .unwrap();
    backup.data = Some(SnapshotPayload::FamilyTree {
        persons: vec![doc(json!({ "name": "Forged" }))],
    });
    tc.stores().backups.update(&backup).await.unwrap();

    let err = tc
        .state
        .backup_service
        .restore_backup(BackupRealm::FamilyTree, &id, &ctx(BackupRealm::FamilyTree))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(ref m) if m.contains("checksum")));

    // No safety snapshot and no data change.
    let all = tc
        .state
        .backup_service
        .list_backups(BackupRealm::FamilyTree, None, Some(100))
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    let persons = tc.stores().content.fetch_all(PERSONS).await.unwrap();
    assert_eq!(persons.len(), 1);
    assert_eq!(persons[0]["name"], "Amina");

    let failures = audit_entries(&tc, "RESTORE_FAILED").await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].details["stage"], "integrity");
}

#[tokio::test]
async fn test_failed_safety_snapshot_aborts_restore() {
    let tc = TestContext::new();
    tc.seed_persons(&["Amina", "Yusuf"]).await;
    let id = manual_backup(&tc, BackupRealm::FamilyTree).await;
    tc.seed_persons(&["Layla"]).await;

    tc.content.set_fail_fetch(true);
    let err = tc
        .state
        .backup_service
        .restore_backup(BackupRealm::FamilyTree, &id, &ctx(BackupRealm::FamilyTree))
        .await
        .unwrap_err();
    tc.content.set_fail_fetch(false);

    match err {
        AppError::RestoreFailed {
            pre_restore_backup_id,
            ..
        } => assert!(pre_restore_backup_id.is_none()),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(tc.stores().content.count(PERSONS).await.unwrap(), 3);
}

#[tokio::test]
async fn test_apply_failure_reports_safety_snapshot() {
    let tc = TestContext::new();
    tc.seed_persons(&["Amina"]).await;
    let id = manual_backup(&tc, BackupRealm::FamilyTree).await;

    tc.content.set_fail_insert(true);
    let err = tc
        .state
        .backup_service
        .restore_backup(BackupRealm::FamilyTree, &id, &ctx(BackupRealm::FamilyTree))
        .await
        .unwrap_err();
    tc.content.set_fail_insert(false);

    let AppError::RestoreFailed {
        pre_restore_backup_id: Some(safety_id),
        ..
    } = err
    else {
        panic!("expected a restore failure carrying the safety snapshot");
    };
    let safety = tc
        .state
        .backup_service
        .get_backup(BackupRealm::FamilyTree, &safety_id, false)
        .await
        .unwrap();
    assert_eq!(safety.status, BackupStatus::Completed);
    assert_eq!(safety.created_by, PRE_RESTORE_CREATOR);
}

#[tokio::test]
async fn test_restore_rejects_unknown_and_foreign_backups() {
    let tc = TestContext::new();
    let cms_id = manual_backup(&tc, BackupRealm::Cms).await;

    let err = tc
        .state
        .backup_service
        .restore_backup(BackupRealm::FamilyTree, &cms_id, &ctx(BackupRealm::FamilyTree))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = tc
        .state
        .backup_service
        .get_backup(BackupRealm::FamilyTree, &cms_id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_restore_rejects_failed_backup() {
    let tc = TestContext::new();
    tc.content.set_fail_fetch(true);
    let outcome = tc
        .state
        .backup_service
        .create_backup(BackupRealm::Cms, TriggerType::Manual, "alice", &ctx(BackupRealm::Cms))
        .await;
    tc.content.set_fail_fetch(false);

    let err = tc
        .state
        .backup_service
        .restore_backup(BackupRealm::Cms, outcome.backup_id(), &ctx(BackupRealm::Cms))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_cms_restore_round_trips_singleton() {
    let tc = TestContext::new();
    tc.seed_news(&["Opening", "Closing"]).await;
    tc.stores()
        .content
        .insert_many(
            "ticker_settings",
            vec![doc(json!({ "speed": 40, "enabled": true }))],
        )
        .await
        .unwrap();
    let id = manual_backup(&tc, BackupRealm::Cms).await;

    tc.stores().content.delete_all("news").await.unwrap();
    tc.stores().content.delete_all("ticker_settings").await.unwrap();

    let result = tc
        .state
        .backup_service
        .restore_backup(BackupRealm::Cms, &id, &ctx(BackupRealm::Cms))
        .await
        .unwrap();
    assert_eq!(result.restored_records, 3);
    assert_eq!(result.collections.len(), 10);
    let settings = tc.stores().content.fetch_all("ticker_settings").await.unwrap();
    assert_eq!(settings.len(), 1);
    assert_eq!(settings[0]["speed"], 40);
    assert_eq!(tc.stores().content.count("news").await.unwrap(), 2);
}

#[tokio::test]
async fn test_stale_cleanup_purges_old_failed_and_stuck() {
    let tc = TestContext::new();
    let realm = BackupRealm::FamilyTree;
    let now = Utc::now();

    let mut old_failed = Backup::in_progress(realm, TriggerType::Auto, "system", "system", now - Duration::days(40));
    old_failed
        .fail("disk full", None, now - Duration::days(40))
        .unwrap();
    let mut recent_failed = Backup::in_progress(realm, TriggerType::Auto, "system", "system", now - Duration::days(2));
    recent_failed
        .fail("disk full", None, now - Duration::days(2))
        .unwrap();
    let stuck = Backup::in_progress(realm, TriggerType::Auto, "system", "system", now - Duration::hours(7));
    let running = Backup::in_progress(realm, TriggerType::Manual, "family-tree", "alice", now - Duration::minutes(5));

    for backup in [&old_failed, &recent_failed, &stuck, &running] {
        tc.stores().backups.insert(backup).await.unwrap();
    }
    let kept_completed = manual_backup(&tc, realm).await;

    let ttl = StaleTtl {
        failed: Duration::days(30),
        stuck: Duration::hours(6),
    };
    let purged = tc
        .state
        .backup_service
        .cleanup_stale_backups(realm, ttl)
        .await
        .unwrap();
    assert_eq!(purged, 2);

    let remaining: HashSet<String> = tc
        .state
        .backup_service
        .list_backups(realm, None, Some(100))
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.backup_id)
        .collect();
    assert!(!remaining.contains(&old_failed.backup_id));
    assert!(!remaining.contains(&stuck.backup_id));
    assert!(remaining.contains(&recent_failed.backup_id));
    assert!(remaining.contains(&running.backup_id));
    assert!(remaining.contains(&kept_completed));

    assert_eq!(audit_entries(&tc, "BACKUP_STALE_PURGED").await.len(), 1);
}

#[tokio::test]
async fn test_delete_backup_is_realm_scoped_and_audited() {
    let tc = TestContext::new();
    let id = manual_backup(&tc, BackupRealm::Cms).await;

    let err = tc
        .state
        .backup_service
        .delete_backup(BackupRealm::FamilyTree, &id, &ctx(BackupRealm::FamilyTree))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    tc.state
        .backup_service
        .delete_backup(BackupRealm::Cms, &id, &ctx(BackupRealm::Cms))
        .await
        .unwrap();
    assert_eq!(audit_entries(&tc, "BACKUP_DELETED").await.len(), 1);
}

#[tokio::test]
async fn test_stats_report_counts_and_live_sizes() {
    let tc = TestContext::new();
    tc.seed_news(&["One", "Two", "Three"]).await;
    manual_backup(&tc, BackupRealm::Cms).await;
    tc.content.set_fail_fetch(true);
    tc.state
        .backup_service
        .create_backup(BackupRealm::Cms, TriggerType::Manual, "alice", &ctx(BackupRealm::Cms))
        .await;
    tc.content.set_fail_fetch(false);

    let stats = tc.state.backup_service.stats(BackupRealm::Cms).await.unwrap();
    assert_eq!(stats.total_backups, 2);
    assert_eq!(stats.completed_backups, 1);
    assert_eq!(stats.failed_backups, 1);
    assert_eq!(stats.live_total_records, 3);
    assert!(stats.last_backup_at.is_some());
}

#[tokio::test]
async fn test_update_schedule_validates_and_preserves_clock() {
    let tc = TestContext::new();
    let realm = BackupRealm::FamilyTree;
    manual_backup(&tc, realm).await;
    let clock = tc
        .state
        .backup_service
        .schedule(realm)
        .await
        .unwrap()
        .last_auto_backup;

    let bad = UpdateScheduleRequest {
        interval_hours: Some(0),
        ..Default::default()
    };
    let err = tc
        .state
        .backup_service
        .update_schedule(realm, &bad, &ctx(realm))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let good = UpdateScheduleRequest {
        enabled: Some(false),
        interval_hours: Some(72),
        max_backups_to_keep: Some(3),
    };
    let updated = tc
        .state
        .backup_service
        .update_schedule(realm, &good, &ctx(realm))
        .await
        .unwrap();
    assert!(!updated.enabled);
    assert_eq!(updated.interval_hours, 72);
    assert_eq!(updated.max_backups_to_keep, 3);
    assert_eq!(updated.last_auto_backup, clock);

    let cms = tc.state.backup_service.schedule(BackupRealm::Cms).await.unwrap();
    assert!(cms.enabled);
    assert_eq!(cms.interval_hours, 24);

    let audited = audit_entries(&tc, "SETTINGS_UPDATED").await;
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].details["current"]["interval_hours"], 72);
}
