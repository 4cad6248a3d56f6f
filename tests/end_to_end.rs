//! End-to-end scenarios exercised against the full public API, rather than
//! a single module in isolation.

use sam_core::autofix::{AutoFixController, AutoFixPermissions, DetectedIssue, FixResult, FixStatus, IssueStatus};
use sam_core::checkpoint::{CheckpointStore, ExecutionResult};
use sam_core::permissions::{Decision, PermissionEngine, PermissionStore, Preset};

fn issue(id: &str, file_path: &str) -> DetectedIssue {
    DetectedIssue {
        id: id.to_string(),
        issue_type: "UnusedImport".to_string(),
        file_path: file_path.to_string(),
        line: 3,
        col: None,
        message: "unused import `os`".to_string(),
        suggested_fix: "remove the import".to_string(),
        confidence: 0.95,
        severity: "low".to_string(),
        context: "".to_string(),
        detected_at: chrono::Utc::now(),
        status: IssueStatus::Pending,
    }
}

fn success_result(issue_id: &str) -> FixResult {
    FixResult {
        issue_id: issue_id.to_string(),
        status: FixStatus::Success,
        applied_fix: "removed unused import".to_string(),
        original_code: "import os".to_string(),
        error: None,
        applied_at: chrono::Utc::now(),
        reverted: false,
        revert_reason: None,
        commit_sha: None,
    }
}

/// S1 — safe `git status` on a never-seen project auto-executes and logs
/// exactly one allowed audit entry.
#[test]
fn s1_safe_command_on_default_project_auto_executes() {
    let store = PermissionStore::in_memory().unwrap();
    let engine = PermissionEngine::new(&store);

    let (decision, entry) = engine.can_execute("demo", "git status", None).unwrap();
    assert!(matches!(decision, Decision::AutoExecute { .. }));
    assert!(decision.reason().to_lowercase().contains("safe"));

    let entries = store.audit(Some("demo"), 10).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].allowed);
}

/// S2 — even under the most permissive preset, `rm -rf /` is never executable.
#[test]
fn s2_forbidden_command_survives_permissive_preset() {
    let store = PermissionStore::in_memory().unwrap();
    store.apply_preset("demo", Preset::Permissive).unwrap();
    let engine = PermissionEngine::new(&store);

    let (decision, _) = engine.can_execute("demo", "rm -rf /", None).unwrap();
    assert!(matches!(decision, Decision::Denied { .. }));
    assert!(decision.reason().to_lowercase().contains("forbidden"));
}

/// S3 — a checkpoint round-trip restores file contents bit-for-bit.
#[test]
fn s3_rollback_round_trip_restores_original_contents() {
    let backups = tempfile::tempdir().unwrap();
    let db_path = backups.path().join("checkpoints.db");
    let store = CheckpointStore::open(&db_path, &backups.path().join("blobs")).unwrap();

    let work = tempfile::tempdir().unwrap();
    let file = work.path().join("notes.txt");
    std::fs::write(&file, b"A").unwrap();

    let checkpoint_id = store.create("demo", "before").unwrap();
    assert!(store.add_file_backup(&checkpoint_id, &file).unwrap());

    std::fs::write(&file, b"B").unwrap();
    let result = store.rollback(&checkpoint_id).unwrap();

    assert_eq!(std::fs::read(&file).unwrap(), b"A");
    assert_eq!(result.files_restored.len(), 1);
    assert!(result.errors.is_empty());

    let details = store.details(&checkpoint_id).unwrap().unwrap();
    assert_eq!(details.status, sam_core::checkpoint::CheckpointStatus::RolledBack);
}

/// S4 — a sensitive path is denied even when `allowed_paths` would otherwise
/// permit it.
#[test]
fn s4_sensitive_path_blocked_despite_explicit_allow() {
    let store = PermissionStore::in_memory().unwrap();
    let mut perms = store.get("demo", None).unwrap();
    perms.allowed_paths = vec!["/".to_string()];
    store.set(perms).unwrap();

    let engine = PermissionEngine::new(&store);
    let (decision, _) = engine
        .can_modify_path("demo", "~/.ssh/id_rsa", None)
        .unwrap();
    assert!(matches!(decision, Decision::Denied { .. }));
    assert!(decision.reason().to_lowercase().contains("sensitive"));
}

/// S5 — a two-fix-per-hour project cap denies the third fix this hour and
/// the reason mentions the current usage.
#[test]
fn s5_auto_fix_rate_limit_denies_third_fix_this_hour() {
    let controller = AutoFixController::in_memory().unwrap();
    let mut perms = AutoFixPermissions::conservative("demo");
    perms.max_fixes_per_hour = 2;
    controller.set_permissions(&perms).unwrap();

    for n in 0..2 {
        let i = issue(&format!("issue-{n}"), "src/a.py");
        let (allowed, _) = controller.can_auto_fix("demo", &i).unwrap();
        assert!(allowed);
        controller
            .record_fix("demo", &i, &success_result(&i.id))
            .unwrap();
    }

    let third = issue("issue-3", "src/b.py");
    let (allowed, reason) = controller.can_auto_fix("demo", &third).unwrap();
    assert!(!allowed);
    assert!(reason.contains("rate"));
    assert!(reason.contains("2/2"));
}

/// S6 — deleting one file's backup blob out-of-band yields a partial but
/// still-successful rollback, with the missing file named in `errors`.
#[test]
fn s6_partial_rollback_reports_missing_file() {
    let backups = tempfile::tempdir().unwrap();
    let db_path = backups.path().join("checkpoints.db");
    let store = CheckpointStore::open(&db_path, &backups.path().join("blobs")).unwrap();

    let work = tempfile::tempdir().unwrap();
    let file_a = work.path().join("a.txt");
    let file_b = work.path().join("b.txt");
    std::fs::write(&file_a, b"a").unwrap();
    std::fs::write(&file_b, b"b").unwrap();

    let checkpoint_id = store.create("demo", "two files").unwrap();
    store.add_file_backup(&checkpoint_id, &file_a).unwrap();
    store.add_file_backup(&checkpoint_id, &file_b).unwrap();

    let blob_dir = backups.path().join("blobs").join(&checkpoint_id);
    let b_marker = file_b.to_string_lossy().replace(['/', '\\'], "__");
    for entry in std::fs::read_dir(&blob_dir).unwrap().flatten() {
        if entry.path().to_string_lossy().contains(&b_marker) {
            std::fs::remove_file(entry.path()).unwrap();
        }
    }

    let result = store.rollback(&checkpoint_id).unwrap();
    assert!(result.success);
    assert!(result.partial);
    assert_eq!(result.files_restored, vec![file_a.to_string_lossy().to_string()]);
    assert!(result.errors.iter().any(|e| e.contains("b.txt")));
}

/// Invariant #4: `blocked_commands` beats `allowed_commands` when a command
/// appears in both.
#[test]
fn blocked_beats_allowed_end_to_end() {
    let store = PermissionStore::in_memory().unwrap();
    let mut perms = store.get("demo", None).unwrap();
    perms.allowed_commands.push("npm install".to_string());
    perms.blocked_commands.push("npm install".to_string());
    store.set(perms).unwrap();

    let engine = PermissionEngine::new(&store);
    let (decision, entry) = engine.can_execute("demo", "npm install", None).unwrap();
    assert!(matches!(decision, Decision::Denied { .. }));
    assert_eq!(entry.reason, "blocked wins");
}

/// Invariant #5: every decision call appends exactly one audit row, across
/// both command and path checks in the same project.
#[test]
fn every_decision_kind_appends_exactly_one_audit_row() {
    let store = PermissionStore::in_memory().unwrap();
    let engine = PermissionEngine::new(&store);

    engine.can_execute("demo", "git status", None).unwrap();
    engine.can_execute("demo", "sudo reboot", None).unwrap();
    engine.can_modify_path("demo", "/tmp/file.txt", None).unwrap();

    assert_eq!(store.audit(Some("demo"), 10).unwrap().len(), 3);
}

/// Invariant #12: only a `Success` fix result increments the rate counters;
/// `Failed`, `Skipped`, and `Reverted` never do.
#[test]
fn only_success_increments_rate_counters() {
    let controller = AutoFixController::in_memory().unwrap();
    controller
        .set_permissions(&AutoFixPermissions::conservative("demo"))
        .unwrap();

    let failing = issue("issue-f", "src/a.py");
    controller
        .record_fix(
            "demo",
            &failing,
            &FixResult {
                issue_id: failing.id.clone(),
                status: FixStatus::Failed,
                applied_fix: String::new(),
                original_code: String::new(),
                error: Some("syntax error".to_string()),
                applied_at: chrono::Utc::now(),
                reverted: false,
                revert_reason: None,
                commit_sha: None,
            },
        )
        .unwrap();

    let status = controller.rate_status("demo").unwrap();
    assert_eq!(status.project_fixes_this_hour, 0);
}

/// Checkpoint + audit log composed the way a caller actually uses them:
/// create a checkpoint, back up a file, execute (simulated), then log the
/// outcome to the execution audit log and confirm it is queryable.
#[test]
fn checkpoint_and_audit_log_compose_across_an_execution() {
    let root = tempfile::tempdir().unwrap();
    let checkpoints = CheckpointStore::open(
        &root.path().join("history.db"),
        &root.path().join("blobs"),
    )
    .unwrap();
    let audit = sam_core::audit::ExecutionAuditLog::open(&root.path().join("history.db")).unwrap();

    let file = root.path().join("README.md");
    std::fs::write(&file, b"before").unwrap();

    let checkpoint_id = checkpoints.create("demo", "doc edit").unwrap();
    checkpoints.add_file_backup(&checkpoint_id, &file).unwrap();
    std::fs::write(&file, b"after").unwrap();

    checkpoints
        .add_command_log(
            &checkpoint_id,
            "edit README.md",
            ExecutionResult {
                success: true,
                output: "wrote 5 bytes".to_string(),
                ..Default::default()
            },
            4.0,
        )
        .unwrap();

    let exec_id = audit
        .log_execution(
            None,
            "edit README.md",
            true,
            "wrote 5 bytes",
            "",
            0,
            4.0,
            Some("demo"),
            None,
        )
        .unwrap();

    let recent = audit.recent(1).unwrap();
    assert_eq!(recent[0].id, exec_id);

    let listed = checkpoints.list("demo", 10).unwrap();
    assert_eq!(listed[0].command_count, 1);
}
