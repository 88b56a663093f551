//! End-to-end builder scenarios against in-process collaborators.

use kiln_core::ports::{CoordinationStore, Visibility};
use kiln_core::{BuildConfig, BuildDb, ChannelType, EventType, JobRecord, keys};
use kiln_scheduler::{BuildLock, BuildState, Outcome, Resolution};
use kiln_store::recent_build_logs;
use kiln_tests::{
    BuildScript, TEST_COMMIT, TEST_REPOSITORY, TestHarness, config_with_notify,
    config_with_triggers, notify_entry,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

const HUB_TARGET: &str = "https://hub.test/u/a/b/trigger/xyz/";

fn job() -> JobRecord {
    JobRecord::new(TEST_REPOSITORY).with_commit(TEST_COMMIT)
}

#[tokio::test]
async fn test_successful_build_publishes_everything() {
    let harness = TestHarness::new();
    let config = config_with_notify(vec![notify_entry(ChannelType::Dockerhub, HUB_TARGET, &[])]);
    harness
        .environment
        .script(BuildScript::success("master").with_config(&config));

    let report = harness.run_job(job()).await;

    assert_eq!(report.resolution, Resolution::Finished);
    assert!(report.error.is_none());
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("finished"));

    let object = format!("{}/app_master_linux-amd64.zip", TEST_REPOSITORY);
    assert_eq!(harness.blobs.paths(), vec![object.clone()]);
    let blob = harness.blobs.blob(&object).unwrap();
    assert_eq!(blob.visibility, Visibility::PublicRead);
    assert_eq!(blob.content_type, "application/zip");

    let manifest = harness
        .get_string(&keys::build_db(TEST_REPOSITORY))
        .await
        .unwrap();
    let manifest = BuildDb::from_slice(manifest.as_bytes()).unwrap();
    let master = manifest.get("master").unwrap();
    assert_eq!(master.tool_version, "go1.22.1");
    assert_eq!(master.assets.len(), 1);
    assert!(
        harness
            .get_string(&keys::hash_db(TEST_REPOSITORY, "master"))
            .await
            .unwrap()
            .contains("app_master_linux-amd64.zip")
    );
    assert_eq!(
        harness.get_string(&keys::last_build(TEST_REPOSITORY)).await.as_deref(),
        Some(TEST_COMMIT)
    );
    assert_eq!(
        harness
            .get_string(&keys::signature(TEST_REPOSITORY, "master"))
            .await
            .as_deref(),
        Some("signed")
    );

    assert_eq!(
        harness.notifications.sent(),
        vec![(HUB_TARGET.to_string(), EventType::Success)]
    );
    assert!(report.sub_builds.is_empty());
    assert!(harness.sub_builds.submitted().is_empty());

    let logs = recent_build_logs(&*harness.store, TEST_REPOSITORY, 10)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].success);
    assert_eq!(
        harness
            .get_string(&keys::build_log(TEST_REPOSITORY, &logs[0].id))
            .await
            .as_deref(),
        Some("go build ./...\nok\n")
    );

    for state in [
        BuildState::LockAcquired,
        BuildState::Evaluated(Outcome::Success { upload: true }),
        BuildState::Uploading,
        BuildState::MetadataUpdated,
        BuildState::Notified,
        BuildState::Cleaned,
    ] {
        assert!(report.states.contains(&state), "missing {:?}", state);
    }
}

#[tokio::test]
async fn test_status_moves_from_building_to_finished() {
    let harness = TestHarness::new();
    harness.environment.script(BuildScript::success("master"));
    harness.environment.hold();

    let observe = async {
        let mut seen = None;
        for _ in 0..200 {
            seen = harness.status(TEST_REPOSITORY).await;
            if seen.as_deref() == Some("building") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        harness.environment.release();
        seen
    };
    let (report, seen) = tokio::join!(harness.run_job(JobRecord::new(TEST_REPOSITORY)), observe);

    assert_eq!(seen.as_deref(), Some("building"));
    assert_eq!(report.resolution, Resolution::Finished);
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("finished"));
}

#[tokio::test]
async fn test_container_receives_job_environment() {
    let harness = TestHarness::with_config(|config| {
        config.decrypt_key = Some("s3cret".into());
    });
    harness.environment.script(BuildScript::success("master"));

    harness.run_job(job()).await;

    let created = harness.environment.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].env["REPO"], TEST_REPOSITORY);
    assert_eq!(created[0].env["COMMIT"], TEST_COMMIT);
    assert_eq!(created[0].env["DECRYPT_KEY"], "s3cret");

    let bindings = harness.environment.bindings();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].container_path, "/artifacts");
    assert!(bindings[0].host_path.starts_with(harness.work_root()));
}

#[tokio::test]
async fn test_redundant_build_skips_publication() {
    let harness = TestHarness::new();
    harness.environment.script(BuildScript::redundant());

    let report = harness.run_job(job()).await;

    assert_eq!(report.resolution, Resolution::Finished);
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("finished"));
    assert!(harness.blobs.paths().is_empty());
    assert!(
        harness
            .store
            .get(&keys::build_db(TEST_REPOSITORY))
            .await
            .unwrap()
            .is_none()
    );
    assert!(!report.states.contains(&BuildState::Uploading));
    assert!(!report.states.contains(&BuildState::MetadataUpdated));
    assert!(report.states.contains(&BuildState::Notified));
}

#[tokio::test]
async fn test_poisoned_log_aborts_without_retry() {
    let harness = TestHarness::new();
    let config = config_with_notify(vec![notify_entry(
        ChannelType::Pushover,
        "user-key",
        &[EventType::Error],
    )]);
    harness.environment.script(
        BuildScript::failure("can't load package: no buildable Go source files in /src\n")
            .with_config(&config),
    );

    let mut job = job();
    job.execution_count = 1;
    let report = harness.run_job(job).await;

    assert_eq!(report.resolution, Resolution::FinallyFailed);
    assert_eq!(report.job.execution_count, 1);
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("failed"));
    assert_eq!(
        harness.get_string(&keys::abort_reason(TEST_REPOSITORY)).await.as_deref(),
        Some("no buildable source files present")
    );
    assert!(harness.drain_queue().await.is_empty());
    assert_eq!(
        harness.notifications.sent(),
        vec![("user-key".to_string(), EventType::Error)]
    );

    let logs = recent_build_logs(&*harness.store, TEST_REPOSITORY, 10)
        .await
        .unwrap();
    assert!(!logs[0].success);
}

#[tokio::test]
async fn test_missing_build_config_counts_as_failure() {
    let harness = TestHarness::new();
    harness
        .environment
        .script(BuildScript::success("master").without_config());

    let report = harness.run_job(job()).await;

    assert_eq!(report.resolution, Resolution::Requeued { counted: true });
    assert_eq!(report.job.execution_count, 1);
    assert!(harness.blobs.paths().is_empty());
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("queued"));
    // Without a configuration there is nobody to notify.
    assert!(harness.notifications.sent().is_empty());
}

#[tokio::test]
async fn test_failed_builds_are_retried_a_bounded_number_of_times() {
    let harness = TestHarness::new();
    harness.environment.script(BuildScript::failure("compile error\n"));
    harness.submit(&job()).await;

    let reports = harness.agent(1).run_until_drained().await.unwrap();

    let resolutions: Vec<Resolution> = reports.iter().map(|r| r.resolution.clone()).collect();
    let mut expected = vec![Resolution::Requeued { counted: true }; 5];
    expected.push(Resolution::FinallyFailed);
    assert_eq!(resolutions, expected);

    let counts: Vec<u32> = reports.iter().map(|r| r.job.execution_count).collect();
    assert_eq!(counts, vec![1, 2, 3, 4, 5, 5]);
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("failed"));
    assert!(harness.drain_queue().await.is_empty());
}

#[tokio::test]
async fn test_infrastructure_retries_are_free() {
    let harness = TestHarness::new();

    // Another builder holds the lock.
    let held = BuildLock::acquire(&*harness.store, TEST_REPOSITORY, Duration::from_secs(60))
        .await
        .unwrap();
    let mut exhausted = job();
    exhausted.execution_count = 5;
    let report = harness.run_job(exhausted).await;
    assert_eq!(report.resolution, Resolution::Requeued { counted: false });
    assert_eq!(report.job.execution_count, 5);
    assert!(harness.environment.created().is_empty());
    assert_eq!(harness.drain_queue().await, vec![report.job.clone()]);
    assert!(held.release(&*harness.store).await.unwrap());

    harness
        .environment
        .script(BuildScript::success("master").failing_log_fetch());
    harness.environment.script(BuildScript::failure("compile error\n"));
    harness.environment.script(BuildScript::success("master"));

    let report = harness.run_job(job()).await;
    assert_eq!(report.resolution, Resolution::Requeued { counted: false });
    assert_eq!(report.job.execution_count, 0);
    // The build log was never written.
    assert!(
        recent_build_logs(&*harness.store, TEST_REPOSITORY, 10)
            .await
            .unwrap()
            .is_empty()
    );

    let report = harness.run_job(report.job).await;
    assert_eq!(report.resolution, Resolution::Requeued { counted: true });
    assert_eq!(report.job.execution_count, 1);

    let report = harness.run_job(report.job).await;
    assert_eq!(report.resolution, Resolution::Finished);

    let queued = harness.drain_queue().await;
    assert_eq!(queued.iter().map(|j| j.execution_count).collect::<Vec<_>>(), vec![0, 1]);
}

#[tokio::test]
async fn test_failed_upload_is_retried_for_free() {
    let harness = TestHarness::new();
    let config = config_with_notify(vec![notify_entry(ChannelType::Dockerhub, HUB_TARGET, &[])]);
    harness
        .environment
        .script(BuildScript::success("master").with_config(&config));
    harness.blobs.fail_uploads();

    let report = harness.run_job(job()).await;

    assert_eq!(report.resolution, Resolution::Requeued { counted: false });
    assert_eq!(report.job.execution_count, 0);
    assert!(report.states.contains(&BuildState::Uploading));
    assert!(!report.states.contains(&BuildState::MetadataUpdated));
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("queued"));
    assert!(
        harness
            .store
            .get(&keys::build_db(TEST_REPOSITORY))
            .await
            .unwrap()
            .is_none()
    );
    assert!(harness.notifications.sent().is_empty());
    assert_eq!(harness.work_dirs(), 0);
    assert!(
        harness
            .store
            .get(&keys::build_lock(TEST_REPOSITORY))
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(harness.environment.removed(), vec!["fake-1"]);

    harness.blobs.accept_uploads();
    let report = harness.run_job(report.job).await;
    assert_eq!(report.resolution, Resolution::Finished);
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("finished"));
    assert_eq!(
        harness.notifications.sent(),
        vec![(HUB_TARGET.to_string(), EventType::Success)]
    );
}

#[tokio::test]
async fn test_unreadable_manifest_seed_exhausts_the_retry_budget() {
    let harness = TestHarness::new();
    harness
        .environment
        .script(BuildScript::success("master").with_file(".build.db", b"{not json"));

    let report = harness.run_job(job()).await;

    // Artifacts went up but the manifest could not be written.
    assert_eq!(report.resolution, Resolution::Requeued { counted: true });
    assert_eq!(report.job.execution_count, 1);
    assert!(report.error.as_deref().unwrap().starts_with("Serialization error"));
    assert_eq!(harness.blobs.paths().len(), 1);
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("queued"));
    assert_eq!(harness.work_dirs(), 0);

    let reports = harness.agent(1).run_until_drained().await.unwrap();

    let counts: Vec<u32> = reports.iter().map(|r| r.job.execution_count).collect();
    assert_eq!(counts, vec![2, 3, 4, 5, 5]);
    assert_eq!(reports.last().unwrap().resolution, Resolution::FinallyFailed);
    assert!(
        reports
            .iter()
            .all(|r| !r.states.contains(&BuildState::MetadataUpdated))
    );
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("failed"));
    assert!(
        harness
            .store
            .get(&keys::build_db(TEST_REPOSITORY))
            .await
            .unwrap()
            .is_none()
    );
    assert!(harness.drain_queue().await.is_empty());
}

#[tokio::test]
async fn test_poison_text_in_a_passing_build_is_ignored() {
    let harness = TestHarness::new();
    harness.environment.script(
        BuildScript::success("master")
            .with_log("warning: no buildable Go source files in ./docs\nok\n"),
    );

    let report = harness.run_job(job()).await;

    assert_eq!(report.resolution, Resolution::Finished);
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("finished"));
    assert!(
        harness
            .get_string(&keys::abort_reason(TEST_REPOSITORY))
            .await
            .is_none()
    );
    assert_eq!(harness.blobs.paths().len(), 1);
}

#[tokio::test]
async fn test_cleanup_runs_on_every_path() {
    let harness = TestHarness::new();
    harness.environment.script(BuildScript::success("master"));
    harness.run_job(job()).await;

    harness.environment.script(BuildScript::failure("compile error\n"));
    harness.run_job(job()).await;

    assert_eq!(harness.work_dirs(), 0);
    assert!(
        harness
            .store
            .get(&keys::build_lock(TEST_REPOSITORY))
            .await
            .unwrap()
            .is_none()
    );
    let created = harness.environment.created().len();
    assert_eq!(created, 2);
    assert_eq!(harness.environment.removed(), vec!["fake-1", "fake-2"]);
}

#[tokio::test]
async fn test_notification_failure_leaves_status_alone() {
    let harness = TestHarness::new();
    harness.notifications.fail_deliveries();
    let config = config_with_notify(vec![
        notify_entry(ChannelType::Email, "ops@example.org", &[]),
        notify_entry(ChannelType::Dockerhub, HUB_TARGET, &[]),
    ]);
    harness
        .environment
        .script(BuildScript::success("master").with_config(&config));

    let report = harness.run_job(job()).await;

    assert_eq!(report.resolution, Resolution::Finished);
    assert_eq!(harness.status(TEST_REPOSITORY).await.as_deref(), Some("finished"));
}

#[tokio::test]
async fn test_sub_builds_are_triggered_up_to_the_ceiling() {
    let harness = TestHarness::new();
    harness
        .environment
        .script(BuildScript::success("master").with_config(&config_with_triggers(20)));

    let report = harness.run_job(job()).await;
    assert_eq!(report.sub_builds.len(), 20);
    for handle in report.sub_builds {
        handle.await.unwrap();
    }

    let submitted = harness.sub_builds.submitted();
    assert_eq!(submitted.len(), 20);
    assert!(submitted.contains(&"example.org/dep/19".to_string()));
}

#[tokio::test]
async fn test_flood_protection_suppresses_all_sub_builds() {
    let harness = TestHarness::new();
    harness
        .environment
        .script(BuildScript::success("master").with_config(&config_with_triggers(21)));

    let report = harness.run_job(job()).await;

    assert_eq!(report.resolution, Resolution::Finished);
    assert!(report.sub_builds.is_empty());
    tokio::task::yield_now().await;
    assert!(harness.sub_builds.submitted().is_empty());
}

#[tokio::test]
async fn test_untouched_labels_survive_rebuilds() {
    let harness = TestHarness::new();
    harness.environment.script(BuildScript::success("v1.0"));
    harness.run_job(job()).await;

    harness.environment.script(BuildScript::success("master"));
    harness.run_job(job()).await;

    let manifest = harness
        .get_string(&keys::build_db(TEST_REPOSITORY))
        .await
        .unwrap();
    let manifest = BuildDb::from_slice(manifest.as_bytes()).unwrap();
    assert!(manifest.get("v1.0").is_some());
    assert!(manifest.get("master").is_some());
}

#[test]
fn test_build_config_fixture_round_trips() {
    let config = config_with_triggers(2);
    let yaml = kiln_tests::config_yaml(&config);
    assert_eq!(BuildConfig::from_yaml(&yaml).unwrap(), config);
}
