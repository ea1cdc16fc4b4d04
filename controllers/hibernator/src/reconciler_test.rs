//! Unit tests for the Hibernator reconciler

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::test_utils::*;
    use chrono::{TimeDelta, TimeZone};
    use crds::{Action, DateTimeWithZone, HibernatorSpec, ImpactedObject, RevisionHistory, TimeRangesWithZone};
    use resource_client::MockResourceClient;
    use std::sync::Mutex;

    const API: &str = "/prod/apps/v1/Deployment/api";
    const WORKER: &str = "/prod/apps/v1/Deployment/worker";

    #[derive(Default)]
    struct RecordingWriter {
        written: Mutex<Vec<HibernatorStatus>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl StatusWriter for RecordingWriter {
        async fn write_status(&self, hibernator: &Hibernator, status: &HibernatorStatus) -> Result<(), ControllerError> {
            if self.fail {
                return Err(ControllerError::StatusUpdate {
                    name: hibernator.name_any(),
                    source: kube::Error::Service("conflict".into()),
                });
            }
            self.written.lock().unwrap().push(status.clone());
            Ok(())
        }
    }

    /// Wednesday noon
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
    }

    fn setup(writer: RecordingWriter) -> (Arc<MockResourceClient>, Arc<RecordingWriter>, Reconciler) {
        let client = Arc::new(MockResourceClient::new());
        client.add_object(deployment("prod", "api", 3, &[]));
        client.add_object(deployment("prod", "worker", 2, &[]));
        let writer = Arc::new(writer);
        let reconciler = Reconciler::new(
            client.clone(),
            writer.clone(),
            Evaluator::new().unwrap(),
            ControllerConfig::default(),
            Arc::new(Metrics::new().unwrap()),
        );
        (client, writer, reconciler)
    }

    /// Hibernates on weekday afternoons in UTC
    fn afternoon_spec() -> HibernatorSpec {
        HibernatorSpec {
            when: TimeRangesWithZone {
                time_ranges: vec![time_range("Mon", "Fri", "13:00", "18:00")],
                time_zone: String::new(),
            },
            ..always_spec("prod")
        }
    }

    #[test]
    fn test_requeue_delay() {
        let floor = Duration::from_secs(61);
        assert_eq!(requeue_delay(3600, 0, floor), Duration::from_secs(3600));
        assert_eq!(requeue_delay(3600, 300, floor), Duration::from_secs(300));
        assert_eq!(requeue_delay(120, 300, floor), Duration::from_secs(120));
        assert_eq!(requeue_delay(5, 0, floor), floor);
        assert_eq!(requeue_delay(3600, 10, floor), floor);
        assert_eq!(requeue_delay(-1, 0, floor), floor);
    }

    #[tokio::test]
    async fn test_active_window_hibernates_and_records_history() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let hibernator = create_test_hibernator("nightly", "prod", always_spec("prod"));

        let tick = reconciler.tick(&hibernator, now()).await;
        assert_eq!(tick.outcome, OUTCOME_TRANSITIONED);
        let status = tick.status.unwrap();
        assert_eq!(status.status, HibernatorState::Succeeded);
        assert!(status.is_hibernating);
        assert_eq!(status.action, Some(Action::Hibernate));
        assert_eq!(status.history.len(), 1);
        assert_eq!(status.history[0].id, 0);
        assert_eq!(status.history[0].time, now());
        assert_eq!(status.history[0].impacted_objects.len(), 2);
        assert_eq!(client.object_by_key(API).unwrap().replicas(), Some(0));

        // Until today's 23:59:59
        assert_eq!(tick.requeue_after, Some(Duration::from_secs(12 * 3600 - 1)));
    }

    #[tokio::test]
    async fn test_outside_window_requeues_for_next_start() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let hibernator = create_test_hibernator("nightly", "prod", afternoon_spec());

        let tick = reconciler.tick(&hibernator, now()).await;
        assert_eq!(tick.requeue_after, Some(Duration::from_secs(3600)));
        let status = tick.status.unwrap();
        assert!(!status.is_hibernating);
        assert_eq!(status.action, Some(Action::UnHibernate));
        // Nothing was hibernated: both deployments lack an original count
        assert!(status.history.is_empty());
        assert_eq!(tick.outcome, OUTCOME_IDLE);
        assert_eq!(client.object_by_key(API).unwrap().replicas(), Some(3));
    }

    #[tokio::test]
    async fn test_resync_interval_caps_requeue() {
        let (_, _, reconciler) = setup(RecordingWriter::default());
        let spec = HibernatorSpec {
            re_sync_interval: 300,
            ..afternoon_spec()
        };
        let tick = reconciler.tick(&create_test_hibernator("nightly", "prod", spec), now()).await;
        assert_eq!(tick.requeue_after, Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_pause_leaves_everything_untouched() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let spec = HibernatorSpec {
            pause: true,
            ..always_spec("prod")
        };

        let tick = reconciler.tick(&create_test_hibernator("nightly", "prod", spec), now()).await;
        assert_eq!(tick, Tick::wait(OUTCOME_PAUSED, None));
        assert!(client.patches().is_empty());
    }

    #[tokio::test]
    async fn test_pause_until_waits_for_the_deadline() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let spec = HibernatorSpec {
            pause_until: Some(DateTimeWithZone {
                date_time: "2024-01-03 14:00".to_string(),
                time_zone: String::new(),
            }),
            ..always_spec("prod")
        };
        let hibernator = create_test_hibernator("nightly", "prod", spec);

        let tick = reconciler.tick(&hibernator, now()).await;
        assert_eq!(tick, Tick::wait(OUTCOME_PAUSED, Some(Duration::from_secs(7200))));
        assert!(client.patches().is_empty());

        // Deadline within the requeue floor: proceed
        let tick = reconciler.tick(&hibernator, now() + TimeDelta::minutes(119)).await;
        assert_eq!(tick.outcome, OUTCOME_TRANSITIONED);
    }

    #[tokio::test]
    async fn test_invalid_pause_until_is_ignored() {
        let (_, _, reconciler) = setup(RecordingWriter::default());
        let spec = HibernatorSpec {
            pause_until: Some(DateTimeWithZone {
                date_time: "next tuesday".to_string(),
                time_zone: String::new(),
            }),
            ..always_spec("prod")
        };

        let tick = reconciler.tick(&create_test_hibernator("nightly", "prod", spec), now()).await;
        assert_eq!(tick.outcome, OUTCOME_TRANSITIONED);
        assert!(tick.status.unwrap().message.contains("pauseUntil"));
    }

    #[tokio::test]
    async fn test_invalid_schedule_fails_status() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let mut spec = always_spec("prod");
        spec.when.time_ranges = vec![time_range("Mon", "Fri", "25:00", "26:00")];

        let tick = reconciler.tick(&create_test_hibernator("nightly", "prod", spec.clone()), now()).await;
        assert_eq!(tick.outcome, OUTCOME_SCHEDULE_ERROR);
        assert_eq!(tick.requeue_after, None);
        let status = tick.status.unwrap();
        assert_eq!(status.status, HibernatorState::Failed);
        assert!(status.message.starts_with("invalid schedule"));
        assert!(client.patches().is_empty());

        spec.re_sync_interval = 600;
        let tick = reconciler.tick(&create_test_hibernator("nightly", "prod", spec), now()).await;
        assert_eq!(tick.requeue_after, Some(Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn test_overrides_take_precedence_over_schedule() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let spec = HibernatorSpec {
            hibernate: true,
            ..afternoon_spec()
        };
        let tick = reconciler.tick(&create_test_hibernator("nightly", "prod", spec), now()).await;
        assert!(tick.status.unwrap().is_hibernating);
        assert_eq!(client.object_by_key(API).unwrap().replicas(), Some(0));

        // Both set: hibernate wins
        let spec = HibernatorSpec {
            hibernate: true,
            un_hibernate: true,
            ..afternoon_spec()
        };
        let tick = reconciler.tick(&create_test_hibernator("nightly", "prod", spec), now()).await;
        assert!(tick.status.unwrap().is_hibernating);

        let spec = HibernatorSpec {
            un_hibernate: true,
            ..always_spec("prod")
        };
        let tick = reconciler.tick(&create_test_hibernator("nightly", "prod", spec), now()).await;
        assert!(!tick.status.unwrap().is_hibernating);
        assert_eq!(client.object_by_key(API).unwrap().replicas(), Some(3));
    }

    #[tokio::test]
    async fn test_recent_transition_debounces() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let mut hibernator = create_test_hibernator("nightly", "prod", always_spec("prod"));
        hibernator.status = Some(HibernatorStatus {
            history: vec![RevisionHistory {
                time: now() - TimeDelta::seconds(30),
                id: 0,
                action: Action::Hibernate,
                impacted_objects: vec![],
                excluded_objects: vec![],
            }],
            ..Default::default()
        });

        let tick = reconciler.tick(&hibernator, now()).await;
        assert_eq!(tick.outcome, OUTCOME_DEBOUNCED);
        assert_eq!(tick.status, None);
        assert!(tick.requeue_after.is_some());
        assert!(client.patches().is_empty());
    }

    #[tokio::test]
    async fn test_resync_merges_into_latest_entry() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let mut hibernator = create_test_hibernator("nightly", "prod", always_spec("prod"));
        hibernator.status = reconciler.tick(&hibernator, now()).await.status;

        // A deployment created after the window opened
        client.add_object(deployment("prod", "cron", 1, &[]));
        let later = now() + TimeDelta::minutes(10);
        let status = reconciler.tick(&hibernator, later).await.status.unwrap();

        assert_eq!(status.history.len(), 1);
        let entry = &status.history[0];
        assert_eq!(entry.time, later);
        assert_eq!(entry.impacted_objects.len(), 3);
        let original = |key: &str| {
            entry
                .impacted_objects
                .iter()
                .find(|o| o.resource_key == key)
                .map(|o| o.original_count)
        };
        assert_eq!(original(API), Some(3));
        assert_eq!(original(WORKER), Some(2));
        assert_eq!(original("/prod/apps/v1/Deployment/cron"), Some(1));
    }

    #[tokio::test]
    async fn test_window_close_adds_unhibernate_entry() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        let mut hibernator = create_test_hibernator("nightly", "prod", afternoon_spec());
        let opened = Utc.with_ymd_and_hms(2024, 1, 3, 14, 0, 0).unwrap();
        hibernator.status = reconciler.tick(&hibernator, opened).await.status;
        assert_eq!(client.object_by_key(API).unwrap().replicas(), Some(0));

        let closed = Utc.with_ymd_and_hms(2024, 1, 3, 18, 30, 0).unwrap();
        let tick = reconciler.tick(&hibernator, closed).await;
        let status = tick.status.unwrap();
        let actions: Vec<Action> = status.history.iter().map(|entry| entry.action).collect();
        assert_eq!(actions, vec![Action::Hibernate, Action::UnHibernate]);
        assert_eq!(status.history[1].id, 1);
        assert!(!status.is_hibernating);
        assert_eq!(client.object_by_key(API).unwrap().replicas(), Some(3));
        assert_eq!(client.object_by_key(WORKER).unwrap().replicas(), Some(2));
        // Next afternoon
        assert_eq!(tick.requeue_after, Some(Duration::from_secs(18 * 3600 + 30 * 60)));
    }

    #[tokio::test]
    async fn test_history_limit_evicts_oldest() {
        let (_, _, reconciler) = setup(RecordingWriter::default());
        let spec = HibernatorSpec {
            revision_history_limit: Some(1),
            ..afternoon_spec()
        };
        let mut hibernator = create_test_hibernator("nightly", "prod", spec);
        hibernator.status = reconciler
            .tick(&hibernator, Utc.with_ymd_and_hms(2024, 1, 3, 14, 0, 0).unwrap())
            .await
            .status;
        let status = reconciler
            .tick(&hibernator, Utc.with_ymd_and_hms(2024, 1, 3, 19, 0, 0).unwrap())
            .await
            .status
            .unwrap();
        assert_eq!(status.history.len(), 1);
        assert_eq!(status.history[0].action, Action::UnHibernate);
        assert_eq!(status.history[0].id, 1);
    }

    #[tokio::test]
    async fn test_failures_are_reported_in_message() {
        let (client, _, reconciler) = setup(RecordingWriter::default());
        client.fail_patch(API, "conflict");
        let tick = reconciler
            .tick(&create_test_hibernator("nightly", "prod", always_spec("prod")), now())
            .await;
        let status = tick.status.unwrap();
        assert_eq!(status.status, HibernatorState::Succeeded);
        assert!(status.message.contains("1 object(s) failed"));
        let failed: Vec<&ImpactedObject> = status.history[0]
            .impacted_objects
            .iter()
            .filter(|o| o.resource_key == API)
            .collect();
        assert!(failed[0].message.contains("conflict"));
    }

    #[tokio::test]
    async fn test_reconcile_writes_changed_status_only() {
        let (_, writer, reconciler) = setup(RecordingWriter::default());
        let mut hibernator = create_test_hibernator("nightly", "prod", always_spec("prod"));

        let requeue = reconciler.reconcile_hibernator(&hibernator).await.unwrap();
        assert!(requeue.is_some());
        let written = writer.written.lock().unwrap().clone();
        assert_eq!(written.len(), 1);
        assert!(written[0].is_hibernating);

        // The next event arrives within the debounce window
        hibernator.status = Some(written[0].clone());
        reconciler.reconcile_hibernator(&hibernator).await.unwrap();
        assert_eq!(writer.written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_write_failure_fails_reconcile() {
        let (_, _, reconciler) = setup(RecordingWriter {
            fail: true,
            ..Default::default()
        });
        let hibernator = create_test_hibernator("nightly", "prod", always_spec("prod"));

        let error = reconciler.reconcile_hibernator(&hibernator).await.unwrap_err();
        assert!(matches!(error, ControllerError::StatusUpdate { .. }));

        let first = reconciler.handle_error(&hibernator, &error);
        let second = reconciler.handle_error(&hibernator, &error);
        assert_eq!(first, Duration::from_secs(60));
        assert!(second >= first);
    }
}
