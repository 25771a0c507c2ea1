#[cfg(test)]
mod tests {
    use agathon::client::{ClientError, Snapshot, SnapshotDebouncer, SnapshotSink};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingSink {
        saved: Arc<Mutex<Vec<Snapshot>>>,
        fail: bool,
    }

    impl RecordingSink {
        fn saved(&self) -> Vec<i64> {
            self.saved
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.data["rev"].as_i64().unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl SnapshotSink for RecordingSink {
        async fn save(&self, snapshot: &Snapshot) -> Result<(), ClientError> {
            self.saved.lock().unwrap().push(snapshot.clone());
            if self.fail {
                return Err(ClientError::Http {
                    status: 500,
                    message: "database unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    fn rev(n: i64) -> Snapshot {
        Snapshot {
            data: json!({"rev": n, "shapes": []}),
            preview: None,
        }
    }

    const DELAY: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_only_last_snapshot_of_a_burst_is_saved() {
        let sink = RecordingSink::default();
        let debouncer = SnapshotDebouncer::new(sink.clone(), DELAY);

        debouncer.update(rev(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        debouncer.update(rev(2));
        tokio::time::sleep(Duration::from_millis(500)).await;
        debouncer.update(rev(3));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sink.saved().is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(sink.saved(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_quiet_periods_each_save() {
        let sink = RecordingSink::default();
        let debouncer = SnapshotDebouncer::new(sink.clone(), DELAY);

        debouncer.update(rev(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        debouncer.update(rev(2));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(sink.saved(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately_once() {
        let sink = RecordingSink::default();
        let debouncer = SnapshotDebouncer::new(sink.clone(), DELAY);

        debouncer.update(rev(1));
        debouncer.update(rev(2));
        debouncer.flush().await;
        assert_eq!(sink.saved(), vec![2]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.saved(), vec![2]);

        // Nothing pending: flushing again writes nothing.
        debouncer.flush().await;
        assert_eq!(sink.saved(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_saves_pending_and_failures_do_not_stop_saving() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let debouncer = SnapshotDebouncer::new(sink.clone(), DELAY);

        debouncer.update(rev(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        debouncer.update(rev(2));
        debouncer.close().await;

        assert_eq!(sink.saved(), vec![1, 2]);
    }
}
