#![cfg(unix)]

use hostwatch_client::{MockRemoteService, UploadCall};
use hostwatch_core::{AgentConfig, UploadResponse};
use hostwatch_orchestrator::{
    CommandCollector, CronScheduler, Orchestrator, RecordingSleeper, RunOutcome,
};
use hostwatch_state::{Marker, Record};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const COLLECTOR_SCRIPT: &str = r#"
while [ $# -gt 0 ]; do
    if [ "$1" = "--output" ]; then out="$2"; fi
    shift
done
cat > /dev/null
printf 'collected-archive' > "$out"
"#;

struct Host {
    dir: TempDir,
    sleeper: RecordingSleeper,
}

impl Host {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("collect.sh"), COLLECTOR_SCRIPT).unwrap();
        std::fs::create_dir_all(dir.path().join("cron.daily")).unwrap();
        std::fs::write(dir.path().join("cron.daily").join("hostwatch"), "#!/bin/sh\n").unwrap();
        Self {
            dir,
            sleeper: RecordingSleeper::new(),
        }
    }

    fn config(&self) -> AgentConfig {
        AgentConfig {
            state_dir: self.dir.path().join("state"),
            cache_dir: self.dir.path().join("cache"),
            schedule_file: self.dir.path().join("cron.daily").join("hostwatch"),
            logging_file: self.dir.path().join("hostwatch.log"),
            username: Some("ops".to_string()),
            password: Some("secret".to_string()),
            display_name: Some("edge-01".to_string()),
            backoff_secs: 5,
            ..AgentConfig::default()
        }
    }

    fn orchestrator(
        &self,
        config: AgentConfig,
        remote: &MockRemoteService,
    ) -> Orchestrator<MockRemoteService, CommandCollector> {
        let collector = CommandCollector::new("/bin/sh", config.cache_dir.clone())
            .with_args([self.dir.path().join("collect.sh").to_string_lossy().to_string()]);
        let scheduler = Arc::new(CronScheduler::new(config.schedule_file.clone()));
        Orchestrator::with_parts(
            config,
            remote.clone(),
            collector,
            Arc::new(self.sleeper.clone()),
            scheduler,
        )
    }
}

#[tokio::test]
async fn test_modern_upload_recovers_from_server_errors() {
    let host = Host::new();
    let remote = MockRemoteService::new().with_upload_results(vec![
        Ok(UploadResponse::new(500, "")),
        Ok(UploadResponse::new(500, "")),
        Ok(UploadResponse::new(202, "")),
    ]);
    let config = AgentConfig {
        retries: 3,
        legacy_upload: false,
        ..host.config()
    };
    let orchestrator = host.orchestrator(config, &remote);

    let outcome = orchestrator.run().await.unwrap();

    match outcome {
        RunOutcome::Uploaded(summary) => {
            assert_eq!(summary.attempts, 3);
            assert_eq!(summary.response.status, 202);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(host.sleeper.sleeps(), vec![Duration::from_secs(5); 2]);
    assert!(orchestrator.store().has_marker(Marker::LastUpload));

    let calls: Vec<UploadCall> = remote.upload_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.bytes == b"collected-archive".to_vec()));
    assert!(calls.iter().all(|c| c.duration_hint.is_some()));
}

#[tokio::test]
async fn test_legacy_lifecycle_register_upload_unregister() {
    let host = Host::new();
    let remote = MockRemoteService::new()
        .with_upload_results(vec![Ok(UploadResponse::new(201, "{\"id\": \"r-1\"}"))]);

    let config = AgentConfig {
        register: true,
        ..host.config()
    };
    let orchestrator = host.orchestrator(config, &remote);
    assert!(matches!(
        orchestrator.run().await.unwrap(),
        RunOutcome::Uploaded(_)
    ));
    let store = orchestrator.store().clone();
    assert!(store.has_marker(Marker::Registered));
    assert_eq!(
        store.read_record(Record::LastUploadResults).unwrap(),
        Some(b"{\"id\": \"r-1\"}".to_vec())
    );
    assert!(host.dir.path().join("cache").join("hostwatch-archive.tar.gz").exists());

    // A second run finds the host registered and does not register again
    let orchestrator = host.orchestrator(host.config(), &remote);
    assert!(matches!(
        orchestrator.run().await.unwrap(),
        RunOutcome::Uploaded(_)
    ));
    assert_eq!(remote.calls().register, 1);

    let config = AgentConfig {
        unregister: true,
        ..host.config()
    };
    let orchestrator = host.orchestrator(config, &remote);
    assert_eq!(orchestrator.run().await.unwrap(), RunOutcome::Unregistered);

    assert!(store.has_marker(Marker::Unregistered));
    assert!(!store.has_marker(Marker::Registered));
    assert!(!host.dir.path().join("cron.daily").join("hostwatch").exists());
    assert_eq!(
        std::fs::read_dir(host.dir.path().join("cache")).unwrap().count(),
        0
    );
}

#[tokio::test]
async fn test_offline_run_leaves_archive_on_disk() {
    let host = Host::new();
    let remote = MockRemoteService::new();
    let config = AgentConfig {
        offline: true,
        ..host.config()
    };

    let outcome = host.orchestrator(config, &remote).run().await.unwrap();

    match outcome {
        RunOutcome::Collected { archive } => {
            assert_eq!(std::fs::read(&archive).unwrap(), b"collected-archive");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(remote.calls().upload_archive, 0);
    assert_eq!(remote.calls().check_registration, 0);
}
