use super::*;
use crate::certs::StaticStore;
use crate::testing::{AuthMode, FakeLauncher, FakePortal, THUMBPRINT, test_certificate};

const PENDING: &str = "Pdte. presentar";

fn controller(portal: &FakePortal) -> JobController {
    JobController::new(
        portal.config_arc(),
        Arc::new(StaticStore::new(vec![test_certificate()])),
        Arc::new(FakeLauncher {
            portal: portal.clone(),
        }),
    )
}

fn request() -> JobRequest {
    JobRequest {
        certificate_id: THUMBPRINT.to_string(),
        category: Category::KitDigital,
        speed: Speed::Fast,
        headless: true,
    }
}

/// Collects log lines until the terminal event.
async fn until_terminal(events: &mut broadcast::Receiver<JobEvent>) -> (Vec<String>, JobEvent) {
    let mut lines = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            JobEvent::Log { message, .. } => lines.push(message),
            terminal => return (lines, terminal),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_job_runs_to_completion() {
    let portal = FakePortal::builder()
        .page(&[("KD-1", PENDING), ("KD-2", PENDING)])
        .build();
    let controller = controller(&portal);

    let mut ticket = controller.start(request()).await.unwrap();
    assert_eq!(
        controller.status(ticket.job_id).await.unwrap(),
        JobStatus::Running
    );

    let (lines, terminal) = until_terminal(&mut ticket.events).await;
    match terminal {
        JobEvent::Finished { summary } => {
            assert_eq!((summary.attempted, summary.signed, summary.failed), (2, 2, 0));
        },
        other => panic!("unexpected terminal event: {other:?}"),
    }
    assert!(lines[0].starts_with("job started: certificate GARCIA LOPEZ ANA"));
    assert!(lines.iter().any(|l| l == "expedient KD-2 signed (method: clave)"));
    assert_eq!(
        controller.status(ticket.job_id).await.unwrap(),
        JobStatus::Finished
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_certificate_is_rejected_before_launch() {
    let portal = FakePortal::builder().page(&[("KD-1", PENDING)]).build();
    let controller = controller(&portal);

    let err = controller
        .start(JobRequest {
            certificate_id: "FFFF".to_string(),
            ..request()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SignerError::CertificateNotFound { .. }));
    assert!(portal.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_login_aborts_with_empty_summary() {
    let portal = FakePortal::builder()
        .page(&[("KD-1", PENDING)])
        .auth(AuthMode::Never)
        .build();
    let controller = controller(&portal);

    let mut ticket = controller.start(request()).await.unwrap();
    let (_, terminal) = until_terminal(&mut ticket.events).await;

    match terminal {
        JobEvent::Aborted { reason, summary } => {
            assert!(reason.contains("authentication did not complete"), "{reason}");
            assert_eq!(summary, RunSummary::default());
        },
        other => panic!("unexpected terminal event: {other:?}"),
    }
    assert!(portal.opened_ids().is_empty());
    assert_eq!(
        controller.status(ticket.job_id).await.unwrap(),
        JobStatus::Aborted
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_first_expedient_finishes_empty() {
    let portal = FakePortal::builder()
        .page(&[("KD-1", PENDING), ("KD-2", PENDING)])
        .build();
    let controller = controller(&portal);

    let mut ticket = controller.start(request()).await.unwrap();
    controller.stop(ticket.job_id).await.unwrap();

    let (_, terminal) = until_terminal(&mut ticket.events).await;
    assert!(matches!(
        terminal,
        JobEvent::Finished { summary } if summary.attempted == 0
    ));
    assert!(portal.signed_ids().is_empty());

    // Stopping a finished job is a no-op.
    controller.stop(ticket.job_id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_ended_jobs_beyond_retention_are_evicted() {
    let portal = FakePortal::builder().page(&[("KD-1", PENDING)]).build();
    let controller = JobController::with_retention(
        portal.config_arc(),
        Arc::new(StaticStore::new(vec![test_certificate()])),
        Arc::new(FakeLauncher {
            portal: portal.clone(),
        }),
        1,
    );

    let mut first = controller.start(request()).await.unwrap();
    until_terminal(&mut first.events).await;
    assert_eq!(
        controller.status(first.job_id).await.unwrap(),
        JobStatus::Finished
    );

    let mut second = controller.start(request()).await.unwrap();
    // The first job is still retained while the second runs.
    assert!(controller.status(first.job_id).await.is_ok());
    until_terminal(&mut second.events).await;

    assert!(matches!(
        controller.status(first.job_id).await,
        Err(SignerError::JobNotFound { .. })
    ));
    assert_ne!(
        controller.status(second.job_id).await.unwrap(),
        JobStatus::Running
    );
}

#[tokio::test]
async fn test_unknown_job_is_reported() {
    let portal = FakePortal::builder().build();
    let controller = controller(&portal);
    let job_id = JobId::new();

    assert!(matches!(
        controller.stop(job_id).await,
        Err(SignerError::JobNotFound { .. })
    ));
    assert!(matches!(
        controller.status(job_id).await,
        Err(SignerError::JobNotFound { .. })
    ));
    assert!(controller.subscribe(job_id).await.is_err());
}

#[test]
fn test_job_id_round_trips_through_text() {
    let id = JobId::new();
    assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    assert!("not-a-uuid".parse::<JobId>().is_err());
}

#[test]
fn test_event_wire_format() {
    let event = JobEvent::Aborted {
        reason: "browser failure: gone".to_string(),
        summary: RunSummary::default(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "aborted");
    assert_eq!(json["summary"]["attempted"], 0);
    assert_eq!(json["summary"]["duration"], "0s");
    assert!(event.is_terminal());

    let request: JobRequest = serde_json::from_str(
        r#"{"certificate_id": "AB12CD34EF56", "category": "kit_consulting"}"#,
    )
    .unwrap();
    assert_eq!(request.category, Category::KitConsulting);
    assert_eq!(request.speed, Speed::default());
    assert!(!request.headless);
}
