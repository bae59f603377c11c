//! Scheduler integration tests: real workers, file-backed DB, fake converter/transport.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::fakes::{Event, GatedConverter, RecordingTransport};
use common::{processing_task, processing_task_with, state_of, temp_db, wait_until};
use convd_core::notify::{Caption, Notice};
use convd_core::scheduler::{EnqueueOutcome, Scheduler, SchedulerOptions};
use convd_core::task_db::{Locale, NewTask, TaskDb, TaskOptions, TaskState};

const WAIT: Duration = Duration::from_secs(5);

fn scheduler(
    db: &TaskDb,
    converter: &Arc<GatedConverter>,
    transport: &Arc<RecordingTransport>,
    workers: usize,
) -> Scheduler {
    Scheduler::new(
        db.clone(),
        converter.clone(),
        transport.clone(),
        SchedulerOptions {
            workers,
            ..SchedulerOptions::default()
        },
    )
}

async fn wait_for_calls(converter: &GatedConverter, n: usize) -> bool {
    wait_until(WAIT, || async { converter.calls().len() >= n }).await
}

async fn wait_for_state(db: &TaskDb, id: i64, state: TaskState) -> bool {
    wait_until(WAIT, || async { state_of(db, id).await == Some(state) }).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_enqueue_is_ignored() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::closed();
    let transport = RecordingTransport::new();
    let sched = scheduler(&db, &converter, &transport, 1);
    sched.start();

    let id = processing_task(&db, 1, "a.png", "jpg").await;
    assert_eq!(
        sched.enqueue(id, None, "a.png", Locale::En, false),
        EnqueueOutcome::Accepted { position: 0 }
    );
    assert_eq!(
        sched.enqueue(id, None, "a.png", Locale::En, true),
        EnqueueOutcome::Duplicate
    );
    assert_eq!(sched.in_flight_len(), 1);

    converter.release(1);
    assert!(wait_for_state(&db, id, TaskState::Ready).await);
    assert!(wait_until(WAIT, || async { sched.in_flight_len() == 0 }).await);
    assert_eq!(converter.calls(), vec!["a.png".to_string()]);
    sched.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn priority_job_overtakes_queued_normal_job() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::closed();
    let transport = RecordingTransport::new();
    let sched = scheduler(&db, &converter, &transport, 1);
    sched.start();

    let j0 = processing_task(&db, 1, "j0.png", "jpg").await;
    let j1 = processing_task(&db, 1, "j1.png", "jpg").await;
    let j2 = processing_task(&db, 2, "j2.png", "jpg").await;
    let m1 = RecordingTransport::status_message(1, 1);

    assert_eq!(
        sched.enqueue(j0, None, "j0.png", Locale::En, false),
        EnqueueOutcome::Accepted { position: 0 }
    );
    assert!(wait_for_calls(&converter, 1).await);

    assert_eq!(
        sched.enqueue(j1, Some(m1), "j1.png", Locale::En, false),
        EnqueueOutcome::Accepted { position: 1 }
    );
    assert_eq!(
        sched.enqueue(j2, None, "j2.png", Locale::En, true),
        EnqueueOutcome::Accepted { position: 1 }
    );
    // Let both lane pushes land before the worker frees up.
    tokio::time::sleep(Duration::from_millis(100)).await;

    converter.release(1);
    assert!(wait_for_calls(&converter, 2).await);
    assert_eq!(converter.calls()[1], "j2.png");
    assert_eq!(sched.position(j1), Some(1));

    converter.release(1);
    assert!(wait_for_calls(&converter, 3).await);
    assert_eq!(converter.calls()[2], "j1.png");
    assert_eq!(sched.position(j1), Some(0));

    converter.release(1);
    for id in [j0, j1, j2] {
        assert!(wait_for_state(&db, id, TaskState::Ready).await);
    }
    sched.shutdown().await;

    let started = transport.events().into_iter().any(|e| {
        matches!(e, Event::Edited { message, notice: Notice::Started { .. } } if message == m1)
    });
    assert!(started, "j1 should get a started notice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_positions_only_move_down() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::closed();
    let transport = RecordingTransport::new();
    let sched = scheduler(&db, &converter, &transport, 1);
    sched.start();

    let mut ids = Vec::new();
    for i in 0..5 {
        let name = format!("f{i}.png");
        let id = processing_task(&db, 1, &name, "jpg").await;
        let message = RecordingTransport::status_message(1, i);
        let priority = i == 3;
        sched.enqueue(id, Some(message), name, Locale::En, priority);
        ids.push((id, message));
        if i == 0 {
            assert!(wait_for_calls(&converter, 1).await);
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    converter.release(5);
    for (id, _) in &ids {
        assert!(wait_for_state(&db, *id, TaskState::Ready).await);
    }
    sched.shutdown().await;

    for (_, message) in ids {
        let positions = transport.positions_for(message);
        assert!(
            positions.windows(2).all(|w| w[1] <= w[0]),
            "positions went up: {positions:?}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heavy_jobs_never_overlap() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::closed();
    let transport = RecordingTransport::new();
    let sched = scheduler(&db, &converter, &transport, 3);
    sched.start();

    let h1 = processing_task(&db, 1, "one.mp4", "mp3").await;
    let h2 = processing_task(&db, 1, "two.mkv", "mp4").await;
    let light = processing_task(&db, 1, "pic.png", "jpg").await;
    sched.enqueue(h1, None, "one.mp4", Locale::En, false);
    sched.enqueue(h2, None, "two.mkv", Locale::En, false);
    sched.enqueue(light, None, "pic.png", Locale::En, false);

    // One heavy job and the light one run; the second heavy job waits at the gate.
    assert!(wait_for_calls(&converter, 2).await);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let calls = converter.calls();
    assert_eq!(calls.len(), 2, "calls: {calls:?}");
    assert!(calls.contains(&"pic.png".to_string()));

    converter.release(3);
    for id in [h1, h2, light] {
        assert!(wait_for_state(&db, id, TaskState::Ready).await);
    }
    sched.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn explicit_heavy_flag_is_honoured() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::open();
    converter.set_delay(Duration::from_millis(30));
    let transport = RecordingTransport::new();
    let sched = scheduler(&db, &converter, &transport, 4);
    sched.start();

    let heavy = TaskOptions {
        heavy: true,
        ..TaskOptions::default()
    };
    let mut ids = Vec::new();
    for i in 0..4 {
        let name = format!("doc{i}.docx");
        let id = processing_task_with(&db, 1, &name, "pdf", heavy.clone()).await;
        sched.enqueue(id, None, name, Locale::En, false);
        ids.push(id);
    }
    for id in ids {
        assert!(wait_for_state(&db, id, TaskState::Ready).await);
    }
    assert_eq!(converter.peak(), 1);
    sched.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn success_delivers_and_marks_ready() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::open();
    let transport = RecordingTransport::new();
    let sched = scheduler(&db, &converter, &transport, 2);
    sched.start();

    let options = TaskOptions {
        credits_remaining: Some(5),
        ..TaskOptions::default()
    };
    let id = processing_task_with(&db, 3, "a.png", "jpg", options).await;
    let status = RecordingTransport::status_message(3, 77);
    sched.enqueue(id, Some(status), "a.png", Locale::En, false);

    assert!(wait_for_state(&db, id, TaskState::Ready).await);
    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.result_ref.as_deref(), Some("delivered:out:ref:a.png"));

    let deliveries = transport.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].caption, Caption::CreditsRemaining(5));
    assert_eq!(deliveries[0].result_name, "a.png.jpg");

    assert!(
        wait_until(WAIT, || async {
            transport
                .events()
                .contains(&Event::Deleted { message: status })
        })
        .await
    );
    sched.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conversion_failure_marks_error_and_notifies_once() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::open();
    converter.fail_on("bad.png");
    let transport = RecordingTransport::new();
    let sched = scheduler(&db, &converter, &transport, 1);
    sched.start();

    let id = processing_task(&db, 4, "bad.png", "jpg").await;
    sched.enqueue(id, None, "bad.png", Locale::En, false);

    assert!(wait_for_state(&db, id, TaskState::Error).await);
    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(
        task.error.as_deref(),
        Some("conversion failed: unsupported input")
    );
    assert!(wait_until(WAIT, || async { sched.in_flight_len() == 0 }).await);
    sched.shutdown().await;

    let failures: Vec<_> = transport
        .notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::ConversionFailed { .. } | Notice::DeliveryFailed { .. }))
        .collect();
    assert_eq!(
        failures,
        vec![Notice::ConversionFailed {
            name: "bad.png".into(),
            reason: "unsupported input".into(),
        }]
    );
    assert!(transport.deliveries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delivery_failure_is_a_distinct_error() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::open();
    let transport = RecordingTransport::new();
    transport.fail_delivery.store(true, Ordering::SeqCst);
    let sched = scheduler(&db, &converter, &transport, 1);
    sched.start();

    let id = processing_task(&db, 5, "a.png", "webp").await;
    sched.enqueue(id, None, "a.png", Locale::Ru, false);

    assert!(wait_for_state(&db, id, TaskState::Error).await);
    let task = db.get_task(id).await.unwrap().unwrap();
    assert!(task.error.unwrap().starts_with("delivery failed"));
    assert!(
        wait_until(WAIT, || async {
            transport
                .notices()
                .contains(&Notice::DeliveryFailed { name: "a.png".into() })
        })
        .await
    );
    sched.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_conversion_times_out() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::open();
    converter.set_delay(Duration::from_secs(5));
    let transport = RecordingTransport::new();
    let sched = Scheduler::new(
        db.clone(),
        converter.clone(),
        transport.clone(),
        SchedulerOptions {
            workers: 1,
            conversion_timeout: Duration::from_millis(50),
            ..SchedulerOptions::default()
        },
    );
    sched.start();

    let id = processing_task(&db, 6, "slow.png", "jpg").await;
    sched.enqueue(id, None, "slow.png", Locale::En, false);

    assert!(wait_for_state(&db, id, TaskState::Error).await);
    let task = db.get_task(id).await.unwrap().unwrap();
    assert!(task.error.unwrap().contains("timed out"));
    sched.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recovery_requeues_interrupted_tasks() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::open();
    let transport = RecordingTransport::new();

    let unlimited = TaskOptions {
        priority: true,
        unlimited: true,
        ..TaskOptions::default()
    };
    let a = processing_task(&db, 7, "a.png", "jpg").await;
    let b = processing_task_with(&db, 7, "b.png", "webp", unlimited).await;
    let mut orphan = NewTask::awaiting_format(
        7,
        &convd_core::task_db::BatchFile::new("r", "c.png", 1),
        TaskOptions::default(),
    );
    orphan.state = TaskState::Processing;
    let orphan = db.create_task(&orphan).await.unwrap();

    let sched = scheduler(&db, &converter, &transport, 1);
    let report = sched.recover().await.unwrap();
    assert_eq!(report.requeued, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(sched.in_flight_len(), 2);

    sched.start();
    assert!(wait_for_state(&db, a, TaskState::Ready).await);
    assert!(wait_for_state(&db, b, TaskState::Ready).await);
    assert_eq!(state_of(&db, orphan).await, Some(TaskState::Processing));
    sched.shutdown().await;

    let queued = transport
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Sent { notice: Notice::Queued { .. }, .. }))
        .count();
    assert_eq!(queued, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_leaves_running_work_for_recovery() {
    let (_dir, db) = temp_db().await;
    let converter = GatedConverter::closed();
    let transport = RecordingTransport::new();
    let sched = scheduler(&db, &converter, &transport, 1);
    sched.start();

    let id = processing_task(&db, 8, "a.png", "jpg").await;
    sched.enqueue(id, None, "a.png", Locale::En, false);
    assert!(wait_for_calls(&converter, 1).await);

    sched.shutdown().await;
    assert_eq!(state_of(&db, id).await, Some(TaskState::Processing));
}
