mod common;

use std::{sync::Arc, time::Duration};

use common::{
    ids, note, principal, reminder, response, settings, settle, FakeConnector, MockSource,
    RecordingSink,
};
use inventory_notify::{
    model::ActivityHint, ConnectionState, EngineSettings, NotificationEngine, PushCommand,
    PushEvent, SyncOutcome,
};

fn push_settings() -> EngineSettings {
    EngineSettings {
        push_enabled: true,
        reminder_interval_secs: 3600,
        ..settings()
    }
}

fn engine_with(
    settings: &EngineSettings,
    source: &Arc<MockSource>,
    connector: Option<&Arc<FakeConnector>>,
    sink: &Arc<RecordingSink>,
) -> NotificationEngine {
    NotificationEngine::new(
        settings,
        source.clone(),
        connector.map(|c| c.clone() as Arc<dyn inventory_notify::PushConnector>),
        sink.clone(),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn poll_only_session_falls_back_to_polling() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    source.queue_fetch(Ok(response(vec![note("a", 1, false)], 1)));
    let engine = engine_with(&settings(), &source, None, &sink);

    let outcome = engine.start(principal()).await;
    settle().await;

    assert!(matches!(outcome, SyncOutcome::Applied { .. }));
    assert_eq!(engine.connection_state(), ConnectionState::Polling);
    assert_eq!(ids(&engine.view().notifications), ["a"]);
    assert!(engine.is_started());
}

#[tokio::test(start_paused = true)]
async fn starting_twice_is_a_no_op() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    let engine = engine_with(&settings(), &source, None, &sink);

    engine.start(principal()).await;
    settle().await;
    let fetches = source.fetch_count();

    assert_eq!(engine.start(principal()).await, SyncOutcome::Skipped);
    settle().await;
    assert_eq!(source.fetch_count(), fetches);
}

#[tokio::test(start_paused = true)]
async fn push_session_authenticates_and_delivers() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    let connector = FakeConnector::new();
    let mut push = connector.accept_next();
    source.queue_fetch(Ok(response(vec![note("a", 1, false)], 1)));
    let engine = engine_with(&push_settings(), &source, Some(&connector), &sink);

    engine.start(principal()).await;
    settle().await;

    assert_eq!(engine.connection_state(), ConnectionState::PushActive);
    assert_eq!(
        push.commands.recv().await,
        Some(PushCommand::Authenticate {
            principal_id: "user-1".to_string()
        })
    );
    assert_eq!(
        push.commands.recv().await,
        Some(PushCommand::Activity {
            state: ActivityHint::Active
        })
    );

    let pushed = reminder("r1", 5, "2024-05-02");
    push.events
        .send(Ok(PushEvent::NewNotification(pushed.clone())))
        .unwrap();
    settle().await;
    push.events
        .send(Ok(PushEvent::NewNotification(pushed)))
        .unwrap();
    settle().await;

    let view = engine.view();
    assert_eq!(ids(&view.notifications), ["r1", "a"]);
    assert_eq!(view.unread_count, 2);
    assert_eq!(sink.sound_count(), 1);

    push.events
        .send(Ok(PushEvent::NotificationMarkedRead {
            id: "r1".to_string(),
        }))
        .unwrap();
    settle().await;
    assert_eq!(engine.view().unread_count, 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_push_channel_falls_back_and_resyncs_on_reconnect() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    let connector = FakeConnector::new();
    let push = connector.accept_next();
    let engine = engine_with(&push_settings(), &source, Some(&connector), &sink);

    engine.start(principal()).await;
    settle().await;
    assert_eq!(engine.connection_state(), ConnectionState::PushActive);
    let before_drop = source.fetch_count();

    drop(push);
    settle().await;
    assert_eq!(engine.connection_state(), ConnectionState::Polling);
    assert_eq!(source.fetch_count(), before_drop + 1);

    let _push = connector.accept_next();
    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;

    assert_eq!(engine.connection_state(), ConnectionState::PushActive);
    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(source.fetch_count(), before_drop + 2);
    assert_eq!(source.since.lock().unwrap().last().copied(), Some(None));
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_and_keeps_polling() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    let connector = FakeConnector::new();
    let settings = EngineSettings {
        push_max_reconnect_attempts: 2,
        ..push_settings()
    };
    let engine = engine_with(&settings, &source, Some(&connector), &sink);

    engine.start(principal()).await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    settle().await;

    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(engine.connection_state(), ConnectionState::Polling);
    let diagnostics = engine.diagnostics();
    assert!(diagnostics.push_gave_up);
    assert_eq!(diagnostics.reconnect_attempts, 2);
    assert_eq!(diagnostics.connection_state, "Polling");
}

#[tokio::test(start_paused = true)]
async fn poll_cadence_follows_attention() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    let settings = EngineSettings {
        reminder_interval_secs: 3600,
        ..settings()
    };
    let engine = engine_with(&settings, &source, None, &sink);

    engine.start(principal()).await;
    settle().await;
    let started = source.fetch_count();

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    assert_eq!(source.fetch_count(), started + 1);
    assert_eq!(engine.diagnostics().poll_interval_seconds, 30);

    assert_eq!(engine.set_visible(false).await, None);
    settle().await;
    tokio::time::sleep(Duration::from_secs(200)).await;
    settle().await;
    assert_eq!(source.fetch_count(), started + 1);
    assert_eq!(engine.diagnostics().poll_interval_seconds, 300);

    let regained = engine.set_visible(true).await;
    assert!(matches!(regained, Some(SyncOutcome::Applied { .. })));
    assert_eq!(source.fetch_count(), started + 2);
}

#[tokio::test(start_paused = true)]
async fn system_notification_only_while_in_background() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    let connector = FakeConnector::new();
    let mut push = connector.accept_next();
    let engine = engine_with(&push_settings(), &source, Some(&connector), &sink);

    engine.start(principal()).await;
    settle().await;
    let event = || PushEvent::PushNotification {
        title: "Rental due".to_string(),
        body: "Drill #4 is due tomorrow".to_string(),
        notification_id: None,
    };

    push.events.send(Ok(event())).unwrap();
    settle().await;
    assert!(sink.system.lock().unwrap().is_empty());

    engine.set_visible(false).await;
    settle().await;
    push.events.send(Ok(event())).unwrap();
    settle().await;
    assert_eq!(sink.system.lock().unwrap().len(), 1);

    let mut hints = Vec::new();
    while let Ok(command) = push.commands.try_recv() {
        hints.push(command);
    }
    assert_eq!(
        hints.last(),
        Some(&PushCommand::Activity {
            state: ActivityHint::Inactive
        })
    );
}

#[tokio::test(start_paused = true)]
async fn idle_user_is_reported_inactive_to_push_server() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    let connector = FakeConnector::new();
    let mut push = connector.accept_next();
    let engine = engine_with(&push_settings(), &source, Some(&connector), &sink);

    engine.start(principal()).await;
    settle().await;
    let drain = |push: &mut common::PushHandle| {
        let mut commands = Vec::new();
        while let Ok(command) = push.commands.try_recv() {
            commands.push(command);
        }
        commands
    };
    assert_eq!(
        drain(&mut push).last(),
        Some(&PushCommand::Activity {
            state: ActivityHint::Active
        })
    );

    tokio::time::sleep(Duration::from_secs(100)).await;
    settle().await;
    assert!(drain(&mut push).is_empty());

    tokio::time::sleep(Duration::from_secs(40)).await;
    settle().await;
    assert_eq!(
        drain(&mut push),
        [PushCommand::Activity {
            state: ActivityHint::Inactive
        }]
    );

    engine.record_interaction();
    settle().await;
    assert_eq!(
        drain(&mut push),
        [PushCommand::Activity {
            state: ActivityHint::Active
        }]
    );
    assert_eq!(engine.connection_state(), ConnectionState::PushActive);
}

#[tokio::test(start_paused = true)]
async fn stop_clears_session_and_is_repeatable() {
    let source = MockSource::new();
    let sink = RecordingSink::new();
    source.queue_fetch(Ok(response(vec![note("a", 1, false)], 1)));
    let engine = engine_with(&settings(), &source, None, &sink);

    engine.start(principal()).await;
    settle().await;
    engine.stop();
    engine.stop();
    settle().await;

    assert!(!engine.is_started());
    assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
    assert!(engine.view().notifications.is_empty());
    assert!(engine.mark_all_read().await.is_err());
    assert_eq!(engine.sync_now().await, SyncOutcome::NotStarted);
}
