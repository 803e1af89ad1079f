use std::sync::Arc;
use std::time::Duration;

use quizroom_api::{
    models::{Identity, ServerEvent, SessionStatus},
    services::{room_gateway::RoomGateway, room_registry::RoomRegistry},
};
use serde_json::json;
use tokio::sync::mpsc;

mod common;
use common::{create_registry, teacher, test_settings, test_store, QUIZ_ID, TEACHER_ID};

struct Client {
    gateway: RoomGateway,
    inbox: mpsc::Receiver<ServerEvent>,
}

impl Client {
    fn connect(registry: &Arc<RoomRegistry>, identity: Option<Identity>) -> Self {
        let (outbound, inbox) = mpsc::channel(64);
        Self {
            gateway: RoomGateway::new(registry.clone(), identity, outbound),
            inbox,
        }
    }

    async fn send(&mut self, message: serde_json::Value) {
        self.gateway.handle_text(&message.to_string()).await;
    }

    async fn next(&mut self) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(5), self.inbox.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbound channel closed")
    }

    async fn next_matching(&mut self, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
        loop {
            let event = self.next().await;
            if pred(&event) {
                return event;
            }
        }
    }

    fn assert_quiet(&mut self) {
        assert!(
            self.inbox.try_recv().is_err(),
            "expected no pending events"
        );
    }
}

async fn open_room(registry: &Arc<RoomRegistry>) -> String {
    let (code, _) = registry
        .create_or_get(QUIZ_ID, &teacher(TEACHER_ID))
        .await
        .unwrap();
    code.as_str().to_string()
}

fn error_code(event: &ServerEvent) -> &str {
    match event {
        ServerEvent::Error { code, .. } => code,
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn join_is_acknowledged_and_seen_by_the_room() {
    let registry = create_registry(test_store(), test_settings());
    let code = open_room(&registry).await;

    let mut ana = Client::connect(&registry, None);
    let mut budi = Client::connect(&registry, None);

    ana.send(json!({"type": "join-room", "roomCode": code.to_lowercase(), "displayName": "Ana"}))
        .await;
    let ack = ana.next().await;
    let ana_id = match ack {
        ServerEvent::RoomJoined {
            participant_id,
            status,
            ..
        } => {
            assert_eq!(status, SessionStatus::Waiting);
            participant_id
        }
        other => panic!("unexpected {other:?}"),
    };

    budi.send(json!({"type": "join-room", "roomCode": code, "displayName": "Budi"}))
        .await;
    budi.next().await;

    let seen = ana
        .next_matching(|e| matches!(e, ServerEvent::ParticipantJoined { name, .. } if name == "Budi"))
        .await;
    assert!(matches!(seen, ServerEvent::ParticipantJoined { .. }));
    assert_ne!(ana_id, "");
}

#[tokio::test]
async fn malformed_frames_only_reach_the_sender() {
    let registry = create_registry(test_store(), test_settings());
    let code = open_room(&registry).await;

    let mut ana = Client::connect(&registry, None);
    let mut budi = Client::connect(&registry, None);
    ana.send(json!({"type": "join-room", "roomCode": code, "displayName": "Ana"}))
        .await;
    budi.send(json!({"type": "join-room", "roomCode": code, "displayName": "Budi"}))
        .await;
    ana.next_matching(|e| matches!(e, ServerEvent::ParticipantJoined { name, .. } if name == "Budi"))
        .await;
    budi.next_matching(|e| matches!(e, ServerEvent::ParticipantJoined { name, .. } if name == "Budi"))
        .await;

    budi.gateway.handle_text("{not json").await;
    assert_eq!(error_code(&budi.next().await), "malformed_message");

    budi.send(json!({"type": "submit-answer", "roomCode": code, "questionId": "q1", "selectedOptionIndex": 9}))
        .await;
    assert_eq!(error_code(&budi.next().await), "validation_error");

    budi.send(json!({"type": "submit-answer", "roomCode": code, "questionId": "q42", "selectedOptionIndex": 0}))
        .await;
    assert_eq!(error_code(&budi.next().await), "validation_error");

    tokio::time::sleep(Duration::from_millis(50)).await;
    ana.assert_quiet();
}

#[tokio::test]
async fn answers_are_broadcast_to_the_room() {
    let registry = create_registry(test_store(), test_settings());
    let code = open_room(&registry).await;

    let mut ana = Client::connect(&registry, None);
    ana.send(json!({"type": "join-room", "roomCode": code, "displayName": "Ana"}))
        .await;

    ana.send(json!({"type": "submit-answer", "roomCode": code, "questionId": "q1", "selectedOptionIndex": 0}))
        .await;

    match ana
        .next_matching(|e| matches!(e, ServerEvent::AnswerSubmitted { .. }))
        .await
    {
        ServerEvent::AnswerSubmitted {
            question_id,
            answer,
            ..
        } => {
            assert_eq!(question_id.as_str(), "q1");
            assert_eq!(answer.get(), 0);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn submitting_without_joining_is_a_state_error() {
    let registry = create_registry(test_store(), test_settings());
    let code = open_room(&registry).await;

    let mut ana = Client::connect(&registry, None);
    ana.send(json!({"type": "submit-answer", "roomCode": code, "questionId": "q1", "selectedOptionIndex": 0}))
        .await;
    assert_eq!(error_code(&ana.next().await), "state_error");
}

#[tokio::test]
async fn only_the_owner_can_start_and_stop() {
    let registry = create_registry(test_store(), test_settings());
    let code = open_room(&registry).await;

    let mut anonymous = Client::connect(&registry, None);
    anonymous
        .send(json!({"type": "join-room", "roomCode": code, "displayName": "Ana"}))
        .await;
    anonymous.next().await;
    anonymous
        .send(json!({"type": "start-quiz", "roomCode": code}))
        .await;
    assert_eq!(
        error_code(
            &anonymous
                .next_matching(|e| matches!(e, ServerEvent::Error { .. }))
                .await
        ),
        "authorization_error"
    );

    let mut owner = Client::connect(&registry, Some(teacher(TEACHER_ID)));
    owner
        .send(json!({"type": "join-room", "roomCode": code}))
        .await;
    assert!(matches!(owner.next().await, ServerEvent::RoomJoined { .. }));

    owner.send(json!({"type": "start-quiz", "roomCode": code})).await;
    owner
        .next_matching(|e| *e == ServerEvent::QuizStarted)
        .await;
    anonymous
        .next_matching(|e| *e == ServerEvent::QuizStarted)
        .await;

    owner.send(json!({"type": "start-quiz", "roomCode": code})).await;
    assert_eq!(
        error_code(
            &owner
                .next_matching(|e| matches!(e, ServerEvent::Error { .. }))
                .await
        ),
        "invalid_transition"
    );

    owner.send(json!({"type": "stop-quiz", "roomCode": code})).await;
    anonymous
        .next_matching(|e| *e == ServerEvent::QuizStopped)
        .await;
}

#[tokio::test]
async fn leaving_stops_delivery_and_notifies_the_room() {
    let registry = create_registry(test_store(), test_settings());
    let code = open_room(&registry).await;

    let mut ana = Client::connect(&registry, None);
    let mut budi = Client::connect(&registry, None);
    ana.send(json!({"type": "join-room", "roomCode": code, "displayName": "Ana"}))
        .await;
    budi.send(json!({"type": "join-room", "roomCode": code, "displayName": "Budi"}))
        .await;
    let budi_id = match budi.next().await {
        ServerEvent::RoomJoined { participant_id, .. } => participant_id,
        other => panic!("unexpected {other:?}"),
    };

    budi.send(json!({"type": "leave-room", "roomCode": code})).await;
    let left = ana
        .next_matching(|e| matches!(e, ServerEvent::ParticipantLeft { .. }))
        .await;
    assert_eq!(left, ServerEvent::ParticipantLeft { id: budi_id });

    budi.send(json!({"type": "leave-room", "roomCode": code})).await;
    assert_eq!(
        error_code(
            &budi
                .next_matching(|e| matches!(e, ServerEvent::Error { .. }))
                .await
        ),
        "state_error"
    );
}

#[tokio::test]
async fn closing_a_connection_behaves_like_leave() {
    let registry = create_registry(test_store(), test_settings());
    let code = open_room(&registry).await;

    let mut ana = Client::connect(&registry, None);
    let budi = Client::connect(&registry, None);
    ana.send(json!({"type": "join-room", "roomCode": code, "displayName": "Ana"}))
        .await;
    let Client { mut gateway, .. } = budi;
    gateway
        .handle_text(&json!({"type": "join-room", "roomCode": code, "displayName": "Budi"}).to_string())
        .await;
    let connection_id = gateway.connection_id();

    gateway.close().await;

    ana.next_matching(|e| matches!(e, ServerEvent::ParticipantLeft { .. }))
        .await;
    assert!(registry.binding(connection_id).await.is_none());
}
