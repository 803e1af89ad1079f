#![allow(dead_code)]

use axum::{body::to_bytes, response::Response, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use quizroom_api::{
    config::{Config, RoomSettings},
    create_router,
    middlewares::auth::JwtClaims,
    models::{Identity, OptionIndex, Question, QuestionId, Quiz, ServerEvent},
    services::{entity_store::InMemoryEntityStore, room_registry::RoomRegistry, AppState},
};

pub const QUIZ_ID: &str = "quiz-aljabar";
pub const TEACHER_ID: &str = "teacher-1";

pub fn question(id: &str, correct: i64, subcategory: Option<&str>) -> Question {
    Question {
        id: QuestionId::from(id),
        text: format!("Question {}", id),
        options: ["A".into(), "B".into(), "C".into(), "D".into()],
        correct_option_index: OptionIndex::try_from(correct).unwrap(),
        category: String::new(),
        subcategory: subcategory.map(str::to_string),
    }
}

/// q1, q2 are `persamaan` (aljabar), q3 is `sudut` (geometri), q4 has no
/// subcategory (umum).
pub fn sample_quiz() -> Quiz {
    Quiz {
        id: QUIZ_ID.to_string(),
        title: "Diagnostik Aljabar".to_string(),
        questions: vec![
            question("q1", 0, Some("persamaan")),
            question("q2", 1, Some("Persamaan ")),
            question("q3", 2, Some("sudut")),
            question("q4", 3, None),
        ],
    }
}

pub fn test_settings() -> RoomSettings {
    RoomSettings {
        idle_grace_seconds: 300,
        sweep_interval_seconds: 1,
        event_buffer: 64,
        persist_max_attempts: 3,
    }
}

pub fn test_config() -> Config {
    Config {
        jwt_secret: "test-secret".to_string(),
        rooms: test_settings(),
        ..Config::default()
    }
}

pub fn test_store() -> Arc<InMemoryEntityStore> {
    Arc::new(InMemoryEntityStore::with_quizzes([sample_quiz()]))
}

pub fn create_registry(store: Arc<InMemoryEntityStore>, settings: RoomSettings) -> Arc<RoomRegistry> {
    Arc::new(RoomRegistry::new(
        store,
        test_config().taxonomy,
        settings,
    ))
}

pub fn create_test_state() -> (Arc<AppState>, Arc<InMemoryEntityStore>) {
    let store = test_store();
    let state = Arc::new(AppState::with_store(test_config(), store.clone()));
    (state, store)
}

pub fn create_test_app() -> (Router, Arc<AppState>, Arc<InMemoryEntityStore>) {
    let (state, store) = create_test_state();
    (create_router(state.clone()), state, store)
}

pub fn teacher(id: &str) -> Identity {
    Identity {
        id: id.to_string(),
        name: format!("Guru {}", id),
        role: "teacher".to_string(),
    }
}

pub fn student(id: &str) -> Identity {
    Identity {
        id: id.to_string(),
        name: format!("Siswa {}", id),
        role: "student".to_string(),
    }
}

pub fn token_for(state: &AppState, identity: &Identity) -> String {
    state
        .jwt
        .generate_token(&JwtClaims::new(&identity.id, &identity.name, &identity.role))
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body)
        .unwrap_or_else(|e| panic!("invalid json body {}: {}", String::from_utf8_lossy(&body), e))
}

/// Next event on a room subscription matching `pred`, skipping the rest.
pub async fn next_matching<F>(events: &mut broadcast::Receiver<ServerEvent>, pred: F) -> ServerEvent
where
    F: Fn(&ServerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Polls `check` until it holds; background persistence is asynchronous.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
