use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{AnswerMap, ParticipantId, Quiz, RoomCode, SessionRecord, SessionStatus};

/// Durable storage for quizzes, sessions and participants.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_quiz_by_id(&self, quiz_id: &str) -> Result<Quiz, StoreError>;

    async fn find_active_session_by_room_code(
        &self,
        room_code: &RoomCode,
    ) -> Result<Option<SessionRecord>, StoreError>;

    async fn find_active_session_by_quiz(
        &self,
        quiz_id: &str,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Creates the session for `room_code` or advances the status of the
    /// latest one. Status never moves backwards: a write at or below the
    /// stored status is a no-op returning the stored record, and a
    /// completed session is only followed by a new one for a `Waiting`
    /// write.
    async fn upsert_session(
        &self,
        room_code: &RoomCode,
        quiz_id: &str,
        status: SessionStatus,
        owner_id: Option<&str>,
    ) -> Result<SessionRecord, StoreError>;

    async fn create_participant(
        &self,
        name: &str,
        session_id: &str,
    ) -> Result<ParticipantId, StoreError>;

    async fn update_participant_score(
        &self,
        participant_id: &str,
        score: u32,
        answers: &AnswerMap,
    ) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredParticipant {
    pub id: ParticipantId,
    pub name: String,
    pub session_id: String,
    pub score: u32,
    pub answers: AnswerMap,
}

#[derive(Default)]
struct MemoryState {
    quizzes: HashMap<String, Quiz>,
    sessions: Vec<SessionRecord>,
    participants: HashMap<ParticipantId, StoredParticipant>,
}

/// Process-local store, used for development and tests.
#[derive(Default)]
pub struct InMemoryEntityStore {
    state: Mutex<MemoryState>,
    failing_writes: AtomicUsize,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quizzes(quizzes: impl IntoIterator<Item = Quiz>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                quizzes: quizzes
                    .into_iter()
                    .map(|quiz| (quiz.id.clone(), quiz))
                    .collect(),
                ..MemoryState::default()
            }),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Loads a JSON array of quizzes.
    pub fn from_seed_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let quizzes: Vec<Quiz> = serde_json::from_str(&raw)?;
        tracing::info!(
            "Seeded in-memory store with {} quizzes from {}",
            quizzes.len(),
            path.as_ref().display()
        );
        Ok(Self::with_quizzes(quizzes))
    }

    pub async fn insert_quiz(&self, quiz: Quiz) {
        self.state.lock().await.quizzes.insert(quiz.id.clone(), quiz);
    }

    /// Makes the next `count` writes fail with a transient error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub async fn participant(&self, id: &str) -> Option<StoredParticipant> {
        self.state.lock().await.participants.get(id).cloned()
    }

    pub async fn sessions(&self) -> Vec<SessionRecord> {
        self.state.lock().await.sessions.clone()
    }

    pub async fn participants(&self) -> Vec<StoredParticipant> {
        self.state.lock().await.participants.values().cloned().collect()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Transient("injected write failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_quiz_by_id(&self, quiz_id: &str) -> Result<Quiz, StoreError> {
        self.state
            .lock()
            .await
            .quizzes
            .get(quiz_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("quiz {}", quiz_id)))
    }

    async fn find_active_session_by_room_code(
        &self,
        room_code: &RoomCode,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .sessions
            .iter()
            .find(|s| &s.room_code == room_code && s.status.is_active())
            .cloned())
    }

    async fn find_active_session_by_quiz(
        &self,
        quiz_id: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .sessions
            .iter()
            .rev()
            .find(|s| s.quiz_id == quiz_id && s.status.is_active())
            .cloned())
    }

    async fn upsert_session(
        &self,
        room_code: &RoomCode,
        quiz_id: &str,
        status: SessionStatus,
        owner_id: Option<&str>,
    ) -> Result<SessionRecord, StoreError> {
        self.check_write()?;
        let mut state = self.state.lock().await;

        if let Some(latest) = state
            .sessions
            .iter_mut()
            .rev()
            .find(|s| &s.room_code == room_code)
        {
            if latest.status.is_active() || status != SessionStatus::Waiting {
                if status > latest.status {
                    latest.status = status;
                }
                return Ok(latest.clone());
            }
        }

        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            room_code: room_code.clone(),
            quiz_id: quiz_id.to_string(),
            status,
            owner_id: owner_id.map(str::to_string),
        };
        state.sessions.push(record.clone());
        Ok(record)
    }

    async fn create_participant(
        &self,
        name: &str,
        session_id: &str,
    ) -> Result<ParticipantId, StoreError> {
        self.check_write()?;
        let id = Uuid::new_v4().to_string();
        self.state.lock().await.participants.insert(
            id.clone(),
            StoredParticipant {
                id: id.clone(),
                name: name.to_string(),
                session_id: session_id.to_string(),
                score: 0,
                answers: AnswerMap::new(),
            },
        );
        Ok(id)
    }

    async fn update_participant_score(
        &self,
        participant_id: &str,
        score: u32,
        answers: &AnswerMap,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let participant = state
            .participants
            .get_mut(participant_id)
            .ok_or_else(|| StoreError::NotFound(format!("participant {}", participant_id)))?;
        participant.score = score;
        participant.answers = answers.clone();
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_updates_the_active_session_in_place() {
        let store = InMemoryEntityStore::new();
        let code = RoomCode::parse("ROOM01").unwrap();

        let created = store
            .upsert_session(&code, "quiz-1", SessionStatus::Waiting, Some("teacher-1"))
            .await
            .unwrap();
        let updated = store
            .upsert_session(&code, "quiz-1", SessionStatus::InProgress, None)
            .await
            .unwrap();

        assert_eq!(created.id, updated.id);
        assert_eq!(updated.status, SessionStatus::InProgress);
        assert_eq!(updated.owner_id.as_deref(), Some("teacher-1"));

        let lower = RoomCode::parse("room01").unwrap();
        let found = store.find_active_session_by_room_code(&lower).await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(created.id));
    }

    #[tokio::test]
    async fn completed_sessions_are_not_active() {
        let store = InMemoryEntityStore::new();
        let code = RoomCode::parse("ROOM02").unwrap();
        store
            .upsert_session(&code, "quiz-1", SessionStatus::Completed, None)
            .await
            .unwrap();

        assert!(store
            .find_active_session_by_room_code(&code)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn late_status_writes_never_regress_or_reopen() {
        let store = InMemoryEntityStore::new();
        let code = RoomCode::parse("ROOM03").unwrap();
        let created = store
            .upsert_session(&code, "quiz-1", SessionStatus::Waiting, Some("teacher-1"))
            .await
            .unwrap();
        store
            .upsert_session(&code, "quiz-1", SessionStatus::Completed, None)
            .await
            .unwrap();

        let stale = store
            .upsert_session(&code, "quiz-1", SessionStatus::InProgress, None)
            .await
            .unwrap();

        assert_eq!(stale.id, created.id);
        assert_eq!(stale.status, SessionStatus::Completed);
        assert_eq!(store.sessions().await.len(), 1);
        assert!(store
            .find_active_session_by_room_code(&code)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn active_session_is_found_by_quiz() {
        let store = InMemoryEntityStore::new();
        let code = RoomCode::parse("ROOM04").unwrap();
        store
            .upsert_session(&code, "quiz-1", SessionStatus::InProgress, None)
            .await
            .unwrap();

        let found = store.find_active_session_by_quiz("quiz-1").await.unwrap();
        assert_eq!(found.map(|s| s.room_code), Some(code));
        assert!(store
            .find_active_session_by_quiz("quiz-2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_bounded() {
        let store = InMemoryEntityStore::new();
        store.fail_next_writes(1);

        let first = store.create_participant("Ana", "s1").await;
        assert!(matches!(first, Err(ref e) if e.is_transient()));

        let second = store.create_participant("Ana", "s1").await;
        assert!(second.is_ok());
    }
}
