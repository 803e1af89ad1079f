use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;

use super::category_service::{aggregate, CategoryTaxonomy};
use super::entity_store::EntityStore;
use super::grouping_service::form_groups;
use super::scoring::score_answers;
use crate::config::RoomSettings;
use crate::error::{RoomError, StoreError};
use crate::metrics::{
    ANSWERS_SUBMITTED_TOTAL, PERSIST_FAILURES_TOTAL, ROOMS_ACTIVE, ROOMS_EVICTED_TOTAL,
    ROOM_EVENTS_TOTAL,
};
use crate::models::{
    ConnectionId, Grouping, Identity, OptionIndex, Participant, ParticipantId, ParticipantResult,
    ParticipantSummary, QuestionId, Quiz, RoomCode, RoomSnapshot, ServerEvent, SessionRecord,
    SessionStatus,
};
use crate::utils::retry::{retry_async_when, RetryConfig};

const MAX_CODE_ATTEMPTS: usize = 32;
const MAX_DISPLAY_NAME_CHARS: usize = 64;
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// One live session: immutable quiz plus mutable state behind a single lock.
///
/// Every mutation of a room (join, leave, transition, answer) happens while
/// holding `state`, and events are broadcast before the lock is released, so
/// receivers observe them in the order the mutations were applied.
pub struct Room {
    code: RoomCode,
    session_id: String,
    quiz: Arc<Quiz>,
    owner_id: Option<String>,
    created_at: DateTime<Utc>,
    events: broadcast::Sender<ServerEvent>,
    state: Arc<Mutex<RoomState>>,
    /// Held while writing the session status, so writes land in order.
    status_writes: Mutex<()>,
}

struct RoomState {
    status: SessionStatus,
    participants: HashMap<ParticipantId, Participant>,
    join_order: Vec<ParticipantId>,
    connected: HashMap<ConnectionId, ParticipantId>,
    last_activity: Instant,
    /// Set once the room has left the registry; holders must re-resolve.
    closed: bool,
}

impl RoomState {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn roster(&self) -> impl Iterator<Item = &Participant> {
        self.join_order
            .iter()
            .filter_map(|id| self.participants.get(id))
    }

    fn connected_summaries(&self) -> Vec<ParticipantSummary> {
        self.roster()
            .filter(|p| self.connected.values().any(|id| id == &p.id))
            .map(Participant::summary)
            .collect()
    }
}

impl Room {
    fn new(record: SessionRecord, quiz: Quiz, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            code: record.room_code,
            session_id: record.id,
            quiz: Arc::new(quiz),
            owner_id: record.owner_id,
            created_at: Utc::now(),
            events,
            state: Arc::new(Mutex::new(RoomState {
                status: record.status,
                participants: HashMap::new(),
                join_order: Vec::new(),
                connected: HashMap::new(),
                last_activity: Instant::now(),
                closed: false,
            })),
            status_writes: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        let state = self.state.lock().await;
        RoomSnapshot {
            room_code: self.code.clone(),
            session_id: self.session_id.clone(),
            quiz_id: self.quiz.id.clone(),
            status: state.status,
            participants: state.connected_summaries(),
            created_at: self.created_at,
        }
    }

    /// Fire-and-forget fan-out. Never waits on receivers; a receiver that
    /// lags behind the buffer loses events.
    fn broadcast(&self, event: ServerEvent) {
        ROOM_EVENTS_TOTAL
            .with_label_values(&[event.event_name()])
            .inc();
        let _ = self.events.send(event);
    }

    fn authorize_owner(&self, actor: &Identity) -> Result<(), RoomError> {
        if !actor.is_teacher() {
            return Err(RoomError::Authorization(
                "teacher identity required".to_string(),
            ));
        }
        match &self.owner_id {
            Some(owner) if owner != &actor.id => Err(RoomError::Authorization(format!(
                "only the owner of room {} may do this",
                self.code
            ))),
            _ => Ok(()),
        }
    }
}

/// Result of a successful join.
pub struct JoinOutcome {
    pub room_code: RoomCode,
    pub participant: ParticipantSummary,
    pub status: SessionStatus,
    /// Subscribed before the `participant-joined` event was sent.
    pub events: broadcast::Receiver<ServerEvent>,
}

#[derive(Debug, Clone)]
struct ConnectionBinding {
    room_code: RoomCode,
    participant_id: ParticipantId,
}

#[derive(Default)]
struct RoomTable {
    by_code: HashMap<RoomCode, Arc<Room>>,
    by_quiz: HashMap<String, RoomCode>,
}

#[derive(Clone)]
struct Persister {
    store: Arc<dyn EntityStore>,
    retry: RetryConfig,
}

impl Persister {
    async fn save_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        retry_async_when(self.retry.clone(), StoreError::is_transient, || async {
            self.store
                .update_participant_score(&participant.id, participant.score, &participant.answers)
                .await
        })
        .await
    }

    /// Writes the room's current status. Writes are serialized per room and
    /// the in-memory status only moves forward, so the stored status does too.
    async fn save_status(&self, room: &Room) -> Result<(), StoreError> {
        let _ordered = room.status_writes.lock().await;
        let status = room.status().await;
        retry_async_when(self.retry.clone(), StoreError::is_transient, || async {
            self.store
                .upsert_session(&room.code, &room.quiz.id, status, room.owner_id.as_deref())
                .await
        })
        .await
        .map(|_| ())
    }
}

fn report_persist_failure(room: &Room, what: &str, err: &StoreError) {
    PERSIST_FAILURES_TOTAL.inc();
    tracing::error!(room_code = %room.code, error = %err, "Failed to persist {}", what);
    room.broadcast(ServerEvent::Error {
        code: "persist_failed".to_string(),
        message: format!("failed to save {}: {}", what, err),
    });
}

/// Owned table of live rooms plus the connection -> room reverse index.
///
/// Rooms are independent: operations on different rooms only contend on
/// the table lock for the duration of a map lookup.
pub struct RoomRegistry {
    store: Arc<dyn EntityStore>,
    taxonomy: Arc<CategoryTaxonomy>,
    settings: RoomSettings,
    persister: Persister,
    rooms: RwLock<RoomTable>,
    connections: Mutex<HashMap<ConnectionId, ConnectionBinding>>,
    creation: Mutex<()>,
}

impl RoomRegistry {
    pub fn new(
        store: Arc<dyn EntityStore>,
        taxonomy: CategoryTaxonomy,
        settings: RoomSettings,
    ) -> Self {
        let persister = Persister {
            store: store.clone(),
            retry: RetryConfig::with_max_attempts(settings.persist_max_attempts),
        };
        Self {
            store,
            taxonomy: Arc::new(taxonomy),
            settings,
            persister,
            rooms: RwLock::new(RoomTable::default()),
            connections: Mutex::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.by_code.len()
    }

    async fn cached(&self, code: &RoomCode) -> Option<Arc<Room>> {
        self.rooms.read().await.by_code.get(code).cloned()
    }

    /// Looks a room up by code, hydrating it from the entity store when an
    /// active session exists there but not in memory.
    pub async fn resolve(&self, code: &RoomCode) -> Result<Arc<Room>, RoomError> {
        if let Some(room) = self.cached(code).await {
            return Ok(room);
        }

        let record = self
            .with_retry(|| self.store.find_active_session_by_room_code(code))
            .await?
            .ok_or_else(|| RoomError::NotFound(format!("room {}", code)))?;
        let quiz = self.load_quiz(&record.quiz_id).await?;

        let mut table = self.rooms.write().await;
        let room = table
            .by_code
            .entry(code.clone())
            .or_insert_with(|| {
                ROOMS_ACTIVE.inc();
                tracing::info!(room_code = %code, "Hydrated room from store");
                Arc::new(Room::new(record, quiz, self.settings.event_buffer))
            })
            .clone();
        table
            .by_quiz
            .entry(room.quiz.id.clone())
            .or_insert_with(|| code.clone());
        Ok(room)
    }

    pub async fn snapshot(&self, code: &RoomCode) -> Result<RoomSnapshot, RoomError> {
        Ok(self.resolve(code).await?.snapshot().await)
    }

    /// Returns the active room for `quiz_id`, or opens a new waiting one.
    pub async fn create_or_get(
        &self,
        quiz_id: &str,
        owner: &Identity,
    ) -> Result<(RoomCode, SessionStatus), RoomError> {
        if !owner.is_teacher() {
            return Err(RoomError::Authorization(
                "teacher identity required".to_string(),
            ));
        }

        let _creation = self.creation.lock().await;

        let existing = {
            let table = self.rooms.read().await;
            table
                .by_quiz
                .get(quiz_id)
                .and_then(|code| table.by_code.get(code))
                .cloned()
        };
        if let Some(room) = existing {
            let status = room.status().await;
            if status.is_active() {
                return Ok((room.code.clone(), status));
            }
        }

        // Not in memory, but the store may still hold an active session
        // from before an eviction or restart.
        if let Some(record) = self
            .with_retry(|| self.store.find_active_session_by_quiz(quiz_id))
            .await?
        {
            let room = self.resolve(&record.room_code).await?;
            let status = room.status().await;
            if status.is_active() {
                tracing::info!(room_code = %room.code, quiz_id, "Reusing stored room for quiz");
                return Ok((room.code.clone(), status));
            }
        }

        let quiz = self.load_quiz(quiz_id).await?;
        let code = self.allocate_code().await?;
        let record = self
            .with_retry(|| {
                self.store
                    .upsert_session(&code, quiz_id, SessionStatus::Waiting, Some(owner.id.as_str()))
            })
            .await?;

        let room = Arc::new(Room::new(record, quiz, self.settings.event_buffer));
        {
            let mut table = self.rooms.write().await;
            table.by_code.insert(code.clone(), room);
            table.by_quiz.insert(quiz_id.to_string(), code.clone());
        }
        ROOMS_ACTIVE.inc();

        tracing::info!(room_code = %code, quiz_id, owner = %owner.id, "Room created");
        Ok((code, SessionStatus::Waiting))
    }

    /// Moves a room one step along Waiting -> InProgress -> Completed.
    /// Rejected transitions leave the room untouched.
    pub async fn transition(
        &self,
        code: &RoomCode,
        target: SessionStatus,
        actor: &Identity,
    ) -> Result<SessionStatus, RoomError> {
        let (room, mut state) = self.lock_live(code).await?;
        room.authorize_owner(actor)?;

        let finished: Vec<Participant> = {
            if !state.status.can_transition_to(target) {
                return Err(RoomError::InvalidTransition {
                    from: state.status,
                    to: target,
                });
            }
            state.status = target;
            state.touch();
            room.broadcast(match target {
                SessionStatus::Completed => ServerEvent::QuizStopped,
                _ => ServerEvent::QuizStarted,
            });

            if target == SessionStatus::Completed {
                for id in state.join_order.clone() {
                    if let Some(participant) = state.participants.get_mut(&id) {
                        participant.score = score_answers(&room.quiz, &participant.answers);
                    }
                }
                state.roster().cloned().collect()
            } else {
                Vec::new()
            }
        };
        drop(state);

        tracing::info!(room_code = %code, status = %target, actor = %actor.id, "Room transitioned");

        let persister = self.persister.clone();
        let room_for_persist = room.clone();
        tokio::spawn(async move {
            if let Err(err) = persister.save_status(&room_for_persist).await {
                report_persist_failure(&room_for_persist, "session status", &err);
            }
            for participant in finished {
                if let Err(err) = persister.save_participant(&participant).await {
                    report_persist_failure(
                        &room_for_persist,
                        &format!("results of participant {}", participant.id),
                        &err,
                    );
                }
            }
        });

        Ok(target)
    }

    /// Adds a participant to an active room and binds `connection_id` to it.
    pub async fn join(
        &self,
        code: &RoomCode,
        connection_id: ConnectionId,
        display_name: &str,
    ) -> Result<JoinOutcome, RoomError> {
        let display_name = display_name.trim();
        if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(RoomError::Validation(format!(
                "display name must be 1 to {} characters",
                MAX_DISPLAY_NAME_CHARS
            )));
        }

        if let Some(bound) = self.connections.lock().await.get(&connection_id) {
            return Err(RoomError::Validation(format!(
                "connection already joined room {}",
                bound.room_code
            )));
        }

        // The room stays locked while the participant is stored, so it can
        // neither complete nor be evicted halfway through a join.
        let (room, mut state) = self.lock_live(code).await?;
        if !state.status.is_active() {
            return Err(RoomError::NotFound(format!("active room {}", code)));
        }

        let participant_id = self
            .with_retry(|| self.store.create_participant(display_name, &room.session_id))
            .await?;

        let participant = Participant::new(participant_id.clone(), display_name.to_string());
        let summary = participant.summary();
        state.participants.insert(participant_id.clone(), participant);
        state.join_order.push(participant_id.clone());
        state.connected.insert(connection_id, participant_id.clone());
        state.touch();

        let events = room.events.subscribe();
        room.broadcast(ServerEvent::ParticipantJoined {
            id: summary.id.clone(),
            name: summary.display_name.clone(),
            joined_at: summary.joined_at,
        });

        self.connections.lock().await.insert(
            connection_id,
            ConnectionBinding {
                room_code: room.code.clone(),
                participant_id,
            },
        );

        tracing::info!(
            room_code = %room.code,
            participant_id = %summary.id,
            "Participant joined"
        );

        Ok(JoinOutcome {
            room_code: room.code.clone(),
            participant: summary,
            status: state.status,
            events,
        })
    }

    /// Room and participant bound to a connection, if any.
    pub async fn binding(&self, connection_id: ConnectionId) -> Option<(RoomCode, ParticipantId)> {
        self.connections
            .lock()
            .await
            .get(&connection_id)
            .map(|b| (b.room_code.clone(), b.participant_id.clone()))
    }

    /// Detaches a connection from its room. The participant stays on the
    /// room roster; their current results are persisted in the background.
    pub async fn leave(&self, connection_id: ConnectionId) -> Option<ParticipantId> {
        let binding = self.connections.lock().await.remove(&connection_id)?;
        let room = self.cached(&binding.room_code).await?;

        let departed = {
            let mut state = room.state.lock().await;
            state.connected.remove(&connection_id);
            state.touch();
            room.broadcast(ServerEvent::ParticipantLeft {
                id: binding.participant_id.clone(),
            });
            state.participants.get(&binding.participant_id).cloned()
        };

        tracing::info!(
            room_code = %room.code,
            participant_id = %binding.participant_id,
            "Participant left"
        );

        if let Some(participant) = departed {
            let persister = self.persister.clone();
            tokio::spawn(async move {
                if let Err(err) = persister.save_participant(&participant).await {
                    report_persist_failure(
                        &room,
                        &format!("results of participant {}", participant.id),
                        &err,
                    );
                }
            });
        }

        Some(binding.participant_id)
    }

    /// Loss of the underlying connection; same effect as [`leave`](Self::leave).
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<ParticipantId> {
        self.leave(connection_id).await
    }

    /// Records (or overwrites) a participant's answer to one question.
    pub async fn submit_answer(
        &self,
        code: &RoomCode,
        participant_id: &str,
        question_id: &QuestionId,
        selected: OptionIndex,
    ) -> Result<u32, RoomError> {
        let (room, mut state) = self.lock_live(code).await?;
        let question = room.quiz.question(question_id).ok_or_else(|| {
            RoomError::Validation(format!(
                "question {} is not part of this quiz",
                question_id
            ))
        })?;

        if state.status == SessionStatus::Completed {
            return Err(RoomError::State(format!(
                "room {} is completed; answers are closed",
                code
            )));
        }

        let participant = state
            .participants
            .get_mut(participant_id)
            .ok_or_else(|| RoomError::NotFound(format!("participant {}", participant_id)))?;
        participant.answers.insert(question_id.clone(), selected);
        participant.score = score_answers(&room.quiz, &participant.answers);
        let score = participant.score;
        state.touch();

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if question.is_correct(selected) { "true" } else { "false" }])
            .inc();

        room.broadcast(ServerEvent::AnswerSubmitted {
            participant_id: participant_id.to_string(),
            question_id: question_id.clone(),
            answer: selected,
        });

        Ok(score)
    }

    /// Recomputes a participant's score from their answers and persists it.
    ///
    /// The in-memory score is kept even when the durable write fails.
    pub async fn finalize_score(
        &self,
        code: &RoomCode,
        participant_id: &str,
    ) -> Result<u32, RoomError> {
        let (room, mut state) = self.lock_live(code).await?;

        let participant = {
            let participant = state
                .participants
                .get_mut(participant_id)
                .ok_or_else(|| RoomError::NotFound(format!("participant {}", participant_id)))?;
            participant.score = score_answers(&room.quiz, &participant.answers);
            participant.clone()
        };
        drop(state);

        if let Err(err) = self.persister.save_participant(&participant).await {
            report_persist_failure(
                &room,
                &format!("results of participant {}", participant.id),
                &err,
            );
            return Err(err.into());
        }

        Ok(participant.score)
    }

    /// Score and category breakdown for everyone who joined the room.
    pub async fn results(
        &self,
        code: &RoomCode,
        actor: &Identity,
    ) -> Result<Vec<ParticipantResult>, RoomError> {
        let room = self.resolve(code).await?;
        room.authorize_owner(actor)?;

        let state = room.state.lock().await;
        Ok(state
            .roster()
            .map(|p| ParticipantResult {
                id: p.id.clone(),
                display_name: p.display_name.clone(),
                score: p.score,
                answered: p.answers.len(),
                breakdown: aggregate(&room.quiz, &p.answers),
            })
            .collect())
    }

    /// Heterogeneous groups over the finished roster.
    pub async fn groups(
        &self,
        code: &RoomCode,
        actor: &Identity,
        group_size: i64,
        category: Option<&str>,
    ) -> Result<Grouping, RoomError> {
        let room = self.resolve(code).await?;
        if room.status().await != SessionStatus::Completed {
            return Err(RoomError::State(format!(
                "room {} has not completed yet",
                code
            )));
        }
        let roster = self.results(code, actor).await?;
        Ok(form_groups(&roster, group_size, category))
    }

    /// Owner-only subscription to a room's event stream.
    pub async fn subscribe(
        &self,
        code: &RoomCode,
        actor: &Identity,
    ) -> Result<broadcast::Receiver<ServerEvent>, RoomError> {
        let room = self.resolve(code).await?;
        room.authorize_owner(actor)?;
        Ok(room.events.subscribe())
    }

    /// Drops rooms that have had no connections for longer than the idle
    /// grace period, persisting participants of unfinished rooms first.
    pub async fn evict_idle(&self, now: Instant) -> Vec<RoomCode> {
        let grace = self.settings.idle_grace();
        let evicted: Vec<Arc<Room>> = {
            let mut table = self.rooms.write().await;
            let idle: Vec<RoomCode> = table
                .by_code
                .iter()
                .filter(|(_, room)| {
                    // A busy room is by definition not idle.
                    room.state.try_lock().is_ok_and(|mut state| {
                        let idle = state.connected.is_empty()
                            && now.saturating_duration_since(state.last_activity) >= grace;
                        state.closed |= idle;
                        idle
                    })
                })
                .map(|(code, _)| code.clone())
                .collect();

            idle.iter()
                .filter_map(|code| {
                    let room = table.by_code.remove(code)?;
                    if table.by_quiz.get(&room.quiz.id) == Some(code) {
                        table.by_quiz.remove(&room.quiz.id);
                    }
                    Some(room)
                })
                .collect()
        };

        let mut codes = Vec::with_capacity(evicted.len());
        for room in evicted {
            ROOMS_ACTIVE.dec();
            let (status, roster) = {
                let state = room.state.lock().await;
                (state.status, state.roster().cloned().collect::<Vec<_>>())
            };
            ROOMS_EVICTED_TOTAL
                .with_label_values(&[status.as_str()])
                .inc();
            tracing::info!(room_code = %room.code, %status, "Evicting idle room");

            if status.is_active() {
                self.persist_roster(&room, &roster).await;
            }
            codes.push(room.code.clone());
        }
        codes
    }

    /// Persists and drops every room. Used on process shutdown.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = {
            let mut table = self.rooms.write().await;
            table.by_quiz.clear();
            table.by_code.drain().map(|(_, room)| room).collect()
        };
        self.connections.lock().await.clear();

        for room in rooms {
            ROOMS_ACTIVE.dec();
            let roster: Vec<Participant> = {
                let mut state = room.state.lock().await;
                state.closed = true;
                state.roster().cloned().collect()
            };
            self.persist_roster(&room, &roster).await;
        }
        tracing::info!("Room registry shut down");
    }

    /// Resolves a room and locks its state. A room evicted between lookup
    /// and lock is resolved again, which rehydrates it from the store.
    async fn lock_live(
        &self,
        code: &RoomCode,
    ) -> Result<(Arc<Room>, OwnedMutexGuard<RoomState>), RoomError> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let room = self.resolve(code).await?;
            let state = room.state.clone().lock_owned().await;
            if !state.closed {
                return Ok((room, state));
            }
        }
        Err(RoomError::NotFound(format!("room {}", code)))
    }

    async fn persist_roster(&self, room: &Room, roster: &[Participant]) {
        for participant in roster {
            if let Err(err) = self.persister.save_participant(participant).await {
                report_persist_failure(
                    room,
                    &format!("results of participant {}", participant.id),
                    &err,
                );
            }
        }
    }

    async fn load_quiz(&self, quiz_id: &str) -> Result<Quiz, RoomError> {
        let quiz = self.with_retry(|| self.store.get_quiz_by_id(quiz_id)).await?;
        if quiz.questions.is_empty() {
            return Err(RoomError::Validation(format!(
                "quiz {} has no questions",
                quiz_id
            )));
        }
        self.taxonomy.categorize(quiz)
    }

    async fn allocate_code(&self) -> Result<RoomCode, RoomError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = RoomCode::generate(&mut rand::rng());
            if self.cached(&candidate).await.is_some() {
                continue;
            }
            let taken = self
                .with_retry(|| self.store.find_active_session_by_room_code(&candidate))
                .await?
                .is_some();
            if !taken {
                return Ok(candidate);
            }
        }
        Err(RoomError::Storage(
            "could not allocate a free room code".to_string(),
        ))
    }

    async fn with_retry<F, Fut, T>(&self, f: F) -> Result<T, RoomError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        retry_async_when(self.persister.retry.clone(), StoreError::is_transient, f)
            .await
            .map_err(RoomError::from)
    }
}
