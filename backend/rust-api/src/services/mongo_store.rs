use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::error::{ErrorKind, RETRYABLE_WRITE_ERROR};
use mongodb::Database;

use super::entity_store::EntityStore;
use crate::error::StoreError;
use crate::metrics::track_store_operation;
use crate::models::{
    AnswerMap, ParticipantId, Question, Quiz, RoomCode, SessionRecord, SessionStatus,
};

const QUIZZES: &str = "quizzes";
const SESSIONS: &str = "quiz_sessions";
const PARTICIPANTS: &str = "participants";

/// MongoDB-backed entity store.
pub struct MongoEntityStore {
    mongo: Database,
}

impl MongoEntityStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

fn classify(err: mongodb::error::Error) -> StoreError {
    let transient = err.contains_label(RETRYABLE_WRITE_ERROR)
        || matches!(
            *err.kind,
            ErrorKind::Io(_)
                | ErrorKind::ServerSelection { .. }
                | ErrorKind::ConnectionPoolCleared { .. }
        );
    if transient {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Permanent(err.to_string())
    }
}

fn id_filter(id: &str) -> Document {
    match ObjectId::parse_str(id) {
        Ok(oid) => doc! { "_id": oid },
        Err(_) => doc! { "_id": id },
    }
}

fn id_to_string(document: &Document) -> Result<String, StoreError> {
    match document.get("_id") {
        Some(Bson::ObjectId(oid)) => Ok(oid.to_hex()),
        Some(Bson::String(value)) => Ok(value.clone()),
        _ => Err(StoreError::Permanent(
            "document has unsupported _id type".to_string(),
        )),
    }
}

fn malformed(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Permanent(format!("malformed {}: {}", what, err))
}

fn quiz_from_document(document: &Document) -> Result<Quiz, StoreError> {
    let id = id_to_string(document)?;
    let title = document.get_str("title").unwrap_or_default().to_string();
    let questions = document
        .get_array("questions")
        .map_err(|e| malformed("quiz questions", e))?
        .iter()
        .map(|value| bson::from_bson::<Question>(value.clone()).map_err(|e| malformed("question", e)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Quiz {
        id,
        title,
        questions,
    })
}

fn session_from_document(document: &Document) -> Result<SessionRecord, StoreError> {
    let room_code = document
        .get_str("room_code")
        .map_err(|e| malformed("session room_code", e))
        .and_then(|raw| RoomCode::parse(raw).map_err(|e| malformed("session room_code", e)))?;
    let status: SessionStatus = document
        .get("status")
        .cloned()
        .ok_or_else(|| malformed("session", "missing status"))
        .and_then(|value| bson::from_bson(value).map_err(|e| malformed("session status", e)))?;

    Ok(SessionRecord {
        id: id_to_string(document)?,
        room_code,
        quiz_id: document
            .get_str("quiz_id")
            .map_err(|e| malformed("session quiz_id", e))?
            .to_string(),
        status,
        owner_id: document.get_str("owner_id").ok().map(str::to_string),
    })
}

fn active_statuses() -> Bson {
    Bson::Array(vec![
        Bson::String(SessionStatus::Waiting.as_str().to_string()),
        Bson::String(SessionStatus::InProgress.as_str().to_string()),
    ])
}

fn statuses_below(status: SessionStatus) -> Bson {
    Bson::Array(
        [SessionStatus::Waiting, SessionStatus::InProgress, SessionStatus::Completed]
            .into_iter()
            .filter(|s| *s < status)
            .map(|s| Bson::String(s.as_str().to_string()))
            .collect(),
    )
}

fn answers_to_document(answers: &AnswerMap) -> Document {
    answers
        .iter()
        .map(|(question_id, index)| (question_id.to_string(), Bson::Int32(i32::from(index.get()))))
        .collect()
}

#[async_trait]
impl EntityStore for MongoEntityStore {
    async fn get_quiz_by_id(&self, quiz_id: &str) -> Result<Quiz, StoreError> {
        let collection = self.mongo.collection::<Document>(QUIZZES);
        let document = track_store_operation("get_quiz", async {
            collection.find_one(id_filter(quiz_id)).await.map_err(classify)
        })
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("quiz {}", quiz_id)))?;

        quiz_from_document(&document)
    }

    async fn find_active_session_by_room_code(
        &self,
        room_code: &RoomCode,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let collection = self.mongo.collection::<Document>(SESSIONS);
        let filter = doc! {
            "room_code": room_code.as_str(),
            "status": { "$in": active_statuses() },
        };

        let document = track_store_operation("find_session", async {
            collection.find_one(filter).await.map_err(classify)
        })
        .await?;

        document.as_ref().map(session_from_document).transpose()
    }

    async fn find_active_session_by_quiz(
        &self,
        quiz_id: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let collection = self.mongo.collection::<Document>(SESSIONS);
        let filter = doc! {
            "quiz_id": quiz_id,
            "status": { "$in": active_statuses() },
        };

        let document = track_store_operation("find_session", async {
            collection
                .find_one(filter)
                .sort(doc! { "createdAt": -1 })
                .await
                .map_err(classify)
        })
        .await?;

        document.as_ref().map(session_from_document).transpose()
    }

    async fn upsert_session(
        &self,
        room_code: &RoomCode,
        quiz_id: &str,
        status: SessionStatus,
        owner_id: Option<&str>,
    ) -> Result<SessionRecord, StoreError> {
        let collection = self.mongo.collection::<Document>(SESSIONS);
        let now = bson::DateTime::from_millis(Utc::now().timestamp_millis());

        let latest = track_store_operation("find_session", async {
            collection
                .find_one(doc! { "room_code": room_code.as_str() })
                .sort(doc! { "createdAt": -1 })
                .await
                .map_err(classify)
        })
        .await?;

        if let Some(document) = latest {
            let stored = session_from_document(&document)?;
            if stored.status.is_active() || status != SessionStatus::Waiting {
                if status <= stored.status {
                    return Ok(stored);
                }
                let id = document.get("_id").cloned().unwrap_or(Bson::Null);
                // Conditional on a lower stored status, so a concurrent
                // later write is never overwritten.
                let filter = doc! { "_id": id.clone(), "status": { "$in": statuses_below(status) } };
                let update = doc! { "$set": { "status": status.as_str(), "updatedAt": now } };
                track_store_operation("update_session", async {
                    collection.update_one(filter, update).await.map_err(classify)
                })
                .await?;

                let current = track_store_operation("find_session", async {
                    collection.find_one(doc! { "_id": id }).await.map_err(classify)
                })
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("session for room {}", room_code)))?;
                return session_from_document(&current);
            }
        }

        let mut document = doc! {
            "room_code": room_code.as_str(),
            "quiz_id": quiz_id,
            "status": status.as_str(),
            "createdAt": now,
            "updatedAt": now,
        };
        if let Some(owner_id) = owner_id {
            document.insert("owner_id", owner_id);
        }

        let inserted = track_store_operation("insert_session", async {
            collection.insert_one(&document).await.map_err(classify)
        })
        .await?;
        document.insert("_id", inserted.inserted_id);

        tracing::info!("Stored session for room {} (quiz {})", room_code, quiz_id);
        session_from_document(&document)
    }

    async fn create_participant(
        &self,
        name: &str,
        session_id: &str,
    ) -> Result<ParticipantId, StoreError> {
        let collection = self.mongo.collection::<Document>(PARTICIPANTS);
        let now = bson::DateTime::from_millis(Utc::now().timestamp_millis());
        let document = doc! {
            "name": name,
            "session_id": session_id,
            "score": 0,
            "answers": {},
            "createdAt": now,
            "updatedAt": now,
        };

        let inserted = track_store_operation("insert_participant", async {
            collection.insert_one(document).await.map_err(classify)
        })
        .await?;

        match inserted.inserted_id {
            Bson::ObjectId(oid) => Ok(oid.to_hex()),
            Bson::String(id) => Ok(id),
            other => Err(malformed("participant id", other)),
        }
    }

    async fn update_participant_score(
        &self,
        participant_id: &str,
        score: u32,
        answers: &AnswerMap,
    ) -> Result<(), StoreError> {
        let collection = self.mongo.collection::<Document>(PARTICIPANTS);
        let update = doc! {
            "$set": {
                "score": i64::from(score),
                "answers": answers_to_document(answers),
                "updatedAt": bson::DateTime::from_millis(Utc::now().timestamp_millis()),
            }
        };

        let result = track_store_operation("update_participant", async {
            collection
                .update_one(id_filter(participant_id), update)
                .await
                .map_err(classify)
        })
        .await?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(format!("participant {}", participant_id)));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.mongo
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
