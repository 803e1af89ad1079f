pub mod category;
pub mod events;
pub mod grouping;
pub mod identity;
pub mod participant;
pub mod quiz;
pub mod session;

pub use category::{CategoryBreakdown, CategoryScore, Tally, TaxonomyConfig};
pub use events::{ClientMessage, ServerEvent};
pub use grouping::{GroupMember, Grouping, GroupingQuery, RankingBasis};
pub use identity::Identity;
pub use participant::{
    ConnectionId, Participant, ParticipantId, ParticipantResult, ParticipantSummary,
};
pub use quiz::{AnswerMap, OptionIndex, Question, QuestionId, Quiz};
pub use session::{
    CreateRoomRequest, CreateRoomResponse, RoomCode, RoomSnapshot, SessionRecord, SessionStatus,
    ROOM_CODE_LEN,
};
