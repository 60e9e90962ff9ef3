pub mod chat;

// 重新导出常用类型和函数，方便外部使用
pub use chat::{
    api::{AuthSource, ChatApi, StaticAuth},
    inbox::{InboxAggregator, InboxEntry, RoomOpenParams},
    local_store::LocalStore,
    normalize::{normalize_frame, FrameKind, NormalizedMessage},
    session::{ChatSession, SessionConfig, SessionState},
};
