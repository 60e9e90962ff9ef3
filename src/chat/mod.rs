//! 聊天模块
//!
//! 二手交易客户端的实时聊天核心：单聊天室会话生命周期与收件箱聚合

pub mod api;
pub mod image;
pub mod inbox;
pub mod listener;
pub mod local_store;
pub mod normalize;
pub mod session;
pub mod types;

// 重新导出主要类型和函数
pub use api::{AuthSource, ChatApi, StaticAuth};
pub use inbox::{InboxAggregator, InboxEntry, RoomOpenParams};
pub use listener::{EmptyInboxListener, EmptySessionListener, InboxListener, SessionListener};
pub use local_store::LocalStore;
pub use normalize::{normalize_frame, FrameKind, NormalizedMessage};
pub use session::{ChatSession, SessionConfig, SessionState};
pub use types::{sale_status, sale_status_text, ChatMessage, ChatRoom, ChatUser, PostDetail};
