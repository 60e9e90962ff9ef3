//! 回调接口：聊天会话与收件箱的事件监听器

use crate::chat::normalize::NormalizedMessage;
use async_trait::async_trait;

/// 聊天会话监听器
#[async_trait]
pub trait SessionListener: Send + Sync {
    /// 实时连接状态变更
    async fn on_connection_status_changed(&self, connected: bool, detail: String);

    /// 收到新消息（历史与实时合并去重之后）
    async fn on_new_message(&self, message: NormalizedMessage);

    /// 历史消息加载完成
    async fn on_history_loaded(&self, count: usize);

    /// 销售状态变更成功
    async fn on_sale_status_changed(&self, status: i32);

    /// 需要向用户弹出的非阻塞提示
    async fn on_toast(&self, text: String);
}

/// 空实现（默认监听器）
pub struct EmptySessionListener;

#[async_trait]
impl SessionListener for EmptySessionListener {
    async fn on_connection_status_changed(&self, _connected: bool, _detail: String) {}
    async fn on_new_message(&self, _message: NormalizedMessage) {}
    async fn on_history_loaded(&self, _count: usize) {}
    async fn on_sale_status_changed(&self, _status: i32) {}
    async fn on_toast(&self, _text: String) {}
}

/// 收件箱监听器
#[async_trait]
pub trait InboxListener: Send + Sync {
    /// 一次刷新开始
    async fn on_refresh_started(&self);

    /// 一次刷新完成，携带可见聊天室数量
    async fn on_refresh_finished(&self, visible_count: usize);

    /// 需要向用户弹出的非阻塞提示
    async fn on_toast(&self, text: String);
}

/// 空实现（默认监听器）
pub struct EmptyInboxListener;

#[async_trait]
impl InboxListener for EmptyInboxListener {
    async fn on_refresh_started(&self) {}
    async fn on_refresh_finished(&self, _visible_count: usize) {}
    async fn on_toast(&self, _text: String) {}
}
