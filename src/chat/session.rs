//! 单个聊天室的会话生命周期
//!
//! 职责：加载历史消息、维持一条实时连接、把两路消息合并成有序列表、
//! 发送文本 / 图片，以及两项依赖销售状态的旁路操作（变更状态、评价门槛）。
//!
//! 生命周期：`Idle -> LoadingHistory -> Live -> Closed`；
//! 实时连接中途掉线时进入 `Reconnecting`，由调用方在合适的时机重建会话。
//! 历史加载失败只弹提示，不阻塞实时连接。

use crate::chat::api::ChatApi;
use crate::chat::image::encode_image_data_uri;
use crate::chat::listener::{EmptySessionListener, SessionListener};
use crate::chat::local_store::LocalStore;
use crate::chat::normalize::{normalize_frame, NormalizedMessage};
use crate::chat::types::{sale_status, sale_status_text};
use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LoadingHistory,
    Live,
    Reconnecting,
    Closed,
}

/// 会话配置
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// 聊天室 ID
    pub room_id: i64,
    /// 关联的帖子 ID
    pub post_id: i64,
    /// 卖家用户 ID
    pub seller_id: i64,
    /// 买家用户 ID
    pub buyer_id: i64,
    /// 对方昵称（展示用）
    pub partner_nickname: String,
    /// 打开聊天室时携带的销售状态快照，仅作展示初值，不作为授权依据
    pub sale_status_hint: i32,
    /// WebSocket 服务器基础地址
    pub ws_base_url: String,
    /// 历史消息页大小
    pub history_size: usize,
}

impl SessionConfig {
    /// 创建默认配置
    pub fn new(room_id: i64, post_id: i64, seller_id: i64, buyer_id: i64) -> Self {
        Self {
            room_id,
            post_id,
            seller_id,
            buyer_id,
            partner_nickname: String::new(),
            sale_status_hint: sale_status::ON_SALE,
            ws_base_url: "wss://hanlumi.co.kr".to_string(),
            history_size: 100,
        }
    }
}

/// 聊天会话
pub struct ChatSession {
    config: SessionConfig,
    api: ChatApi,
    store: Arc<LocalStore>,
    /// 实时连接写入端；None 表示当前没有打开的连接
    writer: Option<Arc<Mutex<WsWriter>>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
    /// 合并后的消息列表，按消息 ID 升序
    messages: Arc<StdMutex<Vec<NormalizedMessage>>>,
    /// 已合并的消息 ID，历史与实时两路去重
    seen_ids: Arc<StdMutex<HashSet<i64>>>,
    state: Arc<StdMutex<SessionState>>,
    /// 销售状态展示缓存，授权判断永远走 refresh
    sale_status: Arc<StdMutex<i32>>,
    listener: Arc<dyn SessionListener>,
}

/// 把一条消息合并进有序列表
///
/// 有 ID 的消息按 ID 升序插入、重复 ID 丢弃；
/// 无 ID 的帧（裸字符串）按到达顺序追加在末尾。
/// 返回是否真正插入。
fn merge_message(
    list: &mut Vec<NormalizedMessage>,
    seen: &mut HashSet<i64>,
    msg: NormalizedMessage,
) -> bool {
    match msg.id {
        Some(id) => {
            if !seen.insert(id) {
                debug!("[Session] 重复消息已忽略: msgID={}", id);
                return false;
            }
            let mut idx = list.len();
            while idx > 0 {
                match list[idx - 1].id {
                    Some(prev) if prev > id => idx -= 1,
                    _ => break,
                }
            }
            list.insert(idx, msg);
            true
        }
        None => {
            list.push(msg);
            true
        }
    }
}

/// 评价门槛：只有已售出的商品、且评价人是该聊天室的买家或卖家
fn review_allowed(post_status: i32, user_id: i64, seller_id: i64, buyer_id: i64) -> bool {
    post_status == sale_status::SOLD && (user_id == seller_id || user_id == buyer_id)
}

impl ChatSession {
    /// 创建会话（未连接）
    pub fn new(config: SessionConfig, api: ChatApi, store: Arc<LocalStore>) -> Self {
        let sale_status_hint = config.sale_status_hint;
        Self {
            config,
            api,
            store,
            writer: None,
            reader_task: None,
            messages: Arc::new(StdMutex::new(Vec::new())),
            seen_ids: Arc::new(StdMutex::new(HashSet::new())),
            state: Arc::new(StdMutex::new(SessionState::Idle)),
            sale_status: Arc::new(StdMutex::new(sale_status_hint)),
            listener: Arc::new(EmptySessionListener),
        }
    }

    /// 注册会话监听器
    pub fn set_listener(&mut self, listener: Arc<dyn SessionListener>) {
        self.listener = listener;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// 当前消息列表快照（按消息 ID 升序）
    pub fn messages(&self) -> Vec<NormalizedMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// 销售状态展示缓存
    pub fn sale_status(&self) -> i32 {
        *self.sale_status.lock().unwrap()
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap() = next;
    }

    /// 打开会话：先加载历史，再建立实时连接
    ///
    /// 历史加载失败只弹提示并继续连接；连接失败向上返回错误
    pub async fn open(&mut self) -> Result<()> {
        if !self.api.auth().is_logged_in() {
            return Err(anyhow::anyhow!("未登录，无法进入聊天室"));
        }

        self.set_state(SessionState::LoadingHistory);
        match self.load_history().await {
            Ok(history) => {
                let count = history.len();
                {
                    let mut list = self.messages.lock().unwrap();
                    let mut seen = self.seen_ids.lock().unwrap();
                    for msg in history {
                        merge_message(&mut list, &mut seen, msg);
                    }
                }
                info!(
                    "[Session] 📥 历史消息加载完成: roomID={}, count={}",
                    self.config.room_id, count
                );
                self.listener.on_history_loaded(count).await;
            }
            Err(e) => {
                warn!("[Session] ⚠️ 历史消息加载失败: {}", e);
                self.listener
                    .on_toast("聊天记录加载失败".to_string())
                    .await;
            }
        }

        self.connect_live().await
    }

    /// 拉取最近的历史消息并转成升序的归一化消息
    async fn load_history(&self) -> Result<Vec<NormalizedMessage>> {
        let mut msgs = self
            .api
            .recent_messages(self.config.room_id, self.config.history_size)
            .await?;
        // 服务端按最新在前返回，展示要按时间升序
        msgs.reverse();
        Ok(msgs.into_iter().map(NormalizedMessage::from_message).collect())
    }

    /// 建立实时连接并启动读取任务
    ///
    /// 每个会话同时只允许一条连接；重复调用直接返回
    async fn connect_live(&mut self) -> Result<()> {
        if self.writer.is_some() {
            debug!("[Session] 连接已存在，忽略重复连接");
            return Ok(());
        }

        let token = self
            .api
            .auth()
            .token()
            .ok_or_else(|| anyhow::anyhow!("缺少 token"))?;
        let url = format!("{}/ws/chat/{}", self.config.ws_base_url, self.config.room_id);
        info!("[Session] 🔗 连接聊天室: {}", url);

        // token 在握手阶段以 bearer 头携带
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", token)).context("无效的 token")?,
        );

        let (ws_stream, response) = connect_async(request)
            .await
            .context("建立实时连接失败")?;
        info!("[Session] ✅ 实时连接成功, 状态: {}", response.status());

        let (write, read) = ws_stream.split();
        self.writer = Some(Arc::new(Mutex::new(write)));
        self.set_state(SessionState::Live);

        {
            let listener = self.listener.clone();
            tokio::spawn(async move {
                listener
                    .on_connection_status_changed(true, "连接成功".to_string())
                    .await;
            });
        }

        let messages = self.messages.clone();
        let seen_ids = self.seen_ids.clone();
        let state = self.state.clone();
        let listener = self.listener.clone();
        let room_id = self.config.room_id;
        self.reader_task = Some(tokio::spawn(async move {
            handle_frames(read, messages, seen_ids, state, listener, room_id).await;
        }));

        Ok(())
    }

    /// 发送文本消息
    ///
    /// 空白消息或连接未建立时静默忽略；发送后不做本地乐观插入，
    /// 消息要等服务端经实时通道回显才会出现在列表里
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!("[Session] 空消息，忽略发送");
            return Ok(());
        }
        let Some(writer) = &self.writer else {
            debug!("[Session] 连接未建立，忽略发送");
            return Ok(());
        };

        let mut w = writer.lock().await;
        if let Err(e) = w.send(WsMessage::Text(trimmed.to_string())).await {
            // 发送失败等同于连接掉线，只记录不上抛
            warn!("[Session] ⚠️ 消息发送失败: {}", e);
        }
        Ok(())
    }

    /// 发送图片消息（编码成单个 data-URI 字符串帧）
    ///
    /// 编码失败时报告错误且不发送任何内容
    pub async fn send_image(&self, path: &Path) -> Result<()> {
        let Some(writer) = &self.writer else {
            debug!("[Session] 连接未建立，忽略图片发送");
            return Ok(());
        };

        let data_uri = match encode_image_data_uri(path).await {
            Ok(uri) => uri,
            Err(e) => {
                error!("[Session] ❌ 图片编码失败: {}", e);
                self.listener.on_toast("图片发送失败".to_string()).await;
                return Err(e);
            }
        };

        info!(
            "[Session] 🖼️ 发送图片: roomID={}, {} 字节",
            self.config.room_id,
            data_uri.len()
        );
        let mut w = writer.lock().await;
        if let Err(e) = w.send(WsMessage::Text(data_uri)).await {
            warn!("[Session] ⚠️ 图片发送失败: {}", e);
        }
        Ok(())
    }

    /// 重新拉取帖子的最新销售状态
    ///
    /// 打开聊天室时携带的状态可能已被其他设备改掉，任何
    /// 依赖状态的动作之前都要走这里拿新值
    pub async fn refresh_sale_status(&self) -> Result<i32> {
        match self.api.post_detail(self.config.post_id).await {
            Ok(post) => {
                *self.sale_status.lock().unwrap() = post.status;
                debug!(
                    "[Session] 销售状态已刷新: postID={}, status={}",
                    self.config.post_id, post.status
                );
                Ok(post.status)
            }
            Err(e) => {
                warn!("[Session] 销售状态刷新失败: {}", e);
                self.listener
                    .on_toast("无法获取销售状态".to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// 变更帖子的销售状态
    ///
    /// 成功后更新展示缓存并提示；失败时缓存不动，界面继续显示旧状态
    pub async fn change_sale_status(&self, status: i32) -> Result<()> {
        match self.api.update_post_status(self.config.post_id, status).await {
            Ok(()) => {
                *self.sale_status.lock().unwrap() = status;
                self.listener.on_sale_status_changed(status).await;
                self.listener
                    .on_toast(format!(
                        "销售状态已变更为 \"{}\"",
                        sale_status_text(status)
                    ))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.listener
                    .on_toast("销售状态变更失败".to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// 是否允许写评价
    ///
    /// 以刚拉取的帖子状态为准：已售出且本人是买卖双方之一才放行，
    /// 不满足时在发起任何评价请求之前就拦截
    pub async fn can_write_review(&self) -> Result<bool> {
        let post = match self.api.post_detail(self.config.post_id).await {
            Ok(p) => p,
            Err(e) => {
                self.listener
                    .on_toast("无法确认销售状态".to_string())
                    .await;
                return Err(e);
            }
        };
        *self.sale_status.lock().unwrap() = post.status;

        let allowed = review_allowed(
            post.status,
            self.api.current_user_id(),
            self.config.seller_id,
            self.config.buyer_id,
        );
        if !allowed && post.status != sale_status::SOLD {
            self.listener
                .on_toast("只有已售出的商品才能写评价".to_string())
                .await;
        }
        Ok(allowed)
    }

    /// 评价对象：聊天室里的另一方
    pub fn review_target(&self) -> i64 {
        if self.api.current_user_id() == self.config.seller_id {
            self.config.buyer_id
        } else {
            self.config.seller_id
        }
    }

    /// 退出聊天室：只在本地隐藏，服务端不感知
    pub async fn leave_room(&self) -> Result<()> {
        self.store.hide_room(self.config.room_id).await?;
        self.listener.on_toast("已退出聊天室".to_string()).await;
        Ok(())
    }

    /// 关闭会话，释放实时连接
    ///
    /// 幂等：对已关闭或从未打开的会话调用不会出错
    pub async fn close(&mut self) {
        self.set_state(SessionState::Closed);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(writer) = self.writer.take() {
            let mut w = writer.lock().await;
            // 对端可能已经断开，Close 帧发不出去也无妨
            let _ = w.send(WsMessage::Close(None)).await;
        }
        debug!("[Session] 会话已关闭: roomID={}", self.config.room_id);
    }
}

/// 实时通道读取循环
///
/// 每个入站文本帧都经过归一化，绝不因为形状问题丢帧；
/// 流结束后把 Live 会话置为 Reconnecting，重建由调用方负责
async fn handle_frames(
    mut read: WsReader,
    messages: Arc<StdMutex<Vec<NormalizedMessage>>>,
    seen_ids: Arc<StdMutex<HashSet<i64>>>,
    state: Arc<StdMutex<SessionState>>,
    listener: Arc<dyn SessionListener>,
    room_id: i64,
) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let msg = normalize_frame(&text);
                let inserted = {
                    let mut list = messages.lock().unwrap();
                    let mut seen = seen_ids.lock().unwrap();
                    merge_message(&mut list, &mut seen, msg.clone())
                };
                if inserted {
                    listener.on_new_message(msg).await;
                }
            }
            Ok(WsMessage::Binary(data)) => {
                debug!("[Session] 忽略二进制帧: {} 字节", data.len());
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(frame)) => {
                warn!("[Session] 👋 连接关闭: {:?}", frame);
                break;
            }
            Err(e) => {
                error!("[Session] 实时连接错误: {}", e);
                break;
            }
            _ => {}
        }
    }

    let dropped = {
        let mut st = state.lock().unwrap();
        if *st == SessionState::Live {
            *st = SessionState::Reconnecting;
            true
        } else {
            false
        }
    };
    if dropped {
        listener
            .on_connection_status_changed(false, "连接断开".to_string())
            .await;
    }
    debug!("[Session] 读取任务退出: roomID={}", room_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::api::StaticAuth;
    use crate::chat::normalize::FrameKind;

    fn text_msg(id: Option<i64>, content: &str) -> NormalizedMessage {
        NormalizedMessage {
            id,
            sender: None,
            content: content.to_string(),
            sent_at: None,
            kind: FrameKind::Text,
        }
    }

    fn ids(list: &[NormalizedMessage]) -> Vec<Option<i64>> {
        list.iter().map(|m| m.id).collect()
    }

    async fn test_session() -> ChatSession {
        let api = ChatApi::new(
            "http://localhost:8080".to_string(),
            Arc::new(StaticAuth {
                token: "test-token".to_string(),
                user_id: 10,
            }),
        )
        .unwrap();
        let store = Arc::new(LocalStore::new("sqlite::memory:").await.unwrap());
        ChatSession::new(SessionConfig::new(1, 2, 10, 20), api, store)
    }

    #[test]
    fn merge_keeps_ascending_order_and_dedupes() {
        let mut list = Vec::new();
        let mut seen = HashSet::new();

        // 历史（升序）之后实时到达，含一条重复
        for id in [1, 2, 3] {
            assert!(merge_message(&mut list, &mut seen, text_msg(Some(id), "h")));
        }
        assert!(!merge_message(&mut list, &mut seen, text_msg(Some(3), "dup")));
        assert!(merge_message(&mut list, &mut seen, text_msg(Some(4), "l")));

        assert_eq!(ids(&list), vec![Some(1), Some(2), Some(3), Some(4)]);
    }

    #[test]
    fn merge_tolerates_live_before_history() {
        let mut list = Vec::new();
        let mut seen = HashSet::new();

        // 历史还在加载时实时消息先到
        merge_message(&mut list, &mut seen, text_msg(Some(5), "live"));
        for id in [1, 2, 3, 4] {
            merge_message(&mut list, &mut seen, text_msg(Some(id), "hist"));
        }
        // 历史里也带了同一条 5
        merge_message(&mut list, &mut seen, text_msg(Some(5), "hist-dup"));

        assert_eq!(
            ids(&list),
            vec![Some(1), Some(2), Some(3), Some(4), Some(5)]
        );
        assert_eq!(list[4].content, "live");
    }

    #[test]
    fn merge_appends_idless_frames_in_arrival_order() {
        let mut list = Vec::new();
        let mut seen = HashSet::new();

        merge_message(&mut list, &mut seen, text_msg(Some(1), "a"));
        merge_message(&mut list, &mut seen, text_msg(None, "raw-1"));
        merge_message(&mut list, &mut seen, text_msg(None, "raw-2"));
        merge_message(&mut list, &mut seen, text_msg(Some(2), "b"));

        assert_eq!(ids(&list), vec![Some(1), None, None, Some(2)]);
        assert_eq!(list[1].content, "raw-1");
        assert_eq!(list[2].content, "raw-2");
    }

    #[test]
    fn review_gating_matrix() {
        let (seller, buyer, outsider) = (10, 20, 30);

        // 未售出一律拒绝
        assert!(!review_allowed(sale_status::ON_SALE, seller, seller, buyer));
        assert!(!review_allowed(sale_status::RESERVED, buyer, seller, buyer));

        // 已售出且是参与者才放行
        assert!(review_allowed(sale_status::SOLD, seller, seller, buyer));
        assert!(review_allowed(sale_status::SOLD, buyer, seller, buyer));
        assert!(!review_allowed(sale_status::SOLD, outsider, seller, buyer));
    }

    #[tokio::test]
    async fn send_without_connection_is_silent_noop() {
        let session = test_session().await;
        assert_eq!(session.state(), SessionState::Idle);

        // 没有连接：不发帧也不报错
        session.send_text("hi").await.unwrap();
        // 空白消息同样静默
        session.send_text("   ").await.unwrap();
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut session = test_session().await;
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn review_target_is_the_other_party() {
        // 当前用户 10 是卖家，评价对象是买家 20
        let session = test_session().await;
        assert_eq!(session.review_target(), 20);
    }

    #[tokio::test]
    #[ignore]
    async fn run_chat_session_against_live_server() -> anyhow::Result<()> {
        use std::sync::Once;
        static INIT_LOGGER: Once = Once::new();
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;
            let filter_layer = EnvFilter::new("info,hanlumi_chat_core=debug");
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        });

        // 需要本地起一套后端并填入真实 token / 用户
        let api = ChatApi::new(
            "http://localhost:8080".to_string(),
            Arc::new(StaticAuth {
                token: std::env::var("HANLUMI_TOKEN").unwrap_or_default(),
                user_id: 1,
            }),
        )?;
        let store = Arc::new(LocalStore::new("sqlite://test_session.db?mode=rwc").await?);
        let mut config = SessionConfig::new(1, 1, 1, 2);
        config.ws_base_url = "ws://localhost:8080".to_string();

        let mut session = ChatSession::new(config, api, store);
        session.open().await?;
        session.send_text("来自 Rust 客户端的测试消息").await?;
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        info!("📋 当前消息数: {}", session.messages().len());
        session.close().await;
        Ok(())
    }
}
