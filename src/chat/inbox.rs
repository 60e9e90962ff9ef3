//! 收件箱聚合
//!
//! 产出聊天列表页需要的：按最近消息排序、过滤本地隐藏、标注未读的聊天室列表。
//! 每个聊天室的最近消息与商品信息并发独立拉取，单个失败只降级该聊天室的展示。

use crate::chat::api::ChatApi;
use crate::chat::listener::{EmptyInboxListener, InboxListener};
use crate::chat::local_store::LocalStore;
use crate::chat::normalize::is_image_content;
use crate::chat::session::SessionConfig;
use crate::chat::types::{sent_at_millis, ChatMessage, ChatRoom, ChatUser};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// 充实完成（或降级）的单个聊天室
#[derive(Debug, Clone)]
pub struct EnrichedRoom {
    pub room: ChatRoom,
    pub last_message: Option<ChatMessage>,
    pub product_title: String,
    pub product_price: String,
    pub product_image: String,
}

/// 收件箱条目
#[derive(Debug, Clone)]
pub struct InboxEntry {
    pub room: ChatRoom,
    pub last_message: Option<ChatMessage>,
    pub product_title: String,
    pub product_price: String,
    pub product_image: String,
    /// 聊天对方（本人是卖家则为买家，反之亦然）
    pub partner: Option<ChatUser>,
    /// 对方头像完整 URL，缺失时为空串
    pub partner_profile_image: String,
    pub unread: bool,
    /// 是否在本地隐藏列表中（只有开启"显示隐藏"时才会出现在结果里）
    pub hidden: bool,
}

impl InboxEntry {
    /// 列表页的最近消息摘要
    pub fn preview(&self) -> String {
        match &self.last_message {
            Some(msg) if is_likely_image_uri(&msg.content) => "[图片]".to_string(),
            Some(msg) => msg.content.clone(),
            None => "新的聊天室".to_string(),
        }
    }
}

/// 打开聊天室所需的参数（导航载荷）
#[derive(Debug, Clone)]
pub struct RoomOpenParams {
    pub room_id: i64,
    pub post_id: i64,
    pub seller_id: i64,
    pub buyer_id: i64,
    pub partner_nickname: String,
    pub product_title: String,
    pub product_price: String,
    pub product_image: String,
    /// 销售状态快照，仅作展示初值
    pub sale_status_hint: i32,
}

impl RoomOpenParams {
    /// 转成会话配置
    pub fn session_config(&self, ws_base_url: &str) -> SessionConfig {
        let mut cfg = SessionConfig::new(self.room_id, self.post_id, self.seller_id, self.buyer_id);
        cfg.partner_nickname = self.partner_nickname.clone();
        cfg.sale_status_hint = self.sale_status_hint;
        cfg.ws_base_url = ws_base_url.to_string();
        cfg
    }
}

/// 消息内容是否应当按图片摘要展示
fn is_likely_image_uri(content: &str) -> bool {
    content.starts_with("file://")
        || content.starts_with("content://")
        || is_image_content(content)
}

/// 聊天对方：本人是卖家时取买家，否则取卖家
fn partner_of(room: &ChatRoom, current_user_id: i64) -> Option<ChatUser> {
    let is_seller = room
        .seller
        .as_ref()
        .map(|s| s.id == current_user_id)
        .unwrap_or(false);
    if is_seller {
        room.buyer.clone()
    } else {
        room.seller.clone()
    }
}

/// 把充实结果组装成最终条目：过滤隐藏、计算未读、按最近消息排序
///
/// 排序必须等所有充实结果尘埃落定后进行；没有消息的聊天室按 epoch 0 沉底
fn assemble_entries(
    enriched: Vec<EnrichedRoom>,
    hidden: &[i64],
    show_hidden: bool,
    last_seen: &HashMap<String, i64>,
    current_user_id: i64,
) -> Vec<InboxEntry> {
    let mut entries: Vec<InboxEntry> = enriched
        .into_iter()
        .map(|er| {
            let is_hidden = hidden.contains(&er.room.id);
            let watermark = last_seen
                .get(&er.room.id.to_string())
                .copied()
                .unwrap_or(0);
            let unread = er
                .last_message
                .as_ref()
                .map(|m| m.id > watermark)
                .unwrap_or(false);
            let partner = partner_of(&er.room, current_user_id);
            InboxEntry {
                room: er.room,
                last_message: er.last_message,
                product_title: er.product_title,
                product_price: er.product_price,
                product_image: er.product_image,
                partner,
                partner_profile_image: String::new(),
                unread,
                hidden: is_hidden,
            }
        })
        .filter(|e| show_hidden || !e.hidden)
        .collect();

    entries.sort_by_key(|e| {
        std::cmp::Reverse(
            e.last_message
                .as_ref()
                .map(|m| sent_at_millis(m.sent_at.as_deref()))
                .unwrap_or(0),
        )
    });
    entries
}

/// 收件箱聚合器
pub struct InboxAggregator {
    api: ChatApi,
    store: Arc<LocalStore>,
    listener: Arc<dyn InboxListener>,
}

impl InboxAggregator {
    pub fn new(api: ChatApi, store: Arc<LocalStore>) -> Self {
        Self {
            api,
            store,
            listener: Arc::new(EmptyInboxListener),
        }
    }

    /// 注册收件箱监听器
    pub fn set_listener(&mut self, listener: Arc<dyn InboxListener>) {
        self.listener = listener;
    }

    /// 刷新收件箱
    pub async fn refresh(&self) -> Result<Vec<InboxEntry>> {
        if !self.api.auth().is_logged_in() {
            return Err(anyhow::anyhow!("未登录，无法加载聊天列表"));
        }
        self.listener.on_refresh_started().await;

        let user_id = self.api.current_user_id();
        let rooms = match self.api.chat_rooms(user_id).await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!("[Inbox] ❌ 聊天室列表加载失败: {}", e);
                self.listener
                    .on_toast("聊天列表加载失败".to_string())
                    .await;
                self.listener.on_refresh_finished(0).await;
                return Err(e);
            }
        };

        // 每个聊天室的充实请求彼此独立，单个失败不影响其他聊天室
        let tasks = rooms.into_iter().map(|room| self.enrich_room(room));
        let enriched = futures_util::future::join_all(tasks).await;

        let hidden = self.store.hidden_rooms().await.unwrap_or_else(|e| {
            warn!("[Inbox] 隐藏列表读取失败，按空处理: {}", e);
            Vec::new()
        });
        let show_hidden = self.store.show_hidden().await.unwrap_or(false);
        let last_seen = self.store.last_seen_map().await.unwrap_or_else(|e| {
            warn!("[Inbox] 水位线映射读取失败，按空处理: {}", e);
            HashMap::new()
        });

        let mut entries = assemble_entries(enriched, &hidden, show_hidden, &last_seen, user_id);
        for entry in &mut entries {
            let raw = entry
                .partner
                .as_ref()
                .and_then(|p| p.profile_image_url.clone());
            if let Some(raw) = raw {
                entry.partner_profile_image = self.api.profile_image_url(&raw);
            }
        }

        info!(
            "[Inbox] ✅ 刷新完成: 可见聊天室 {} 个 (showHidden={})",
            entries.len(),
            show_hidden
        );
        self.listener.on_refresh_finished(entries.len()).await;
        Ok(entries)
    }

    /// 充实单个聊天室：最近一条消息 + 商品标题 / 价格 / 首图
    ///
    /// 永远不返回错误；任何子请求失败都只留空对应字段
    async fn enrich_room(&self, room: ChatRoom) -> EnrichedRoom {
        let last_message = match self.api.recent_messages(room.id, 1).await {
            Ok(mut msgs) => {
                if msgs.is_empty() {
                    None
                } else {
                    Some(msgs.remove(0))
                }
            }
            Err(e) => {
                warn!(
                    "[Inbox] 最近消息获取失败: roomID={}, {}",
                    room.id, e
                );
                None
            }
        };

        let mut product_title = String::new();
        let mut product_price = String::new();
        let mut product_image = String::new();
        // 游标接口：id 小于 post_id + 1 的最近 1 条就是该帖子本身
        match self.api.posts_before(room.post_id + 1, 1).await {
            Ok(posts) => {
                if let Some(post) = posts.into_iter().next() {
                    product_title = post.title;
                    if post.price > 0 {
                        product_price = post.price.to_string();
                    }
                    if let Some(first) = post.images.first() {
                        product_image = self.api.image_url(&first.image_url);
                    }
                }
            }
            Err(e) => {
                warn!(
                    "[Inbox] 帖子信息获取失败: postID={}, {}",
                    room.post_id, e
                );
            }
        }

        EnrichedRoom {
            room,
            last_message,
            product_title,
            product_price,
            product_image,
        }
    }

    /// 打开聊天室
    ///
    /// 导航之前先把已读水位线落盘：立刻返回列表时这条消息不会再亮未读角标
    pub async fn open_room(&self, entry: &InboxEntry) -> Result<RoomOpenParams> {
        if let Some(last) = &entry.last_message {
            if last.id > 0 {
                self.store.note_last_seen(entry.room.id, last.id).await?;
            }
        }

        Ok(RoomOpenParams {
            room_id: entry.room.id,
            post_id: entry.room.post_id,
            seller_id: entry.room.seller.as_ref().map(|u| u.id).unwrap_or(0),
            buyer_id: entry.room.buyer.as_ref().map(|u| u.id).unwrap_or(0),
            partner_nickname: entry
                .partner
                .as_ref()
                .map(|p| p.nickname.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "对方".to_string()),
            product_title: entry.product_title.clone(),
            product_price: entry.product_price.clone(),
            product_image: entry.product_image.clone(),
            sale_status_hint: entry.room.status,
        })
    }

    /// 从商品详情页发起聊天：创建（或取回）聊天室并给出导航参数
    pub async fn open_room_for_post(&self, post_id: i64) -> Result<RoomOpenParams> {
        let post = self.api.post_detail(post_id).await?;
        let room = self.api.create_chat_room(post_id).await?;
        info!(
            "[Inbox] 💬 针对帖子发起聊天: postID={}, roomID={}",
            post_id, room.id
        );

        Ok(RoomOpenParams {
            room_id: room.id,
            post_id,
            seller_id: post.user.as_ref().map(|u| u.id).unwrap_or(0),
            buyer_id: self.api.current_user_id(),
            partner_nickname: post
                .user
                .as_ref()
                .map(|u| u.nickname.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "对方".to_string()),
            product_title: post.title,
            product_price: if post.price > 0 {
                post.price.to_string()
            } else {
                String::new()
            },
            product_image: post
                .images
                .first()
                .map(|i| self.api.image_url(&i.image_url))
                .unwrap_or_default(),
            sale_status_hint: post.status,
        })
    }

    /// 切换"显示隐藏聊天室"开关，返回新值
    pub async fn toggle_show_hidden(&self) -> Result<bool> {
        let next = !self.store.show_hidden().await?;
        self.store.set_show_hidden(next).await?;
        self.listener
            .on_toast(
                if next {
                    "显示已隐藏的聊天室"
                } else {
                    "继续隐藏聊天室"
                }
                .to_string(),
            )
            .await;
        Ok(next)
    }

    /// 把聊天室移出本地隐藏列表
    pub async fn unhide_room(&self, room_id: i64) -> Result<()> {
        self.store.unhide_room(room_id).await
    }
}
