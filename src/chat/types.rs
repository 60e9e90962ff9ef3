//! 数据结构定义：聊天室、消息、商品帖子等服务端 DTO

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// 商品销售状态常量
pub mod sale_status {
    /// 出售中
    pub const ON_SALE: i32 = 0;
    /// 预定中
    pub const RESERVED: i32 = 1;
    /// 已售出
    pub const SOLD: i32 = 2;
}

/// 销售状态的展示文案
pub fn sale_status_text(value: i32) -> &'static str {
    match value {
        sale_status::ON_SALE => "出售中",
        sale_status::RESERVED => "预定中",
        sale_status::SOLD => "已售出",
        _ => "未知状态",
    }
}

/// 聊天参与者（买家 / 卖家）
///
/// 服务端在部分载荷里可能省略昵称或头像，缺失字段使用默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: i64,
    #[serde(default)]
    pub nickname: String,
    /// 头像文件的相对路径（服务端返回），完整 URL 需由 API 层拼接
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

/// 聊天消息（历史接口返回的持久化形态）
///
/// `id` 在同一聊天室内单调递增，作为未读水位线使用
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: i64,
    /// 发送者，系统消息 / 回显消息可能缺失
    #[serde(default)]
    pub sender: Option<ChatUser>,
    #[serde(default)]
    pub content: String,
    /// 服务端时间戳（RFC3339 风格字符串），解析失败按 epoch 0 处理
    #[serde(default)]
    pub sent_at: Option<String>,
}

/// 聊天室
///
/// `status` 只是打开时的快照，做授权判断前必须重新拉取帖子详情
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: i64,
    #[serde(default)]
    pub post_id: i64,
    #[serde(default)]
    pub seller: Option<ChatUser>,
    #[serde(default)]
    pub buyer: Option<ChatUser>,
    #[serde(default)]
    pub status: i32,
}

/// 帖子图片
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostImage {
    #[serde(default)]
    pub image_url: String,
}

/// 商品帖子（详情接口与列表游标接口共用同一形态）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub status: i32,
    /// 发帖人（卖家）
    #[serde(default)]
    pub user: Option<ChatUser>,
    #[serde(default)]
    pub images: Vec<PostImage>,
}

/// 把 sentAt 字符串解析成毫秒时间戳，解析失败返回 0
///
/// 服务端可能返回带时区的 RFC3339，也可能返回不带时区的
/// `yyyy-MM-ddTHH:mm:ss` 形式，两种都要兼容
pub fn sent_at_millis(sent_at: Option<&str>) -> i64 {
    let Some(raw) = sent_at else {
        return 0;
    };
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return dt.timestamp_millis();
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc().timestamp_millis();
    }
    debug!("[Types] 无法解析的 sentAt: {}", raw);
    0
}

/// 通用 HTTP 响应处理：检查状态码后反序列化为目标类型
///
/// 所有 REST 接口共用此方法，非 2xx 一律按错误返回
pub async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<T> {
    let status = response.status();

    // body 只能读取一次，失败时还要用它打日志
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {} 响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {} 请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }

    serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {} 反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sent_at_variants() {
        assert_eq!(
            sent_at_millis(Some("1970-01-01T00:00:01Z")),
            1000,
        );
        // 服务端也会返回不带时区的 LocalDateTime
        assert_eq!(
            sent_at_millis(Some("1970-01-01T00:00:01.5")),
            1500,
        );
        assert_eq!(sent_at_millis(Some("垃圾数据")), 0);
        assert_eq!(sent_at_millis(None), 0);
    }

    #[test]
    fn chat_message_tolerates_missing_fields() {
        let msg: ChatMessage = serde_json::from_str("{}").unwrap();
        assert_eq!(msg.id, 0);
        assert!(msg.sender.is_none());
        assert_eq!(msg.content, "");

        let msg: ChatMessage = serde_json::from_str(
            r#"{"id":42,"sender":{"id":7,"nickname":"买家"},"content":"hi","sentAt":"2024-05-01T12:00:00"}"#,
        )
        .unwrap();
        assert_eq!(msg.id, 42);
        assert_eq!(msg.sender.unwrap().id, 7);
    }

    #[test]
    fn sale_status_text_covers_all() {
        assert_eq!(sale_status_text(sale_status::ON_SALE), "出售中");
        assert_eq!(sale_status_text(sale_status::RESERVED), "预定中");
        assert_eq!(sale_status_text(sale_status::SOLD), "已售出");
        assert_eq!(sale_status_text(99), "未知状态");
    }
}
