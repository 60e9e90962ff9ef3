//! 入站消息归一化
//!
//! 实时通道下发的帧可能是 JSON 对象、裸字符串，偶尔还有其他形态。
//! 这里统一收敛成一个带标签的消息结构，渲染层不再做任何形状判断。
//! 归一化是全函数：任何输入都产出可展示的消息，绝不丢帧、绝不 panic。

use crate::chat::types::{sent_at_millis, ChatMessage, ChatUser};

/// 帧内容分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// 普通文本
    Text,
    /// 图片（data-URI 或以图片扩展名结尾的 URL）
    Image,
    /// 形状不符的兜底帧（原始载荷整体转成字符串展示）
    Unknown,
}

/// 归一化后的消息，历史接口与实时通道共用
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    /// 服务端消息 ID，裸字符串帧没有
    pub id: Option<i64>,
    pub sender: Option<ChatUser>,
    /// 可直接展示的内容字符串（归一化保证非 null，不保证非空）
    pub content: String,
    pub sent_at: Option<String>,
    pub kind: FrameKind,
}

impl NormalizedMessage {
    /// 是否本人发送；sender 缺失视为非本人，但不会出错
    pub fn is_mine(&self, current_user_id: i64) -> bool {
        self.sender
            .as_ref()
            .map(|s| s.id == current_user_id)
            .unwrap_or(false)
    }

    /// 发送时间的毫秒时间戳，无法解析时为 0
    pub fn sent_at_millis(&self) -> i64 {
        sent_at_millis(self.sent_at.as_deref())
    }

    /// 从历史接口的持久化消息转换（id 为 0 视为缺失）
    pub fn from_message(msg: ChatMessage) -> Self {
        let kind = classify_content(&msg.content);
        Self {
            id: if msg.id > 0 { Some(msg.id) } else { None },
            sender: msg.sender,
            content: msg.content,
            sent_at: msg.sent_at,
            kind,
        }
    }
}

/// 内容是否应按图片渲染：data-URI 前缀或已知图片扩展名结尾
pub fn is_image_content(content: &str) -> bool {
    if content.starts_with("data:image") {
        return true;
    }
    let Some(dot) = content.rfind('.') else {
        return false;
    };
    let ext = content[dot + 1..].to_ascii_lowercase();
    matches!(
        ext.as_str(),
        "jpeg" | "jpg" | "gif" | "png" | "bmp" | "webp"
    )
}

fn classify_content(content: &str) -> FrameKind {
    if is_image_content(content) {
        FrameKind::Image
    } else {
        FrameKind::Text
    }
}

/// 把一个入站帧归一化成可展示消息
///
/// 1. 能按 JSON 解析就解析，否则整帧当作 content；
/// 2. JSON 对象缺 content 字段时，把整个对象转成字符串兜底；
/// 3. 按 data-URI 前缀 / 扩展名判断是否图片。
pub fn normalize_frame(raw: &str) -> NormalizedMessage {
    let parsed: Option<serde_json::Value> = serde_json::from_str(raw).ok();

    match parsed {
        Some(serde_json::Value::Object(map)) => {
            let id = map.get("id").and_then(|v| v.as_i64());
            let sender = map
                .get("sender")
                .cloned()
                .and_then(|v| serde_json::from_value::<ChatUser>(v).ok());
            let sent_at = map
                .get("sentAt")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            match map.get("content").and_then(|v| v.as_str()) {
                Some(content) => NormalizedMessage {
                    id,
                    sender,
                    content: content.to_string(),
                    sent_at,
                    kind: classify_content(content),
                },
                // content 缺失或不是字符串：整个对象序列化后展示
                None => {
                    let fallback = serde_json::Value::Object(map).to_string();
                    NormalizedMessage {
                        id,
                        sender,
                        content: fallback,
                        sent_at,
                        kind: FrameKind::Unknown,
                    }
                }
            }
        }
        // JSON 标量（带引号的字符串、数字等）：取其字符串形态
        Some(serde_json::Value::String(s)) => NormalizedMessage {
            id: None,
            sender: None,
            kind: classify_content(&s),
            content: s,
            sent_at: None,
        },
        Some(other) => NormalizedMessage {
            id: None,
            sender: None,
            content: other.to_string(),
            sent_at: None,
            kind: FrameKind::Unknown,
        },
        // 非 JSON：原始载荷就是内容
        None => NormalizedMessage {
            id: None,
            sender: None,
            kind: classify_content(raw),
            content: raw.to_string(),
            sent_at: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_well_formed_frame() {
        let msg = normalize_frame(
            r#"{"id":12,"sender":{"id":3,"nickname":"卖家"},"content":"你好","sentAt":"2024-05-01T10:00:00"}"#,
        );
        assert_eq!(msg.id, Some(12));
        assert_eq!(msg.sender.as_ref().unwrap().id, 3);
        assert_eq!(msg.content, "你好");
        assert_eq!(msg.kind, FrameKind::Text);
        assert!(msg.is_mine(3));
        assert!(!msg.is_mine(4));
    }

    #[test]
    fn normalize_raw_string_frame() {
        // 裸字符串（非 JSON）整帧当作内容
        let msg = normalize_frame("hello");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.kind, FrameKind::Text);
        assert!(msg.id.is_none());
        assert!(!msg.is_mine(1));
    }

    #[test]
    fn normalize_object_without_content() {
        let msg = normalize_frame(r#"{"id":5,"foo":"bar"}"#);
        assert_eq!(msg.id, Some(5));
        assert_eq!(msg.kind, FrameKind::Unknown);
        // 兜底内容必须非空可展示
        assert!(msg.content.contains("bar"));
    }

    #[test]
    fn normalize_never_fails_on_garbage() {
        for raw in ["", "{", "null", "[1,2,3]", "123", "\"\"", "data:image/png;base64,AAAA"] {
            let msg = normalize_frame(raw);
            // content 永远是可展示字符串，分类总能落在三个标签之一
            assert!(matches!(
                msg.kind,
                FrameKind::Text | FrameKind::Image | FrameKind::Unknown
            ));
            let _ = msg.content;
        }
    }

    #[test]
    fn image_classification() {
        assert!(is_image_content("data:image/jpeg;base64,xxxx"));
        assert!(is_image_content("https://hanlumi.co.kr/images/a.PNG"));
        assert!(is_image_content("photo.webp"));
        assert!(!is_image_content("报价是 3.5 万"));
        assert!(!is_image_content("纯文本"));
        assert_eq!(
            normalize_frame(r#"{"content":"data:image/png;base64,AAAA"}"#).kind,
            FrameKind::Image
        );
    }

    #[test]
    fn from_message_keeps_watermark_id() {
        let msg = NormalizedMessage::from_message(ChatMessage {
            id: 42,
            sender: None,
            content: "a.jpg".to_string(),
            sent_at: Some("2024-05-01T10:00:00".to_string()),
        });
        assert_eq!(msg.id, Some(42));
        assert_eq!(msg.kind, FrameKind::Image);
        assert!(msg.sent_at_millis() > 0);
    }
}
