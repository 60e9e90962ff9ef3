//! REST API 封装
//!
//! 所有请求共用一个 reqwest 客户端；bearer token 与当前用户身份
//! 通过构造时注入的 `AuthSource` 读取，而不是全局变量。

use crate::chat::types::{parse_json_response, ChatMessage, ChatRoom, PostDetail};
use anyhow::{Context, Result};
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// 认证信息来源（只读）
///
/// 会话存储本身不在本 crate 范围内，这里只消费当前 token 与用户 ID
pub trait AuthSource: Send + Sync {
    /// 当前 bearer token，未登录时为 None
    fn token(&self) -> Option<String>;

    /// 当前登录用户 ID
    fn user_id(&self) -> i64;

    /// 是否处于登录态
    fn is_logged_in(&self) -> bool {
        self.token().is_some()
    }
}

/// 固定 token 的认证来源（CLI 与测试用）
pub struct StaticAuth {
    pub token: String,
    pub user_id: i64,
}

impl AuthSource for StaticAuth {
    fn token(&self) -> Option<String> {
        if self.token.is_empty() {
            None
        } else {
            Some(self.token.clone())
        }
    }

    fn user_id(&self) -> i64 {
        self.user_id
    }
}

/// 聊天相关 REST 接口客户端
#[derive(Clone)]
pub struct ChatApi {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthSource>,
}

impl ChatApi {
    /// 创建 API 客户端
    pub fn new(base_url: String, auth: Arc<dyn AuthSource>) -> Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> Arc<dyn AuthSource> {
        self.auth.clone()
    }

    /// 当前登录用户 ID
    pub fn current_user_id(&self) -> i64 {
        self.auth.user_id()
    }

    /// 组装一个请求：拼接 base_url、附加 bearer token 与请求 ID
    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let request_id = Uuid::new_v4().to_string();
        debug!("[HTTP] {} {} (requestID={})", method, url, request_id);

        let mut builder = self.http.request(method, &url).header("X-Request-ID", request_id);
        if let Some(token) = self.auth.token() {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder
    }

    /// 最近 N 条消息，服务端按最新在前返回
    pub async fn recent_messages(&self, room_id: i64, size: usize) -> Result<Vec<ChatMessage>> {
        let resp = self
            .request(
                Method::GET,
                &format!("/api/chatroom/{}/recent?size={}", room_id, size),
            )
            .send()
            .await
            .context("请求聊天记录失败")?;
        parse_json_response(resp, "聊天记录").await
    }

    /// 当前用户参与的聊天室列表
    pub async fn chat_rooms(&self, user_id: i64) -> Result<Vec<ChatRoom>> {
        let resp = self
            .request(Method::GET, &format!("/api/users/{}/chatrooms", user_id))
            .send()
            .await
            .context("请求聊天室列表失败")?;
        parse_json_response(resp, "聊天室列表").await
    }

    /// 帖子详情（包含最新销售状态）
    pub async fn post_detail(&self, post_id: i64) -> Result<PostDetail> {
        let resp = self
            .request(Method::GET, &format!("/api/post/{}", post_id))
            .send()
            .await
            .context("请求帖子详情失败")?;
        parse_json_response(resp, "帖子详情").await
    }

    /// 帖子列表游标接口：id 小于 cursor 的最近若干条
    ///
    /// 收件箱用 `cursor = post_id + 1, size = 1` 反查单个帖子的标题 / 价格 / 首图
    pub async fn posts_before(&self, cursor: i64, size: usize) -> Result<Vec<PostDetail>> {
        let resp = self
            .request(
                Method::GET,
                &format!("/api/posts/before/{}?size={}", cursor, size),
            )
            .send()
            .await
            .context("请求帖子列表失败")?;
        parse_json_response(resp, "帖子列表").await
    }

    /// 更新帖子销售状态（无请求体，状态走查询参数）
    pub async fn update_post_status(&self, post_id: i64, status: i32) -> Result<()> {
        let resp = self
            .request(
                Method::PATCH,
                &format!("/api/post/{}?status={}", post_id, status),
            )
            .send()
            .await
            .context("更新销售状态失败")?;

        let http_status = resp.status();
        if !http_status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "HTTP 错误 {}: {}",
                http_status,
                body
            ));
        }
        info!(
            "[HTTP] ✅ 销售状态已更新: postID={}, status={}",
            post_id, status
        );
        Ok(())
    }

    /// 针对帖子创建（或取回已有）聊天室，买家视角
    pub async fn create_chat_room(&self, post_id: i64) -> Result<ChatRoom> {
        let resp = self
            .request(Method::POST, &format!("/api/post/{}/chatroom", post_id))
            .send()
            .await
            .context("创建聊天室失败")?;
        parse_json_response(resp, "创建聊天室").await
    }

    /// 帖子图片的完整 URL
    pub fn image_url(&self, file: &str) -> String {
        format!("{}/images/{}", self.base_url, file)
    }

    /// 头像的完整 URL（服务端返回值可能自带 /profile/ 前缀，需要剥掉）
    pub fn profile_image_url(&self, raw: &str) -> String {
        format!(
            "{}/images/profile/{}",
            self.base_url,
            raw.replace("/profile/", "")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_auth_login_state() {
        let auth = StaticAuth {
            token: String::new(),
            user_id: 0,
        };
        assert!(!auth.is_logged_in());

        let auth = StaticAuth {
            token: "tok".to_string(),
            user_id: 3,
        };
        assert!(auth.is_logged_in());
        assert_eq!(auth.user_id(), 3);
    }

    #[test]
    fn url_helpers() {
        let api = ChatApi::new(
            "https://hanlumi.co.kr".to_string(),
            Arc::new(StaticAuth {
                token: "tok".to_string(),
                user_id: 1,
            }),
        )
        .unwrap();

        assert_eq!(
            api.image_url("a.png"),
            "https://hanlumi.co.kr/images/a.png"
        );
        // 服务端返回的头像路径自带 /profile/ 前缀
        assert_eq!(
            api.profile_image_url("/profile/u7.png"),
            "https://hanlumi.co.kr/images/profile/u7.png"
        );
    }
}
