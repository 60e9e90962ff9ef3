//! 设备本地持久化状态（SQLite / sqlx）
//!
//! 存放三份纯本地数据：隐藏聊天室列表、已读水位线映射、"显示隐藏聊天室"开关。
//! 这些数据只属于设备本身，永远不会与服务端合并，也没有服务端备份；
//! 整份文档按 JSON 字符串落在一张 key-value 表里。

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::collections::HashMap;
use tracing::{debug, warn};

/// 隐藏聊天室列表（JSON 数组，聊天室 ID）
pub const HIDDEN_ROOMS_KEY: &str = "HIDDEN_CHATROOMS";
/// 已读水位线映射（JSON 对象，聊天室 ID 字符串 -> 最后已读消息 ID）
pub const LAST_SEEN_KEY: &str = "CHAT_LAST_SEEN_MAP";
/// 收件箱是否显示隐藏聊天室（"true" / "false"）
pub const SHOW_HIDDEN_KEY: &str = "SHOW_HIDDEN_CHATROOMS";

/// 本地 key-value 存储
///
/// 连接数固定为 1：整份文档的读-改-写在同一连接上串行执行，
/// 并发任务之间不会互相覆盖彼此的无关键。
pub struct LocalStore {
    pool: Pool<Sqlite>,
}

impl LocalStore {
    /// 打开（或创建）本地存储
    ///
    /// `db_url` 形如 `sqlite://hanlumi-local.db?mode=rwc`
    pub async fn new(db_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(db_url)
            .await
            .context(format!("打开本地存储失败: {}", db_url))?;
        let store = Self { pool };
        store.ensure_table().await?;
        Ok(store)
    }

    async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS local_kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 读取原始字符串值
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM local_kv WHERE key = ? LIMIT 1;")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("value").unwrap_or_default()))
    }

    /// 写入原始字符串值
    pub async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO local_kv (key, value) VALUES (?, ?);")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===================== 隐藏聊天室 =====================

    /// 读取隐藏聊天室 ID 列表，内容损坏时按空列表处理
    pub async fn hidden_rooms(&self) -> Result<Vec<i64>> {
        let raw = self.get_raw(HIDDEN_ROOMS_KEY).await?;
        Ok(raw
            .and_then(|json| {
                serde_json::from_str::<Vec<i64>>(&json)
                    .map_err(|e| warn!("[Store] 隐藏列表解析失败，按空处理: {}", e))
                    .ok()
            })
            .unwrap_or_default())
    }

    /// 把聊天室加入隐藏列表（服务端不感知）
    ///
    /// 读-改-写在同一次调用内完成，读取后立即写回
    pub async fn hide_room(&self, room_id: i64) -> Result<()> {
        let mut hidden = self.hidden_rooms().await?;
        if !hidden.contains(&room_id) {
            hidden.push(room_id);
            self.set_raw(HIDDEN_ROOMS_KEY, &serde_json::to_string(&hidden)?)
                .await?;
            debug!("[Store] 🙈 聊天室已隐藏: roomID={}", room_id);
        }
        Ok(())
    }

    /// 把聊天室移出隐藏列表
    pub async fn unhide_room(&self, room_id: i64) -> Result<()> {
        let mut hidden = self.hidden_rooms().await?;
        let before = hidden.len();
        hidden.retain(|id| *id != room_id);
        if hidden.len() != before {
            self.set_raw(HIDDEN_ROOMS_KEY, &serde_json::to_string(&hidden)?)
                .await?;
            debug!("[Store] 👀 聊天室已取消隐藏: roomID={}", room_id);
        }
        Ok(())
    }

    // ===================== 显示隐藏开关 =====================

    /// 收件箱是否显示隐藏聊天室，默认 false
    pub async fn show_hidden(&self) -> Result<bool> {
        Ok(self
            .get_raw(SHOW_HIDDEN_KEY)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    pub async fn set_show_hidden(&self, show: bool) -> Result<()> {
        self.set_raw(SHOW_HIDDEN_KEY, if show { "true" } else { "false" })
            .await
    }

    // ===================== 已读水位线 =====================

    /// 读取整张已读水位线映射，内容损坏时按空映射处理
    pub async fn last_seen_map(&self) -> Result<HashMap<String, i64>> {
        let raw = self.get_raw(LAST_SEEN_KEY).await?;
        Ok(raw
            .and_then(|json| {
                serde_json::from_str::<HashMap<String, i64>>(&json)
                    .map_err(|e| warn!("[Store] 水位线映射解析失败，按空处理: {}", e))
                    .ok()
            })
            .unwrap_or_default())
    }

    /// 某个聊天室的已读水位线，缺失时为 0
    pub async fn last_seen(&self, room_id: i64) -> Result<i64> {
        let map = self.last_seen_map().await?;
        Ok(map.get(&room_id.to_string()).copied().unwrap_or(0))
    }

    /// 推进已读水位线
    ///
    /// 只升不降：迟到的旧值不会把水位线拉回去
    pub async fn note_last_seen(&self, room_id: i64, message_id: i64) -> Result<()> {
        let mut map = self.last_seen_map().await?;
        let key = room_id.to_string();
        let current = map.get(&key).copied().unwrap_or(0);
        if message_id <= current {
            return Ok(());
        }
        map.insert(key, message_id);
        self.set_raw(LAST_SEEN_KEY, &serde_json::to_string(&map)?)
            .await?;
        debug!(
            "[Store] 📖 水位线推进: roomID={}, lastSeen={} -> {}",
            room_id, current, message_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> LocalStore {
        LocalStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn hide_and_unhide_round_trip() {
        let store = memory_store().await;
        assert!(store.hidden_rooms().await.unwrap().is_empty());

        store.hide_room(7).await.unwrap();
        store.hide_room(7).await.unwrap(); // 重复隐藏不产生重复项
        store.hide_room(9).await.unwrap();
        assert_eq!(store.hidden_rooms().await.unwrap(), vec![7, 9]);

        store.unhide_room(7).await.unwrap();
        assert_eq!(store.hidden_rooms().await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn show_hidden_toggle_round_trip() {
        let store = memory_store().await;
        assert!(!store.show_hidden().await.unwrap());

        store.set_show_hidden(true).await.unwrap();
        assert!(store.show_hidden().await.unwrap());
        store.set_show_hidden(false).await.unwrap();
        assert!(!store.show_hidden().await.unwrap());
    }

    #[tokio::test]
    async fn last_seen_is_monotonic() {
        let store = memory_store().await;
        assert_eq!(store.last_seen(1).await.unwrap(), 0);

        store.note_last_seen(1, 10).await.unwrap();
        assert_eq!(store.last_seen(1).await.unwrap(), 10);

        // 迟到的旧值不能把水位线拉低
        store.note_last_seen(1, 4).await.unwrap();
        assert_eq!(store.last_seen(1).await.unwrap(), 10);

        store.note_last_seen(1, 42).await.unwrap();
        assert_eq!(store.last_seen(1).await.unwrap(), 42);

        // 不同聊天室互不影响
        store.note_last_seen(2, 5).await.unwrap();
        assert_eq!(store.last_seen(1).await.unwrap(), 42);
        assert_eq!(store.last_seen(2).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn corrupted_documents_degrade_to_empty() {
        let store = memory_store().await;
        store.set_raw(HIDDEN_ROOMS_KEY, "not-json").await.unwrap();
        store.set_raw(LAST_SEEN_KEY, "{broken").await.unwrap();
        assert!(store.hidden_rooms().await.unwrap().is_empty());
        assert!(store.last_seen_map().await.unwrap().is_empty());
    }
}
