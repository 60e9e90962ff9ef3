//! 二手交易聊天 CLI 客户端（测试版）
//!
//! 用于测试和展示聊天功能：查看收件箱、进入聊天室交互收发消息。
//! 启动时通过命令行参数提供 token 与用户 ID（认证本身不在本工具范围内）。

use anyhow::Result;
use clap::{Parser, Subcommand};
use hanlumi_chat_core::chat::inbox::InboxAggregator;
use hanlumi_chat_core::chat::listener::{InboxListener, SessionListener};
use hanlumi_chat_core::chat::normalize::{FrameKind, NormalizedMessage};
use hanlumi_chat_core::chat::session::{ChatSession, SessionConfig};
use hanlumi_chat_core::chat::types::sale_status_text;
use hanlumi_chat_core::{ChatApi, LocalStore, StaticAuth};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// 聊天 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "hanlumi-cli")]
#[command(about = "二手交易聊天 CLI 客户端 - 用于测试和展示聊天功能", long_about = None)]
struct Args {
    /// REST API 基础地址
    #[arg(long, default_value = "https://hanlumi.co.kr")]
    base_url: String,

    /// WebSocket 基础地址
    #[arg(long, default_value = "wss://hanlumi.co.kr")]
    ws_url: String,

    /// Bearer token
    #[arg(short, long)]
    token: String,

    /// 当前用户 ID
    #[arg(short, long)]
    user_id: i64,

    /// 本地存储的 SQLite 数据库 URL
    #[arg(long, default_value = "sqlite://hanlumi-local.db?mode=rwc")]
    db: String,

    /// 日志级别
    #[arg(long, default_value = "info,hanlumi_chat_core=debug")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 查看聊天列表（带未读角标与商品信息）
    Inbox,
    /// 从聊天列表打开某个聊天室（会推进已读水位线）
    Open {
        /// 聊天室 ID
        #[arg(long)]
        room_id: i64,
    },
    /// 针对某个帖子发起聊天（买家视角，创建或取回聊天室）
    ChatPost {
        /// 帖子 ID
        #[arg(long)]
        post_id: i64,
    },
    /// 直接进入聊天室（跳过列表，不推进水位线）
    Chat {
        /// 聊天室 ID
        #[arg(long)]
        room_id: i64,
        /// 关联帖子 ID
        #[arg(long)]
        post_id: i64,
        /// 卖家用户 ID
        #[arg(long)]
        seller_id: i64,
        /// 买家用户 ID
        #[arg(long)]
        buyer_id: i64,
    },
    /// 切换"显示隐藏聊天室"开关
    ToggleHidden,
    /// 把聊天室移出本地隐藏列表
    Unhide {
        /// 聊天室 ID
        #[arg(long)]
        room_id: i64,
    },
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 会话监听器：把每个回调打印出来
struct CliSessionListener;

#[async_trait::async_trait]
impl SessionListener for CliSessionListener {
    async fn on_connection_status_changed(&self, connected: bool, detail: String) {
        if connected {
            info!("[CLI/Session] 🔗 已连接: {}", detail);
        } else {
            warn!("[CLI/Session] 🔗 断开连接: {}", detail);
        }
    }

    async fn on_new_message(&self, message: NormalizedMessage) {
        let who = message
            .sender
            .as_ref()
            .map(|s| s.nickname.clone())
            .unwrap_or_else(|| "?".to_string());
        match message.kind {
            FrameKind::Image => info!("[CLI/Session] 📨 {}: [图片] ({} 字节)", who, message.content.len()),
            _ => info!("[CLI/Session] 📨 {}: {}", who, message.content),
        }
    }

    async fn on_history_loaded(&self, count: usize) {
        info!("[CLI/Session] 📥 历史消息加载完成: {} 条", count);
    }

    async fn on_sale_status_changed(&self, status: i32) {
        info!(
            "[CLI/Session] 🏷️ 销售状态变更: {} ({})",
            status,
            sale_status_text(status)
        );
    }

    async fn on_toast(&self, text: String) {
        info!("[CLI/Session] 💬 {}", text);
    }
}

/// 收件箱监听器
struct CliInboxListener;

#[async_trait::async_trait]
impl InboxListener for CliInboxListener {
    async fn on_refresh_started(&self) {
        info!("[CLI/Inbox] 🔄 刷新开始");
    }

    async fn on_refresh_finished(&self, visible_count: usize) {
        info!("[CLI/Inbox] ✅ 刷新完成: {} 个聊天室", visible_count);
    }

    async fn on_toast(&self, text: String) {
        info!("[CLI/Inbox] 💬 {}", text);
    }
}

async fn run_inbox(api: ChatApi, store: Arc<LocalStore>) -> Result<()> {
    let mut inbox = InboxAggregator::new(api, store);
    inbox.set_listener(Arc::new(CliInboxListener));

    let entries = inbox.refresh().await?;
    if entries.is_empty() {
        info!("[CLI] 📭 聊天列表为空");
        return Ok(());
    }

    info!("[CLI] 📋 聊天列表（共 {} 个）:", entries.len());
    for entry in &entries {
        let partner = entry
            .partner
            .as_ref()
            .map(|p| p.nickname.clone())
            .unwrap_or_else(|| "对方".to_string());
        let badge = if entry.unread { "🔴" } else { "  " };
        let hidden_mark = if entry.hidden { " (已隐藏)" } else { "" };
        info!(
            "[CLI] {} roomID={} | {} | {} | {} {}{}",
            badge,
            entry.room.id,
            partner,
            entry.preview(),
            entry.product_title,
            entry.product_price,
            hidden_mark
        );
    }
    Ok(())
}

async fn run_chat(api: ChatApi, store: Arc<LocalStore>, config: SessionConfig) -> Result<()> {
    let room_id = config.room_id;
    let mut session = ChatSession::new(config, api, store);
    session.set_listener(Arc::new(CliSessionListener));

    info!("[CLI] 🔗 正在进入聊天室 {} ...", room_id);
    session.open().await?;

    info!("[CLI] 💡 输入消息回车发送；/image <路径> 发送图片；/status <0|1|2> 变更销售状态；");
    info!("[CLI] 💡 /review 检查评价资格；/leave 退出聊天室；/quit 退出程序");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        } else if line == "/leave" {
            session.leave_room().await?;
            break;
        } else if let Some(path) = line.strip_prefix("/image ") {
            if let Err(e) = session.send_image(Path::new(path.trim())).await {
                error!("[CLI] 图片发送失败: {}", e);
            }
        } else if let Some(value) = line.strip_prefix("/status ") {
            match value.trim().parse::<i32>() {
                Ok(status) => {
                    let _ = session.change_sale_status(status).await;
                }
                Err(_) => error!("[CLI] 无效的状态值: {}", value),
            }
        } else if line == "/review" {
            match session.can_write_review().await {
                Ok(true) => info!(
                    "[CLI] ✅ 可以写评价，评价对象 userID={}",
                    session.review_target()
                ),
                Ok(false) => info!("[CLI] 🚫 当前不满足评价条件"),
                Err(e) => error!("[CLI] 评价资格检查失败: {}", e),
            }
        } else {
            session.send_text(&line).await?;
        }
    }

    session.close().await;
    info!("[CLI] 👋 已离开聊天室");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level);

    info!("[CLI] 🚀 聊天 CLI 客户端");
    info!("[CLI] 👤 用户ID: {}", args.user_id);

    let auth = Arc::new(StaticAuth {
        token: args.token.clone(),
        user_id: args.user_id,
    });
    let api = ChatApi::new(args.base_url.clone(), auth)?;
    let store = Arc::new(LocalStore::new(&args.db).await?);

    match args.command {
        Command::Inbox => run_inbox(api, store).await?,
        Command::Open { room_id } => {
            let mut inbox = InboxAggregator::new(api.clone(), store.clone());
            inbox.set_listener(Arc::new(CliInboxListener));
            let entries = inbox.refresh().await?;
            let entry = entries
                .iter()
                .find(|e| e.room.id == room_id)
                .ok_or_else(|| anyhow::anyhow!("聊天列表里没有聊天室 {}", room_id))?;
            let params = inbox.open_room(entry).await?;
            run_chat(api, store, params.session_config(&args.ws_url)).await?
        }
        Command::ChatPost { post_id } => {
            let inbox = InboxAggregator::new(api.clone(), store.clone());
            let params = inbox.open_room_for_post(post_id).await?;
            info!(
                "[CLI] 🛒 商品: {} {}",
                params.product_title, params.product_price
            );
            run_chat(api, store, params.session_config(&args.ws_url)).await?
        }
        Command::Chat {
            room_id,
            post_id,
            seller_id,
            buyer_id,
        } => {
            let mut config = SessionConfig::new(room_id, post_id, seller_id, buyer_id);
            config.ws_base_url = args.ws_url.clone();
            run_chat(api, store, config).await?
        }
        Command::ToggleHidden => {
            let inbox = InboxAggregator::new(api, store);
            let next = inbox.toggle_show_hidden().await?;
            info!("[CLI] 👀 显示隐藏聊天室: {}", next);
        }
        Command::Unhide { room_id } => {
            let inbox = InboxAggregator::new(api, store);
            inbox.unhide_room(room_id).await?;
            info!("[CLI] 👀 聊天室已取消隐藏: roomID={}", room_id);
        }
    }

    Ok(())
}
