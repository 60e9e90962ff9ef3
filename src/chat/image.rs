//! 图片消息编码
//!
//! 实时通道上的图片不走独立上传接口，而是编码成单个 data-URI 字符串帧。
//! 编码比文本帧大得多，读文件 + base64 放到阻塞线程池执行，避免卡住事件循环。

use anyhow::{Context, Result};
use base64::Engine;
use std::path::{Path, PathBuf};

/// 从文件扩展名推断 data-URI 的图片子类型，默认 jpeg
fn image_subtype(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "jpeg".to_string());
    match ext.as_str() {
        "jpg" => "jpeg".to_string(),
        "" => "jpeg".to_string(),
        other => other.to_string(),
    }
}

/// 把本地图片文件编码成 `data:image/<ext>;base64,<payload>` 字符串
///
/// 编码失败时返回错误，绝不会产出半截帧
pub async fn encode_image_data_uri(path: &Path) -> Result<String> {
    let subtype = image_subtype(path);
    let owned: PathBuf = path.to_path_buf();

    let encoded = tokio::task::spawn_blocking(move || -> Result<String> {
        let bytes = std::fs::read(&owned)
            .with_context(|| format!("读取图片文件失败: {}", owned.display()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    })
    .await
    .context("图片编码任务被中断")??;

    Ok(format!("data:image/{};base64,{}", subtype, encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encode_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("hanlumi_encode_test.png");
        std::fs::write(&path, [0x89u8, 0x50, 0x4e, 0x47]).unwrap();

        let uri = encode_image_data_uri(&path).await.unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));

        let payload = uri.split(',').nth(1).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        assert_eq!(decoded, vec![0x89u8, 0x50, 0x4e, 0x47]);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn jpg_normalizes_to_jpeg() {
        assert_eq!(image_subtype(Path::new("a.JPG")), "jpeg");
        assert_eq!(image_subtype(Path::new("a.webp")), "webp");
        assert_eq!(image_subtype(Path::new("noext")), "jpeg");
    }

    #[tokio::test]
    async fn missing_file_reports_error_without_partial_frame() {
        let err = encode_image_data_uri(Path::new("/不存在/的/图片.png"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("读取图片文件失败"));
    }
}
