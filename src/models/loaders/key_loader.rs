use anyhow::{Context, Result};
use std::path::Path;

/// 从密钥文件读取 API 密钥
///
/// 每行一个密钥，不以 `prefix` 开头的行（注释、空行、其他内容）全部忽略
pub fn load_api_keys(path: &Path, prefix: &str) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("无法读取密钥文件: {}", path.display()))?;
    Ok(parse_api_keys(&content, prefix))
}

pub fn parse_api_keys(content: &str, prefix: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(prefix))
        .map(str::to_string)
        .collect()
}
