use std::fmt;

use serde::{Deserialize, Serialize};

/// 远程文件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetState {
    /// 服务端仍在处理
    Pending,
    /// 可用于生成调用
    Active,
    /// 处理失败
    Failed,
}

impl AssetState {
    /// 解析服务端返回的状态字符串
    ///
    /// `PROCESSING` 与 `STATE_UNSPECIFIED` 都视为仍在处理
    pub fn from_service(state: &str) -> Self {
        match state {
            "ACTIVE" => AssetState::Active,
            "FAILED" => AssetState::Failed,
            _ => AssetState::Pending,
        }
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetState::Pending => "PENDING",
            AssetState::Active => "ACTIVE",
            AssetState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 已上传到生成服务的文件句柄
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAsset {
    /// 服务端资源名（如 `files/abc123`）
    pub name: String,
    /// 生成调用中引用该文件的 URI
    pub uri: String,
    pub mime_type: String,
    pub state: AssetState,
    pub size_bytes: u64,
    /// 上传该文件所用密钥的编号
    pub owner: usize,
}
