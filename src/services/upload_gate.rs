//! 上传闸门 - 业务能力层
//!
//! ## 职责
//!
//! - 上传文件并轮询，直到服务端处理完成（ACTIVE）
//! - 处理失败或超时：删除远程文件，返回 `AssetRejected`
//! - 通过 [`AssetGuard`] 保证远程文件在所有退出路径上被释放
//! - 通过 [`AssetSlot`] 在密钥轮换后用新密钥重新上传

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::{Credential, GenerativeBackend};
use crate::models::asset::{AssetState, RemoteAsset};

/// 上传闸门
#[derive(Clone)]
pub struct UploadGate {
    backend: Arc<dyn GenerativeBackend>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl UploadGate {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            poll_interval,
            poll_timeout,
        }
    }

    /// 上传文件并等待其可用
    pub async fn acquire(&self, path: &Path, credential: &Credential) -> AppResult<AssetGuard> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::io(path, e))?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());

        info!(
            "📤 上传文件 {} ({:.1} MB)，密钥 {}",
            display_name,
            data.len() as f64 / (1024.0 * 1024.0),
            credential.masked()
        );

        let asset = self
            .backend
            .upload(credential, &display_name, data)
            .await?;

        // 上传成功后由 guard 负责释放
        let mut guard = AssetGuard::new(self.backend.clone(), credential.clone(), asset);

        match self.wait_until_ready(&mut guard).await {
            Ok(()) => {
                info!("✓ 文件已就绪: {}", guard.asset().name);
                Ok(guard)
            }
            Err(e) => {
                guard.release().await;
                Err(e)
            }
        }
    }

    async fn wait_until_ready(&self, guard: &mut AssetGuard) -> AppResult<()> {
        let deadline = Instant::now() + self.poll_timeout;

        loop {
            match guard.asset.state {
                AssetState::Active => return Ok(()),
                AssetState::Failed => {
                    warn!("⚠️ 服务端处理文件失败: {}", guard.asset.name);
                    return Err(AppError::AssetRejected {
                        state: AssetState::Failed,
                    });
                }
                AssetState::Pending => {}
            }

            if Instant::now() >= deadline {
                warn!("⚠️ 等待文件就绪超时: {}", guard.asset.name);
                return Err(AppError::AssetRejected {
                    state: AssetState::Pending,
                });
            }

            debug!("文件处理中，{:?} 后重新查询: {}", self.poll_interval, guard.asset.name);
            tokio::time::sleep(self.poll_interval).await;

            guard.asset = self
                .backend
                .refresh(&guard.credential, &guard.asset)
                .await?;
        }
    }
}

/// 远程文件的所有权
///
/// 必须调用 [`AssetGuard::release`]；未释放就被丢弃时会尽力在后台删除
pub struct AssetGuard {
    backend: Arc<dyn GenerativeBackend>,
    credential: Credential,
    asset: RemoteAsset,
    released: bool,
}

impl AssetGuard {
    fn new(backend: Arc<dyn GenerativeBackend>, credential: Credential, asset: RemoteAsset) -> Self {
        Self {
            backend,
            credential,
            asset,
            released: false,
        }
    }

    pub fn asset(&self) -> &RemoteAsset {
        &self.asset
    }

    /// 删除远程文件，错误只记录日志
    pub async fn release(mut self) {
        self.released = true;
        match self.backend.delete(&self.credential, &self.asset).await {
            Ok(()) => debug!("已删除远程文件: {}", self.asset.name),
            Err(e) => warn!("⚠️ 删除远程文件失败 {}: {}", self.asset.name, e),
        }
    }
}

impl Drop for AssetGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("⚠️ 远程文件未释放且没有运行时: {}", self.asset.name);
            return;
        };

        let backend = self.backend.clone();
        let credential = self.credential.clone();
        let asset = self.asset.clone();
        handle.spawn(async move {
            if let Err(e) = backend.delete(&credential, &asset).await {
                warn!("⚠️ 后台删除远程文件失败 {}: {}", asset.name, e);
            }
        });
    }
}

/// 一个章节的远程文件槽位
///
/// 远程文件只能用上传它的密钥访问；密钥轮换后，下一次调用前重新上传
pub struct AssetSlot {
    gate: UploadGate,
    path: PathBuf,
    current: Mutex<Option<AssetGuard>>,
}

impl AssetSlot {
    pub fn new(gate: UploadGate, path: impl Into<PathBuf>) -> Self {
        Self {
            gate,
            path: path.into(),
            current: Mutex::new(None),
        }
    }

    /// 返回属于 `credential` 的可用远程文件
    pub async fn ensure(&self, credential: &Credential) -> AppResult<RemoteAsset> {
        let mut current = self.current.lock().await;

        if let Some(guard) = current.as_ref() {
            if guard.asset.owner == credential.id {
                return Ok(guard.asset.clone());
            }
            info!(
                "🔁 密钥已变更 ({} → {})，重新上传文件",
                guard.credential.masked(),
                credential.masked()
            );
        }

        if let Some(old) = current.take() {
            old.release().await;
        }

        let guard = self.gate.acquire(&self.path, credential).await?;
        let asset = guard.asset.clone();
        *current = Some(guard);
        Ok(asset)
    }

    /// 释放当前持有的远程文件
    pub async fn release(&self) {
        if let Some(guard) = self.current.lock().await.take() {
            guard.release().await;
        }
    }
}
