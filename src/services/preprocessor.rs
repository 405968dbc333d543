//! 文档预处理 - 业务能力层
//!
//! ## 职责
//!
//! 保证上传的文件不超过大小上限：
//! 1. 文件本身足够小：原样返回
//! 2. 无损结构压缩（清理无引用对象、空流，压缩流）
//! 3. 仍然超限：按比例只保留前若干页，直到不超限或只剩一页
//!
//! 原始文件永远不会被修改，压缩失败时退回原文件，由上传阶段报告大小错误。

use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

const COMPRESSED_SUFFIX: &str = "_compressed";
const CHUNK_SUFFIX: &str = "_chunk1";

/// 预处理后的文档
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDocument {
    /// 实际上传的文件
    pub path: PathBuf,
    /// 是否为派生出的中间文件
    pub derived: bool,
    pub size_bytes: u64,
}

impl PreparedDocument {
    /// 删除中间文件（原文件不受影响）
    pub async fn cleanup(&self) {
        if !self.derived {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!("⚠️ 删除中间文件失败 {}: {}", self.path.display(), e);
        }
    }
}

/// 文档预处理器
#[derive(Debug, Clone)]
pub struct Preprocessor {
    work_dir: PathBuf,
    max_bytes: u64,
}

impl Preprocessor {
    pub fn new(work_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            work_dir: work_dir.into(),
            max_bytes,
        }
    }

    /// 准备上传文件
    pub async fn prepare(&self, path: &Path) -> AppResult<PreparedDocument> {
        let source = path.to_path_buf();
        let work_dir = self.work_dir.clone();
        let max_bytes = self.max_bytes;

        tokio::task::spawn_blocking(move || prepare_blocking(&source, &work_dir, max_bytes))
            .await
            .map_err(|e| AppError::document(path, format!("预处理任务异常退出: {}", e)))?
    }
}

fn prepare_blocking(path: &Path, work_dir: &Path, max_bytes: u64) -> AppResult<PreparedDocument> {
    let original_size = std::fs::metadata(path)
        .map_err(|e| AppError::io(path, e))?
        .len();

    if original_size <= max_bytes {
        return Ok(PreparedDocument {
            path: path.to_path_buf(),
            derived: false,
            size_bytes: original_size,
        });
    }

    info!(
        "📦 文件过大 ({:.1} MB > {:.1} MB)，开始压缩: {}",
        mb(original_size),
        mb(max_bytes),
        path.display()
    );

    match shrink(path, work_dir, max_bytes, original_size) {
        Ok(prepared) => Ok(prepared),
        Err(e) => {
            warn!("⚠️ 压缩失败，使用原文件: {}", e);
            Ok(PreparedDocument {
                path: path.to_path_buf(),
                derived: false,
                size_bytes: original_size,
            })
        }
    }
}

fn shrink(
    path: &Path,
    work_dir: &Path,
    max_bytes: u64,
    original_size: u64,
) -> AppResult<PreparedDocument> {
    let mut doc = Document::load(path).map_err(|e| AppError::document(path, e))?;
    let compressed = optimize(&mut doc, path)?;
    let compressed_size = compressed.len() as u64;

    info!(
        "✓ 压缩完成: {:.1} MB → {:.1} MB",
        mb(original_size),
        mb(compressed_size)
    );

    let total_pages = doc.get_pages().len() as u64;
    if compressed_size <= max_bytes || total_pages <= 1 {
        if compressed_size > max_bytes {
            warn!("⚠️ 单页文档压缩后仍超过上限");
        }
        let out = derived_path(path, work_dir, COMPRESSED_SUFFIX);
        return write_artifact(&out, &compressed);
    }

    // 按比例保留前 keep 页
    let mut keep = (total_pages * max_bytes / original_size).max(1);
    loop {
        let mut prefix = doc.clone();
        let drop_pages: Vec<u32> = ((keep + 1)..=total_pages).map(|n| n as u32).collect();
        prefix.delete_pages(&drop_pages);
        let bytes = optimize(&mut prefix, path)?;
        let size = bytes.len() as u64;

        debug!("保留前 {} / {} 页，大小 {:.1} MB", keep, total_pages, mb(size));

        if size <= max_bytes || keep == 1 {
            info!(
                "✂️ 截取前 {} / {} 页 ({:.1} MB)",
                keep,
                total_pages,
                mb(size)
            );
            let out = derived_path(path, work_dir, CHUNK_SUFFIX);
            return write_artifact(&out, &bytes);
        }

        let scaled = (keep * max_bytes / size).max(1);
        keep = if scaled < keep { scaled } else { keep - 1 };
    }
}

/// 清理、压缩并序列化文档
fn optimize(doc: &mut Document, path: &Path) -> AppResult<Vec<u8>> {
    doc.prune_objects();
    doc.delete_zero_length_streams();
    doc.compress();
    doc.renumber_objects();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| AppError::document(path, e))?;
    Ok(bytes)
}

fn write_artifact(out: &Path, bytes: &[u8]) -> AppResult<PreparedDocument> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
    }
    std::fs::write(out, bytes).map_err(|e| AppError::io(out, e))?;
    Ok(PreparedDocument {
        path: out.to_path_buf(),
        derived: true,
        size_bytes: bytes.len() as u64,
    })
}

/// 中间文件放在 `work_dir/<来源目录名>/` 下，不同科目的同名章节互不覆盖
fn derived_path(path: &Path, work_dir: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let dir = match path.parent().and_then(|p| p.file_name()) {
        Some(parent) => work_dir.join(parent),
        None => work_dir.to_path_buf(),
    };
    dir.join(format!("{}{}.pdf", stem, suffix))
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
