use std::path::PathBuf;

use serde::Serialize;

/// 一个待处理的章节文档
#[derive(Debug, Clone, Serialize)]
pub struct WorkUnit {
    /// 科目标签（科目目录名，如 `chemistry_chapters`）
    pub subject: String,
    /// 章节名（文件名去掉扩展名）
    pub name: String,
    pub source_path: PathBuf,
    /// 目标题目数
    pub target: usize,
    pub size_bytes: u64,
}

impl WorkUnit {
    /// 来源文件名，写入题目元数据
    pub fn source_file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.pdf", self.name))
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}
