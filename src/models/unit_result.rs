use std::fmt;

use crate::models::mcq::Mcq;
use crate::models::work_unit::WorkUnit;

/// 章节处理的最终状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// 达到目标题目数
    Completed,
    /// 调用次数用尽，题目数不足
    Partial,
    /// 中途放弃（文件被拒绝、连续失败等）
    Aborted(String),
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Completed => f.write_str("完成"),
            UnitStatus::Partial => f.write_str("部分完成"),
            UnitStatus::Aborted(reason) => write!(f, "中止 ({})", reason),
        }
    }
}

/// 单个章节的处理结果
#[derive(Debug, Clone)]
pub struct UnitResult {
    pub unit: WorkUnit,
    /// 已编号的题目，序号从 1 连续递增
    pub items: Vec<Mcq>,
    /// 实际发起的生成调用次数
    pub attempts: usize,
    /// 解析时被丢弃的记录数
    pub dropped: usize,
    pub status: UnitStatus,
}

impl UnitResult {
    /// 未生成任何题目就中止的结果
    pub fn aborted(unit: WorkUnit, reason: impl Into<String>) -> Self {
        Self {
            unit,
            items: Vec::new(),
            attempts: 0,
            dropped: 0,
            status: UnitStatus::Aborted(reason.into()),
        }
    }
}
