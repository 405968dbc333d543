//! 章节处理上下文
//!
//! 封装"我正在处理第几个章节、属于哪个科目"这一信息

use std::fmt::Display;

use crate::models::work_unit::WorkUnit;

/// 章节处理上下文
#[derive(Debug, Clone)]
pub struct UnitCtx {
    /// 章节序号（从 1 开始，仅用于日志显示）
    pub unit_index: usize,

    /// 本次运行的章节总数
    pub total_units: usize,

    pub subject: String,

    pub unit_name: String,
}

impl UnitCtx {
    /// 创建新的章节上下文
    pub fn new(unit: &WorkUnit, unit_index: usize, total_units: usize) -> Self {
        Self {
            unit_index,
            total_units,
            subject: unit.subject.clone(),
            unit_name: unit.name.clone(),
        }
    }
}

impl Display for UnitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[章节 {}/{} {}/{}]",
            self.unit_index, self.total_units, self.subject, self.unit_name
        )
    }
}
