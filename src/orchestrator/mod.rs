//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量调度和资源管理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量章节处理器
//! - 管理应用生命周期（初始化、运行、统计）
//! - 批量加载章节（Vec<WorkUnit>）
//! - 控制并发数量（Semaphore，不超过可用密钥数）
//! - 科目达标后跳过剩余章节，密钥耗尽后停止调度
//! - 输出全局统计和题库库存
//!
//! ### `unit_processor` - 单章节处理器
//! - 分配密钥、预处理文档
//! - 调用累加器生成题目
//! - 释放远程文件、清理中间文件
//! - 写入单章节结果
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<WorkUnit>)
//!     ↓
//! unit_processor (处理单个 WorkUnit)
//!     ↓
//! workflow::BatchAccumulator (多次生成调用)
//!     ↓
//! services (能力层：预处理 / 上传 / 重试 / 解析 / 汇总)
//!     ↓
//! infrastructure (基础设施：KeyPool / GeminiClient)
//! ```

pub mod batch_processor;
pub mod unit_processor;

// 重新导出主要类型
pub use batch_processor::{App, RunSummary};
pub use unit_processor::UnitProcessor;
