//! # Batch MCQ
//!
//! 从教材 PDF 批量生成选择题的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源，只暴露能力
//! - `KeyPool` - API 密钥池，分配、轮换、计数
//! - `GeminiClient` - 生成服务客户端（上传、查询、删除、生成）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `Preprocessor` - PDF 压缩与截取
//! - `UploadGate` - 上传并等待文件就绪
//! - `Escalation` - 重试、退避与密钥轮换
//! - `parse_response` - 回复解析与修复
//! - `OutputStore` - 结果写入与库存统计
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个章节"的生成流程
//! - `UnitCtx` - 上下文封装（科目 + 章节）
//! - `BatchAccumulator` - 多次调用累加到目标题目数
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量章节处理器，管理并发和统计
//! - `orchestrator/unit_processor` - 单章节处理器
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, ServiceError};
pub use infrastructure::{Credential, GeminiClient, GenerativeBackend, KeyPool};
pub use models::{Mcq, McqDraft, UnitResult, UnitStatus, WorkUnit};
pub use orchestrator::{App, RunSummary};
pub use workflow::{BatchAccumulator, UnitCtx};
