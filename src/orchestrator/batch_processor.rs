//! 批量章节处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量章节的调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：写日志文件头、加载密钥、创建生成服务客户端
//! 2. **批量加载**：扫描所有科目目录下的章节（`Vec<WorkUnit>`）
//! 3. **并发控制**：使用 Semaphore 限制同时处理的章节数（不超过可用密钥数）
//! 4. **科目目标**：科目累计题目数达标后跳过剩余章节
//! 5. **停止调度**：密钥池耗尽后不再开始新章节，已有结果照常写出
//! 6. **全局统计**：汇总处理结果并打印题库库存
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个章节的细节
//! - **并发安全**：通过 Semaphore 和 tokio::spawn 实现并发
//! - **向下委托**：委托 unit_processor 处理单个章节

use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::{GeminiClient, GenerativeBackend, KeyPool};
use crate::models::unit_result::{UnitResult, UnitStatus};
use crate::models::work_unit::WorkUnit;
use crate::orchestrator::unit_processor::UnitProcessor;
use crate::services::output_store::{inventory, InventoryReport, OutputStore};
use crate::utils::logging::{
    init_log_file, log_inventory, log_startup, log_units_loaded, print_final_stats, RunStats,
};
use crate::workflow::unit_ctx::UnitCtx;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// 应用主结构
pub struct App {
    config: Config,
    processor: Arc<UnitProcessor>,
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: RunStats,
    pub inventory: InventoryReport,
    /// 是否因为密钥池耗尽而提前停止
    pub pool_exhausted: bool,
}

/// 单个任务的结局
enum TaskOutcome {
    Done(UnitResult),
    Skipped,
    Failed,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        init_log_file(&config.output_log_file)
            .with_context(|| format!("无法写入日志文件: {}", config.output_log_file))?;

        // 加载密钥
        let pool = KeyPool::from_file(
            &config.api_keys_file,
            &config.key_prefix,
            config.subject_key_mapping.clone(),
            config.key_quota,
        )?;

        log_startup(&config, pool.len());

        // 创建生成服务客户端
        let backend = GeminiClient::new(&config).map_err(AppError::from)?;

        Ok(Self::with_backend(config, Arc::new(backend), pool))
    }

    /// 使用指定的生成服务创建应用
    pub fn with_backend(config: Config, backend: Arc<dyn GenerativeBackend>, pool: KeyPool) -> Self {
        let store = Arc::new(OutputStore::new(&config.output_dir, config.snapshot_every));
        let processor = Arc::new(UnitProcessor::new(&config, backend, Arc::new(pool), store));
        Self { config, processor }
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunSummary> {
        // 加载所有待处理的章节
        let units = self.load_units().await?;

        let stats = if units.is_empty() {
            warn!("⚠️ 没有找到待处理的章节");
            RunStats::default()
        } else {
            self.process_all_units(units).await?
        };

        let pool_exhausted = self.processor.pool().usable_count() == 0;
        if pool_exhausted {
            error!("❌ 密钥池已耗尽，已停止调度新的章节");
        }

        // 写出科目合集
        self.processor.store().flush().await?;

        // 输出最终统计
        print_final_stats(&stats, &self.config.output_log_file);
        let config = &self.config;
        let report = inventory(&config.output_dir, |s| config.target_for_subject(s)).await?;
        log_inventory(&report);

        Ok(RunSummary {
            stats,
            inventory: report,
            pool_exhausted,
        })
    }

    /// 加载章节
    async fn load_units(&self) -> Result<Vec<WorkUnit>> {
        info!("\n📁 正在扫描待处理的章节...");
        crate::models::load_all_units(&self.config).await
    }

    /// 处理所有章节
    async fn process_all_units(&self, units: Vec<WorkUnit>) -> Result<RunStats> {
        let workers = self
            .config
            .max_workers
            .min(self.processor.pool().usable_count())
            .max(1);
        let total = units.len();
        log_units_loaded(total, workers);

        let semaphore = Arc::new(Semaphore::new(workers));
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(total);

        for (idx, unit) in units.into_iter().enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            if stop.load(Ordering::SeqCst) {
                drop(permit);
                break;
            }

            let ctx = UnitCtx::new(&unit, idx + 1, total);
            let processor = self.processor.clone();
            let config = self.config.clone();
            let stop = stop.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                run_unit(&processor, &config, unit, &ctx, &stop).await
            });
            handles.push(handle);
        }

        let mut stats = RunStats {
            total,
            ..Default::default()
        };

        for result in futures::future::join_all(handles).await {
            match result {
                Ok(TaskOutcome::Done(unit_result)) => {
                    stats.items += unit_result.items.len();
                    match unit_result.status {
                        UnitStatus::Completed => stats.completed += 1,
                        UnitStatus::Partial => stats.partial += 1,
                        UnitStatus::Aborted(_) => stats.aborted += 1,
                    }
                }
                Ok(TaskOutcome::Skipped) => stats.skipped += 1,
                Ok(TaskOutcome::Failed) => stats.failed += 1,
                Err(e) => {
                    error!("任务执行失败: {}", e);
                    stats.failed += 1;
                }
            }
        }

        // 未调度的章节计入跳过
        let scheduled = stats.completed + stats.partial + stats.aborted + stats.skipped + stats.failed;
        stats.skipped += total - scheduled;

        Ok(stats)
    }
}

/// 在 worker 中处理一个章节
async fn run_unit(
    processor: &UnitProcessor,
    config: &Config,
    unit: WorkUnit,
    ctx: &UnitCtx,
    stop: &AtomicBool,
) -> TaskOutcome {
    if stop.load(Ordering::SeqCst) {
        return TaskOutcome::Skipped;
    }

    if config.stop_at_subject_target {
        let target = config.target_for_subject(&unit.subject);
        let total = processor.store().subject_total(&unit.subject).await;
        if total >= target {
            info!("{} ⏭️ 科目已达到目标 ({}/{})，跳过", ctx, total, target);
            return TaskOutcome::Skipped;
        }
    }

    match processor.process(unit, ctx).await {
        Ok(result) => {
            if processor.pool().usable_count() == 0 {
                stop.store(true, Ordering::SeqCst);
            }
            TaskOutcome::Done(result)
        }
        Err(AppError::PoolExhausted) => {
            error!("{} ❌ 密钥池已耗尽，无法开始处理", ctx);
            stop.store(true, Ordering::SeqCst);
            TaskOutcome::Skipped
        }
        Err(e) => {
            error!("{} ❌ 处理过程中发生错误: {}", ctx, e);
            TaskOutcome::Failed
        }
    }
}
