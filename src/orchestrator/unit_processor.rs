//! 单章节处理器 - 编排层
//!
//! ## 职责
//!
//! 负责单个章节从头到尾的处理：
//! 1. 分配密钥
//! 2. 预处理文档（压缩/截取）
//! 3. 累加生成题目（上传在首次调用前完成，密钥轮换后自动重新上传）
//! 4. 释放远程文件、删除中间文件
//! 5. 写入结果
//!
//! 不管成功与否，远程文件都会在处理下一个章节之前释放。

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::{GenerativeBackend, KeyPool};
use crate::models::unit_result::{UnitResult, UnitStatus};
use crate::models::work_unit::WorkUnit;
use crate::services::output_store::OutputStore;
use crate::services::preprocessor::Preprocessor;
use crate::services::retry::{Escalation, RetryPolicy};
use crate::services::upload_gate::{AssetSlot, UploadGate};
use crate::utils::logging::log_unit_start;
use crate::workflow::batch_accumulator::{AccumulatorSettings, BatchAccumulator};
use crate::workflow::unit_ctx::UnitCtx;

/// 单章节处理器
///
/// 所有 worker 共享同一个实例
pub struct UnitProcessor {
    pool: Arc<KeyPool>,
    preprocessor: Preprocessor,
    gate: UploadGate,
    accumulator: BatchAccumulator,
    store: Arc<OutputStore>,
    keep_intermediate: bool,
}

impl UnitProcessor {
    pub fn new(
        config: &Config,
        backend: Arc<dyn GenerativeBackend>,
        pool: Arc<KeyPool>,
        store: Arc<OutputStore>,
    ) -> Self {
        let gate = UploadGate::new(
            backend.clone(),
            config.poll_interval(),
            config.poll_timeout(),
        );
        let escalation = Escalation::new(RetryPolicy::from_config(config), pool.clone());
        let accumulator = BatchAccumulator::new(
            backend,
            escalation,
            AccumulatorSettings::from_config(config),
        );

        Self {
            pool,
            preprocessor: Preprocessor::new(&config.work_dir, config.max_upload_bytes),
            gate,
            accumulator,
            store,
            keep_intermediate: config.keep_intermediate,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<OutputStore> {
        &self.store
    }

    /// 处理一个章节
    ///
    /// 返回 `Err` 只有两种情况：密钥池耗尽（无法开始）或结果写入失败
    pub async fn process(&self, unit: WorkUnit, ctx: &UnitCtx) -> AppResult<UnitResult> {
        log_unit_start(ctx, &unit);

        // ========== 步骤 1: 分配密钥 ==========
        let mut credential = self.pool.assign(&unit.subject)?;
        info!("{} 🔑 使用密钥 {}", ctx, credential.masked());

        // ========== 步骤 2: 预处理 ==========
        let prepared = match self.preprocessor.prepare(&unit.source_path).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("{} ❌ 文档预处理失败: {}", ctx, e);
                let result = UnitResult::aborted(unit, e.to_string());
                self.store.record(&result).await?;
                return Ok(result);
            }
        };

        // ========== 步骤 3: 累加生成 ==========
        let slot = AssetSlot::new(self.gate.clone(), &prepared.path);
        let result = self
            .accumulator
            .run(ctx, &unit, &slot, &mut credential)
            .await;

        // ========== 步骤 4: 释放资源 ==========
        slot.release().await;
        if !self.keep_intermediate {
            prepared.cleanup().await;
        }

        // ========== 步骤 5: 写入结果 ==========
        let outcome = self.store.record(&result).await?;
        log_unit_result(ctx, &result, outcome.subject_total);

        Ok(result)
    }
}

fn log_unit_result(ctx: &UnitCtx, result: &UnitResult, subject_total: usize) {
    match &result.status {
        UnitStatus::Completed => info!(
            "{} ✅ 完成: {} 道题，{} 次调用 (科目累计 {})",
            ctx,
            result.items.len(),
            result.attempts,
            subject_total
        ),
        UnitStatus::Partial => warn!(
            "{} ⚠️ 部分完成: {}/{} 道题，调用次数已用尽 (科目累计 {})",
            ctx,
            result.items.len(),
            result.unit.target,
            subject_total
        ),
        UnitStatus::Aborted(reason) => error!(
            "{} ❌ 已中止: {} (保留 {} 道题)",
            ctx,
            reason,
            result.items.len()
        ),
    }
}
