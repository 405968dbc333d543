//! 批量累加器 - 流程层
//!
//! 核心职责：为"一个章节"反复发起生成调用，直到题目数达标
//!
//! 停止条件（按优先级）：
//! 1. 累计题目数达到目标 → 完成
//! 2. 调用次数达到上限 → 部分完成
//! 3. 不可恢复的错误（密钥耗尽、文件被拒绝、文件读写失败）→ 中止
//!
//! 生成失败和无法识别的回复都算作"零产出"，连续 3 次零产出提前中止。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{Credential, GenerationRequest, GenerativeBackend, SamplingParams};
use crate::models::mcq::{mcq_id, slug, Mcq, McqDraft, Provenance};
use crate::models::unit_result::{UnitResult, UnitStatus};
use crate::models::work_unit::WorkUnit;
use crate::services::prompt::{continuation_instruction, full_instruction};
use crate::services::response_parser::parse_response;
use crate::services::retry::Escalation;
use crate::services::upload_gate::AssetSlot;
use crate::workflow::unit_ctx::UnitCtx;

/// 连续零产出的上限
const ZERO_YIELD_LIMIT: usize = 3;

/// 累加器参数
#[derive(Debug, Clone)]
pub struct AccumulatorSettings {
    pub max_per_call: usize,
    pub max_attempts: usize,
    pub inter_call_delay: Duration,
    pub sampling: SamplingParams,
    pub debug_dir: Option<PathBuf>,
    pub quality_score: f32,
    pub reviewed: bool,
}

impl AccumulatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_per_call: config.max_per_call,
            max_attempts: config.max_attempts,
            inter_call_delay: config.inter_call_delay(),
            sampling: SamplingParams::from_config(config),
            debug_dir: config.debug_dir.clone(),
            quality_score: config.quality_score,
            reviewed: config.reviewed,
        }
    }
}

/// 单次调用的产出
enum AttemptYield {
    Items(Vec<McqDraft>, usize),
    Nothing,
}

/// 批量累加器
pub struct BatchAccumulator {
    backend: Arc<dyn GenerativeBackend>,
    escalation: Escalation,
    settings: AccumulatorSettings,
}

impl BatchAccumulator {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        escalation: Escalation,
        settings: AccumulatorSettings,
    ) -> Self {
        Self {
            backend,
            escalation,
            settings,
        }
    }

    /// 为一个章节生成题目
    ///
    /// 不可恢复的错误会被转换为 `Aborted` 状态，已生成的题目保留在结果中
    pub async fn run(
        &self,
        ctx: &UnitCtx,
        unit: &WorkUnit,
        slot: &AssetSlot,
        credential: &mut Credential,
    ) -> UnitResult {
        let target = unit.target;
        let mut drafts: Vec<McqDraft> = Vec::new();
        let mut attempts = 0;
        let mut dropped = 0;
        let mut zero_streak = 0;

        let status = loop {
            if drafts.len() >= target {
                break UnitStatus::Completed;
            }
            if attempts >= self.settings.max_attempts {
                break UnitStatus::Partial;
            }
            if zero_streak >= ZERO_YIELD_LIMIT {
                break UnitStatus::Aborted(format!("连续 {} 次调用没有产出", ZERO_YIELD_LIMIT));
            }

            if attempts > 0 && !self.settings.inter_call_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_call_delay).await;
            }
            attempts += 1;

            let count = self.settings.max_per_call.min(target - drafts.len());
            let instruction = if attempts == 1 {
                full_instruction(&unit.subject, &unit.name, count)
            } else {
                continuation_instruction(&unit.subject, &unit.name, count, drafts.len())
            };

            info!(
                "{} 🤖 第 {}/{} 次调用，请求 {} 道题",
                ctx, attempts, self.settings.max_attempts, count
            );

            match self
                .attempt(ctx, unit, slot, credential, instruction, attempts)
                .await
            {
                Ok(AttemptYield::Items(items, lost)) => {
                    dropped += lost;
                    if items.is_empty() {
                        zero_streak += 1;
                    } else {
                        zero_streak = 0;
                    }
                    drafts.extend(items);
                    info!("{} ✓ 累计 {}/{} 道题", ctx, drafts.len(), target);
                }
                Ok(AttemptYield::Nothing) => {
                    zero_streak += 1;
                }
                Err(e) => {
                    error!("{} ❌ 章节中止: {}", ctx, e);
                    break UnitStatus::Aborted(e.to_string());
                }
            }
        };

        let items = self.number_items(unit, drafts);
        UnitResult {
            unit: unit.clone(),
            items,
            attempts,
            dropped,
            status,
        }
    }

    /// 发起一次调用并解析
    ///
    /// 返回 `Err` 表示不可恢复的错误
    async fn attempt(
        &self,
        ctx: &UnitCtx,
        unit: &WorkUnit,
        slot: &AssetSlot,
        credential: &mut Credential,
        instruction: String,
        attempt: usize,
    ) -> AppResult<AttemptYield> {
        let sampling = self.settings.sampling;
        let reply = self
            .escalation
            .execute(credential, "生成", |cred| {
                let backend = self.backend.clone();
                let instruction = instruction.clone();
                async move {
                    let asset = slot.ensure(&cred).await?;
                    let request = GenerationRequest {
                        instruction,
                        asset: Some(asset),
                        sampling,
                    };
                    Ok::<String, AppError>(backend.generate(&cred, &request).await?)
                }
            })
            .await;

        let text = match reply {
            Ok(text) => text,
            Err(AppError::GenerationFailed { cause }) => {
                warn!("{} ⚠️ 本次生成失败: {}", ctx, cause);
                return Ok(AttemptYield::Nothing);
            }
            Err(e) => return Err(e),
        };

        match parse_response(&text) {
            Ok(batch) => {
                if batch.items.is_empty() {
                    warn!("{} ⚠️ 回复中没有可用的题目", ctx);
                    self.dump_raw(unit, attempt, &text).await;
                } else if batch.dropped > 0 {
                    warn!("{} ⚠️ 丢弃 {} 条不合格记录", ctx, batch.dropped);
                }
                Ok(AttemptYield::Items(batch.items, batch.dropped))
            }
            Err(AppError::UnrecoverableFormat { excerpt }) => {
                warn!("{} ⚠️ 无法识别的回复: {}", ctx, excerpt);
                self.dump_raw(unit, attempt, &text).await;
                Ok(AttemptYield::Nothing)
            }
            Err(e) => Err(e),
        }
    }

    /// 按生成顺序编号 1..N
    fn number_items(&self, unit: &WorkUnit, drafts: Vec<McqDraft>) -> Vec<Mcq> {
        let created_date = chrono::Utc::now().to_rfc3339();
        let source = unit.source_file_name();

        drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let provenance = Provenance {
                    source: source.clone(),
                    created_date: created_date.clone(),
                    ai_generated: true,
                    reviewed: self.settings.reviewed,
                    quality_score: self.settings.quality_score,
                };
                Mcq::new(mcq_id(&unit.subject, &unit.name, i + 1), draft, provenance)
            })
            .collect()
    }

    /// 把无法解析的原始回复写入调试目录
    async fn dump_raw(&self, unit: &WorkUnit, attempt: usize, text: &str) {
        let Some(dir) = &self.settings.debug_dir else {
            return;
        };
        let path = dir.join(format!(
            "{}_{}_attempt{}.txt",
            slug(&unit.subject),
            slug(&unit.name),
            attempt
        ));

        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, text).await
        }
        .await;
        match result {
            Ok(()) => info!("📝 原始回复已保存: {}", path.display()),
            Err(e) => warn!("⚠️ 保存原始回复失败 {}: {}", path.display(), e),
        }
    }
}
