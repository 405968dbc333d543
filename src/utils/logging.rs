use anyhow::Result;
/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use std::fs;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::work_unit::WorkUnit;
use crate::services::output_store::InventoryReport;
use crate::workflow::unit_ctx::UnitCtx;

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n题目生成日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config, key_count: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量题目生成模式");
    info!("🤖 模型: {}", config.model_name);
    info!("🔑 可用密钥: {}", key_count);
    info!(
        "🎯 每章目标: {} 道题 (单次最多 {} 道，最多 {} 次调用)",
        config.target_per_unit, config.max_per_call, config.max_attempts
    );
    info!("📁 教材目录: {}", config.books_dir.display());
    info!("💾 输出目录: {}", config.output_dir.display());
    info!("{}", "=".repeat(60));
}

/// 记录章节加载信息
///
/// # 参数
/// - `total`: 章节总数
/// - `workers`: 并发数
pub fn log_units_loaded(total: usize, workers: usize) {
    info!("✓ 找到 {} 个待处理的章节", total);
    info!("📋 并发处理数: {}", workers);
    info!("💡 同一章节内的调用按顺序进行\n");
}

/// 记录章节开始处理
pub fn log_unit_start(ctx: &UnitCtx, unit: &WorkUnit) {
    info!(
        "{} 📄 开始处理 ({:.1} MB，目标 {} 道题)",
        ctx,
        unit.size_mb(),
        unit.target
    );
}

/// 运行统计
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStats {
    pub total: usize,
    pub completed: usize,
    pub partial: usize,
    pub aborted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// 本次运行生成的题目数
    pub items: usize,
}

/// 打印最终统计信息
pub fn print_final_stats(stats: &RunStats, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 完成: {}/{}", stats.completed, stats.total);
    info!("🟡 部分完成: {}", stats.partial);
    info!("❌ 中止: {}", stats.aborted);
    info!("⏭️ 跳过: {}", stats.skipped);
    if stats.failed > 0 {
        info!("💥 异常: {}", stats.failed);
    }
    info!("📝 本次生成题目: {}", stats.items);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 打印输出目录的库存报告
pub fn log_inventory(report: &InventoryReport) {
    info!("\n{}", "=".repeat(60));
    info!("📦 题库库存");
    info!("{}", "=".repeat(60));
    for subject in &report.subjects {
        let marker = if subject.deficit() == 0 { "✅" } else { "🟡" };
        info!(
            "{} {}: {} 道题 / 目标 {} ({} 个章节)",
            marker, subject.subject, subject.total, subject.target, subject.units
        );
    }
    info!("合计: {} 道题", report.grand_total());

    for subject in report.deficits() {
        warn!("⚠️ {} 还差 {} 道题", subject.subject, subject.deficit());
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
