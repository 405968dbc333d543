use anyhow::Result;
use batch_mcq::{logger, App, AppError, Config};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    // 配置文件路径：MCQ_CONFIG 或第一个命令行参数
    let config_path = std::env::var("MCQ_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .map(PathBuf::from);

    // 加载配置
    let config = Config::load(config_path.as_deref())?;

    // 初始化日志
    logger::init(config.verbose_logging);

    // 初始化并运行应用
    let summary = App::initialize(config).await?.run().await?;

    if summary.pool_exhausted {
        return Err(AppError::PoolExhausted.into());
    }

    Ok(())
}
