use anyhow::Result;
use iframe_harvester::utils::logging;
use iframe_harvester::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env()?;

    // 初始化日志，之后再限制配置范围，调整时的警告才能写进日志
    logging::init(&config.output_log_file)?;
    let config = config.clamped();

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
