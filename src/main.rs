//! Mgmt Controller 主程序入口

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mgmt_controller::app::main().await
}
