use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tradedge_cli::run_app().await
}
