#[tokio::main]
async fn main() -> anyhow::Result<()> {
    moat_gateway::server::run().await
}
