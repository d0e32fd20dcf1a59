#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forward_gate::server::run().await
}
