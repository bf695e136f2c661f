#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crm_autorefresh::cli::run().await
}
