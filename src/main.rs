#[tokio::main]
async fn main() -> anyhow::Result<()> {
    draftpad::cli::run().await
}
