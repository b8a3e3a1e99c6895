#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rubricon_rust::run().await {
        eprintln!("rubricon-rust fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
