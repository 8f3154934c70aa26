#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = korrigo::run().await {
        eprintln!("korrigo fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
