#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = korrigo::run_worker().await {
        eprintln!("korrigo-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
