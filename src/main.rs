#[tokio::main]
async fn main() {
    // Tracing is installed by the CLI once operator mode is known.
    if let Err(e) = stepwise::cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
