use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = hostgate::cli::Cli::parse();
    if let Err(e) = hostgate::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
