use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = talos::cli::Cli::parse();
    if let Err(err) = talos::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
