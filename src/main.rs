use clap::Parser;
use spax::config::{Cli, Config};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::from_args(&cli);
    spax::run(config).await;
}
