use clap::Parser;

use tgs_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	tgs_worker::run(Args::parse()).await
}
