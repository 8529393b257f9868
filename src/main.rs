use anyhow::{Context, Result};
use log::warn;
use md2epub::cli::{init_logging, parse_args};
use md2epub::run_md2epub;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let Some(config) = parse_args()? else {
        init_logging(0);
        warn!("No book title given, nothing to do");
        std::process::exit(1);
    };
    init_logging(config.verbosity);

    let written = run_md2epub(&config)
        .await
        .with_context(|| format!("Failed to build {:?}", config.title))?;
    println!("{}", written.display());
    Ok(())
}
