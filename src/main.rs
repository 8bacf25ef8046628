use clap::Parser;

use ticker::app::{init_logging, AppContext};
use ticker::cli::{commands, Cli, Commands};
use ticker::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.basedir.as_deref())?;
    config.init()?;
    init_logging(&config.log_path())?;
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Run => commands::run(&ctx).await?,
        Commands::Add { url, name, interval } => {
            commands::add_feed(&ctx, &url, name, interval).await?;
        }
        Commands::List { items, limit } => {
            if items {
                commands::list_items(&ctx, limit).await?;
            } else {
                commands::list_feeds(&ctx).await?;
            }
        }
        Commands::Search { query } => commands::search(&ctx, &query).await?,
        Commands::Archive { item_id } => commands::archive_item(&ctx, item_id).await?,
        Commands::Train => commands::train(&ctx).await?,
        Commands::Maintain => commands::maintain(&ctx).await?,
        Commands::RebuildIndex => commands::rebuild_index(&ctx).await?,
    }

    Ok(())
}
