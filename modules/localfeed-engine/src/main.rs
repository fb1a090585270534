use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use localfeed_common::{prefix_keywords, FeedConfig};
use localfeed_geo::GeoIndex;

#[derive(Parser)]
#[command(name = "localfeed", about = "Inspect city ranges and keyword generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List catalog cities within range of a position, nearest first
    Nearby {
        /// Path to the city catalog JSON
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Radius in miles; defaults to the configured nearby radius
        #[arg(long)]
        radius: Option<f64>,
    },
    /// Print the search keywords stored for a piece of text
    Keywords { text: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("localfeed=info".parse()?))
        .init();

    dotenvy::dotenv().ok();
    let config = FeedConfig::from_env()?;

    match Cli::parse().command {
        Command::Nearby { catalog, lat, lng, radius } => {
            config.log_summary();
            let index = GeoIndex::load(&catalog).await?;
            let radius = radius.unwrap_or(config.nearby_radius_miles);
            let hits = index.nearby_with_distance(lat, lng, radius);
            info!(cities = index.len(), radius, hits = hits.len(), "Resolved range");
            for (city, miles) in hits {
                println!("{:>8.2} mi  {}  {} ({})", miles, city.id, city.display_name, city.region_code);
            }
        }
        Command::Keywords { text } => {
            let fields: Vec<&str> = text.iter().map(String::as_str).collect();
            for keyword in prefix_keywords(&fields) {
                println!("{keyword}");
            }
        }
    }

    Ok(())
}
