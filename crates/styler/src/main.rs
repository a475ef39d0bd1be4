pub mod config;

use config::StylerConfig;
use config_rs::{Config, File};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "styler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        warn!("expected exactly one parameter, the config file.");
        warn!("got {}", args.join(","));
        std::process::exit(2);
    }

    let cfg_name = args[1].as_str();
    let config_res = Config::builder()
        .add_source(File::with_name(cfg_name))
        .build()
        .and_then(|config| config.try_deserialize::<StylerConfig>());

    match config_res {
        Ok(config) => {
            info!("styler starting up!");
            if let Some(ref name) = config.metadata.name {
                info!("name: {name}")
            }
            if let Some(ref descrip) = config.metadata.description {
                info!("description: {descrip}")
            }
            match config.start().await {
                Ok(_) => info!("styler shut down!"),
                Err(err) => {
                    error!("styler exited with an error: {}", err);
                    std::process::exit(1);
                }
            }
        }
        Err(err) => {
            error!("failed to parse config {}: {:?}", cfg_name, err);
            std::process::exit(2);
        }
    }
}
