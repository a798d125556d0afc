use clap::Parser;
use color_eyre::Result;
use sensor_bridge::{cli, config::Config, logging, pipeline::Pipeline, server};

use tracing::{debug, error, info, Level};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::hangup())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    futures::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(cli::Commands::Examples(example)) = &cli.command {
        match example {
            cli::Examples::Config => println!("{}", Config::example().serialize_pretty()?),
        }

        return Ok(());
    }

    logging::init(cli.trace_dir.clone().map(|dir| (Level::DEBUG, dir))).await;

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    info!(?config, "Starting");

    let pipeline = Pipeline::from_config(&config);
    pipeline.start().await;

    let app = server::router(pipeline.clone(), &config.static_dir);

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
            Ok(())
        }
        _ = hangup() => {
            info!("Told to hang up, quitting");
            Ok(())
        }
        result = server::run_on_port(app, config.http_port) => {
            error!(?result, "Server returned");
            Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"))
        }
    };

    pipeline.stop().await?;

    outcome
}
