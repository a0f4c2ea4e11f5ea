use std::{path::PathBuf, process, sync::Arc};

use anyhow::Context as _;
use hefl_core::crypto::{EncryptionContext, PublicContext};
use hefl_server::{
    rest,
    settings::Settings,
    state_machine::initializer::{load_initial_model, StateMachineInitializer},
};
use structopt::StructOpt;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, StructOpt)]
#[structopt(name = "Coordinator")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        api: api_settings,
        round: round_settings,
        evaluation: evaluation_settings,
        context: context_settings,
        model: model_settings,
        log: log_settings,
    } = settings;

    FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let context = PublicContext::load(&context_settings.public_context).with_context(|| {
        format!(
            "failed to load the public context from {}",
            context_settings.public_context.display()
        )
    })?;
    info!(
        "loaded the public context {} with {} slots",
        context.fingerprint(),
        context.slot_count()
    );

    let mut initializer = StateMachineInitializer::new(
        round_settings,
        evaluation_settings,
        context_settings.block_capacity,
        Arc::new(context),
    );
    if let Some(path) = model_settings.initial {
        let parameters = load_initial_model(&path)
            .with_context(|| format!("failed to load the initial model from {}", path.display()))?;
        initializer = initializer.with_initial_model(parameters);
    }
    let (state_machine, request_tx, event_subscriber) = initializer
        .init()
        .context("failed to initialize the state machine")?;

    let mut server = tokio::spawn(rest::serve(api_settings, event_subscriber, request_tx));

    tokio::select! {
        _ = state_machine.run() => {
            info!("deployment terminated: serving the final model until interrupted");
        }
        _ = &mut server => {
            warn!("shutting down: REST server terminated");
            return Ok(());
        }
        _ = signal::ctrl_c() => {
            warn!("shutting down: interrupted");
            return Ok(());
        }
    }

    tokio::select! {
        _ = server => {
            warn!("shutting down: REST server terminated");
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
