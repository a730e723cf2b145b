use std::io::{self, Write};

use color_eyre::{eyre::eyre, Result};
use dsh::{
    config::{Config, Invocation, RunMode},
    process::stream::Streams,
    remote::Client,
    repl,
    server::Server,
    session::{Mode, Session},
};
use tracing_subscriber::prelude::*;

#[macro_use]
extern crate tracing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::load(&args)? {
        Invocation::Run(config) => config,
        Invocation::Help(usage) => {
            print!("{usage}");
            return Ok(());
        }
    };

    let (writer, _guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        &config.log_dir,
        "dsh.log",
    ));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_error::ErrorLayer::default())
        .init();

    color_eyre::install()?;

    trace!(?config, "loaded configuration");

    match config.mode {
        RunMode::Local => run_local().await,
        RunMode::Server => run_server(&config).await,
        RunMode::Client => run_client(&config).await,
    }
}

async fn run_local() -> Result<()> {
    info!("starting local session");

    tokio::task::spawn_blocking(|| {
        let mut session = Session::current(Mode::Local)?;
        repl::run(
            io::stdin().lock(),
            io::stdout(),
            &Streams::terminal(),
            &mut session,
        )
    })
    .await??;

    Ok(())
}

async fn run_server(config: &Config) -> Result<()> {
    let addr = config.address()?;
    let server = Server::bind(addr, config.concurrency()).await?;
    let handle = server.handle();

    println!(
        "dsh server listening on {} ({})",
        server.local_addr()?,
        config.concurrency()
    );

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => handle.stop(),
            Err(err) => warn!("failed to listen for ctrl-c: {err}"),
        }
    });

    server.run().await?;
    Ok(())
}

async fn run_client(config: &Config) -> Result<()> {
    let addr = config.address()?;

    tokio::task::spawn_blocking(move || {
        let mut client = Client::connect(addr)
            .map_err(|err| eyre!("failed to connect to {addr}: {err}"))?;
        client.run_loop(io::stdin().lock(), io::stdout())?;
        io::stdout().flush()?;
        Ok::<_, color_eyre::Report>(())
    })
    .await??;

    Ok(())
}
