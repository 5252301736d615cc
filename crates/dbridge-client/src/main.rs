//! dbridge binary entry point.
//!
//! Thin host around the client library: lists runtimes, runs shell
//! commands, sets up forwards and stops the server.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info};

use dbridge_client::cli::{Cli, Command};
use dbridge_client::{
    CommandRunner, PortForwarder, Runtime, RuntimeDirectory, ServerProcess, ShellExecutor,
};
use dbridge_core::BridgeConfig;

fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = dbridge_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "dbridge starting");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("dbridge: failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(cli)) {
        error!(error = %e, "command failed");
        eprintln!("dbridge: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> dbridge_core::Result<()> {
    let config = cli.bridge_config()?;

    match cli.command {
        Command::Devices { watch, json } => devices(config, watch, json).await,
        Command::Shell { device, command } => {
            ServerProcess::new(config.clone()).start().await?;
            let output = ShellExecutor::new(config.endpoint.clone())
                .run(&device, &command.join(" "))
                .await?;
            print!("{}", output);
            std::io::stdout().flush()?;
            Ok(())
        }
        Command::Forward { device, socket } => {
            ServerProcess::new(config.clone()).start().await?;
            let forwarder = PortForwarder::new(CommandRunner::new(config.endpoint.clone()));
            let port = forwarder.prepare(&device, &socket).await?;
            println!("{}", port);
            Ok(())
        }
        Command::KillServer => ServerProcess::new(config).kill().await,
    }
}

async fn devices(config: BridgeConfig, watch: bool, json: bool) -> dbridge_core::Result<()> {
    // Give the first discovery passes time to find something.
    let deadline = Instant::now() + config.reconcile_interval * 3;
    let server = Arc::new(ServerProcess::new(config.clone()));
    let directory = RuntimeDirectory::new(config, server);

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Runtime>>();
    directory.register_listener(move |runtimes: &[Runtime]| {
        let _ = tx.send(runtimes.to_vec());
    });

    let result = if watch {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break Ok(()),
                update = rx.recv() => match update {
                    Some(runtimes) => {
                        if let Err(e) = print_runtimes(&runtimes, json) {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },
            }
        }
    } else {
        let mut latest = Vec::new();
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                update = rx.recv() => match update {
                    Some(runtimes) if !runtimes.is_empty() => {
                        latest = runtimes;
                        break;
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        print_runtimes(&latest, json)
    };

    directory.shutdown().await;
    result
}

fn print_runtimes(runtimes: &[Runtime], json: bool) -> dbridge_core::Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        serde_json::to_writer(&mut out, runtimes).map_err(std::io::Error::from)?;
        writeln!(out)?;
    } else if runtimes.is_empty() {
        writeln!(out, "no runtimes")?;
    } else {
        for runtime in runtimes {
            writeln!(out, "{}\t{}\t{}", runtime.id, runtime.name, runtime.kind)?;
        }
    }
    out.flush()?;
    Ok(())
}
