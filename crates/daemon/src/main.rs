// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `wfd`: the webforge worker-plane daemon.

use fs2::FileExt;
use std::fs::File;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wf_adapters::{ProcessAgent, StaticSitePublisher};
use wf_daemon::{env, Daemon, DaemonPaths};
use wf_engine::PipelineConfig;

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("wfd: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let paths = DaemonPaths::new(env::state_dir());
    std::fs::create_dir_all(&paths.state_dir)?;
    std::fs::create_dir_all(env::log_dir())?;

    let file_appender = tracing_appender::rolling::daily(env::log_dir(), "wfd.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .init();

    // Single instance per state directory
    let lock_file = File::create(paths.lock_file())?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| "another wfd instance holds the state directory")?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let config = PipelineConfig::from_env();
        let agent = ProcessAgent::new(env::agent_binary());
        let publisher = StaticSitePublisher::new(env::preview_base_url());

        let daemon = Daemon::start(paths, config, agent, publisher)?;
        info!("wfd up");

        tokio::signal::ctrl_c().await?;
        daemon.shutdown()?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
