//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, DaemonAction, PairingAction};
use std::path::Path;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace).await,
        Commands::Daemon { action } => handle_daemon(action, workspace, config_path).await,
        Commands::Pairing { action } => handle_pairing(action, workspace).await,
    }
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".quantumclaw");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = quantumclaw_core::AgentConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!("created default configuration at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = quantumclaw_core::config::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{toml_str}");
            Ok(())
        }
    }
}

async fn handle_daemon(
    action: DaemonAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    #[cfg(target_os = "macos")]
    use quantumclaw_core::daemon::install_launchd_plist;
    #[cfg(target_os = "linux")]
    use quantumclaw_core::daemon::install_systemd_service;
    use quantumclaw_core::daemon::check_daemon_running;

    match action {
        DaemonAction::Start => {
            if let Some(pid) = check_daemon_running(workspace) {
                println!("daemon already running (pid {pid})");
                return Ok(());
            }

            // Invoked directly: this is the service manager re-entering the
            // binary via ExecStart/ProgramArguments, so run the daemon loop
            // in the foreground rather than re-installing the service.
            if std::env::var_os("QUANTUMCLAW_FOREGROUND").is_some() {
                return run_foreground(workspace, config_path).await;
            }

            let bin = std::env::current_exe()?;
            #[cfg(target_os = "macos")]
            install_launchd_plist(&bin)?;
            #[cfg(target_os = "linux")]
            install_systemd_service(&bin)?;
            println!("daemon service installed; starting via service manager");
            Ok(())
        }
        DaemonAction::Stop => {
            match check_daemon_running(workspace) {
                Some(pid) => {
                    #[cfg(unix)]
                    {
                        // SIGTERM lets the bootstrap controller run its reverse-order shutdown.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                    println!("sent stop signal to daemon (pid {pid})");
                }
                None => println!("daemon is not running"),
            }
            Ok(())
        }
        DaemonAction::Status => match check_daemon_running(workspace) {
            Some(pid) => {
                println!("daemon running (pid {pid})");
                Ok(())
            }
            None => {
                println!("daemon is not running");
                Ok(())
            }
        },
        DaemonAction::Restart => {
            Box::pin(handle_daemon(DaemonAction::Stop, workspace, config_path)).await?;
            Box::pin(handle_daemon(DaemonAction::Start, workspace, config_path)).await
        }
    }
}

/// Run the daemon itself: load config, bootstrap subsystems, and block until
/// a shutdown signal arrives. This is what the installed launchd/systemd
/// unit actually executes.
async fn run_foreground(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    use quantumclaw_core::boot::Bootstrapper;
    use quantumclaw_core::daemon::RustantDaemon;

    // An explicit `--config <path>` is read up front and applied as a full
    // override layer, the same way `load_config`'s own tests pass an
    // in-memory `AgentConfig` as the highest-priority source.
    let explicit_override = config_path
        .map(|path| {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
            toml::from_str::<quantumclaw_core::AgentConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
        })
        .transpose()?;

    let config =
        quantumclaw_core::config::load_config(Some(workspace), explicit_override.as_ref())
            .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    let mut daemon = RustantDaemon::new(config.daemon.clone().unwrap_or_default(), workspace.to_path_buf());
    daemon.start().await.map_err(|e| anyhow::anyhow!("failed to start daemon: {e}"))?;

    let (stages, handles) = crate::stages::build_stages(workspace.to_path_buf(), config);

    let mut bootstrapper = Bootstrapper::new(workspace.to_path_buf());
    for stage in stages {
        bootstrapper.push(stage);
    }
    if let Err(diagnosis) = bootstrapper.run_all().await {
        tracing::error!("{diagnosis}");
        crate::stages::shutdown_background_tasks(&handles).await;
        let _ = daemon.stop().await;
        return Err(anyhow::anyhow!("{diagnosis}"));
    }

    tracing::info!(
        level = %bootstrapper.context().degradation_level(),
        "daemon ready"
    );

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown signal received");
    bootstrapper.shutdown(std::time::Duration::from_secs(10)).await;
    crate::stages::shutdown_background_tasks(&handles).await;
    daemon.stop().await.map_err(|e| anyhow::anyhow!("failed to stop daemon: {e}"))?;
    Ok(())
}

async fn handle_pairing(action: PairingAction, workspace: &Path) -> anyhow::Result<()> {
    use quantumclaw_core::pairing::PairingStore;

    let store = PairingStore::load(workspace)?;
    match action {
        PairingAction::List => {
            let pending = store.pending();
            if pending.is_empty() {
                println!("no pending pairing requests");
            }
            for req in pending {
                println!(
                    "{}  channel={}  user={}  created_at={}",
                    req.code, req.channel, req.username, req.created_at
                );
            }
            Ok(())
        }
        PairingAction::Approve { code } => {
            let request = store.approve(&code)?;
            quantumclaw_core::config::approve_pairing_user(
                workspace,
                &request.channel,
                &request.user_id,
            )?;
            println!("approved pairing request {code}");
            Ok(())
        }
        PairingAction::Deny { code } => {
            store.deny(&code)?;
            println!("denied pairing request {code}");
            Ok(())
        }
    }
}
