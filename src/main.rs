use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use v2mgr::api::{self, ApiState};
use v2mgr::cli::{Cli, Command};
use v2mgr::config::Config;
use v2mgr::manager::Manager;
use v2mgr::storage::Store;
use v2mgr::{logging, metrics};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config_load_error: {e:#}");
            return ExitCode::from(2);
        }
    };
    let _ = logging::init(cfg.log_level());

    match cli.command {
        Command::ConfigTest => config_test(&cfg),
        Command::Run => run_daemon(cfg).await,
        Command::Status => status(cfg),
        Command::Reprobe { id } => reprobe(cfg, &id).await,
        Command::Rollback { id } => rollback(cfg, &id),
    }
}

fn config_test(cfg: &Config) -> ExitCode {
    match cfg.validate() {
        Ok(()) => {
            println!("config ok");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("config_invalid: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn open_store(cfg: &Config) -> Result<Arc<Store>, ExitCode> {
    match Store::open(&cfg.db_path()) {
        Ok(s) => Ok(Arc::new(s)),
        Err(e) => {
            error!("db_open path={} err={e}", cfg.db_path().display());
            Err(ExitCode::from(2))
        }
    }
}

async fn run_daemon(cfg: Config) -> ExitCode {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let metrics_handle = metrics::install();

    let store = match open_store(&cfg) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let manager = match Manager::new(cfg.clone(), store) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!("manager_init err={e:#}");
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown_signal");
            cancel.cancel();
        });
    }

    // the API outliving a bind failure is fine; the loop is the service
    {
        let state = ApiState::new(Arc::clone(&manager), metrics_handle);
        let listen = cfg.service.http_listen.clone();
        let healthz_path = cfg.service.healthz_path.clone();
        let metrics_path = cfg.service.metrics_path.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            match TcpListener::bind(&listen).await {
                Ok(listener) => {
                    info!("api_listen addr={listen}");
                    if let Err(e) =
                        api::serve(listener, state, &healthz_path, &metrics_path, cancel).await
                    {
                        error!("api_serve err={e:#}");
                    }
                }
                Err(e) => error!("api_bind addr={listen} err={e}"),
            }
        });
    }

    info!(
        "manager_start listen={} dry_run={} allow_delete={}",
        cfg.service.http_listen, cfg.service.dry_run, cfg.security.allow_delete
    );
    manager.run(cancel).await;
    ExitCode::SUCCESS
}

fn status(cfg: Config) -> ExitCode {
    let store = match open_store(&cfg) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let manager = match Manager::new(cfg, store) {
        Ok(m) => m,
        Err(e) => {
            error!("manager_init err={e:#}");
            return ExitCode::from(2);
        }
    };
    match manager.status() {
        Ok(s) => {
            println!(
                "configs: {} total, {} active, {} quarantined, {} deleted",
                s.total, s.active, s.quarantined, s.deleted
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("status err={e}");
            ExitCode::FAILURE
        }
    }
}

async fn reprobe(cfg: Config, id: &str) -> ExitCode {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let store = match open_store(&cfg) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let manager = match Manager::new(cfg, store) {
        Ok(m) => m,
        Err(e) => {
            error!("manager_init err={e:#}");
            return ExitCode::from(2);
        }
    };
    match manager.reprobe(id).await {
        Ok(dec) => {
            println!(
                "action={} reason={} failure_lb={:.6}",
                dec.action.as_str(),
                dec.reason,
                dec.failure_lb
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("reprobe_failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn rollback(cfg: Config, id: &str) -> ExitCode {
    let store = match open_store(&cfg) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let manager = match Manager::new(cfg, store) {
        Ok(m) => m,
        Err(e) => {
            error!("manager_init err={e:#}");
            return ExitCode::from(2);
        }
    };
    match manager.rollback(id) {
        Ok(()) => {
            println!("rolled_back id={id}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("rollback_failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("sigterm_hook_failed err={e}");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
