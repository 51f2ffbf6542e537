use std::process;
use std::sync::Arc;

use serde_json::json;

use msgmux::config::AppConfig;
use msgmux::logging::{LogLevel, Logger, LoggerConfig};
use msgmux::server::{Reactor, ReactorSettings};
use msgmux::shutdown::ShutdownHooks;
use msgmux::storage::{StorageFacade, Store};
use msgmux::utils::runtime::ensure_posix_or_exit;
use msgmux::utils::startup_banner::print_startup_banner;
use msgmux::utils::timing::measure_execution;
use msgmux::workers::{WorkerPool, WorkerPoolConfig};

fn main() {
    ensure_posix_or_exit();
    print_startup_banner();

    let app_config = load_config_or_exit();
    let log_level =
        LogLevel::from_config_value(&app_config.logging.level).unwrap_or_else(|| {
            eprintln!(
                "invalid logging.level '{}'. Allowed values: error, warn, info, debug, verbose",
                app_config.logging.level
            );
            process::exit(2);
        });

    let logger = Arc::new(Logger::new(LoggerConfig {
        min_level: log_level,
        human_friendly: app_config.logging.human_friendly,
    }));

    let storage = measure_execution("storage.initialize", Some("main::storage"), &logger, || {
        StorageFacade::initialize(&app_config, &logger)
    })
    .map(Arc::new)
    .unwrap_or_else(|error| {
        eprintln!("storage initialization error: {error}");
        process::exit(2);
    });

    let settings = ReactorSettings::from_app_config(&app_config).unwrap_or_else(|error| {
        eprintln!("server configuration error: {error}");
        process::exit(2);
    });
    let mut reactor = Reactor::bind(&settings, Arc::clone(&logger)).unwrap_or_else(|error| {
        eprintln!("server startup error: {error}");
        process::exit(2);
    });
    logger.log(
        LogLevel::Info,
        Some("main::server"),
        &format!(
            "{} v{} listening",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        Some(json!({
            "bind_address": reactor.local_addr().to_string(),
            "host": app_config.server.host,
            "port": app_config.server.port,
            "framing": settings.framing.as_str(),
        })),
    );

    let pool_config = WorkerPoolConfig::from_app_config(&app_config).unwrap_or_else(|error| {
        eprintln!("worker pool configuration error: {error}");
        process::exit(2);
    });
    let store: Arc<dyn Store> = storage.clone();
    let pool = WorkerPool::start(pool_config, store, reactor.outbound(), Arc::clone(&logger))
        .unwrap_or_else(|error| {
            eprintln!("worker pool startup error: {error}");
            process::exit(2);
        });

    let shutdown_hooks = ShutdownHooks::install(reactor.handle()).unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });
    logger.info(
        Some("main::shutdown"),
        "Shutdown hooks installed for SIGINT/SIGTERM",
    );

    let run_result = reactor.run(pool.dispatcher());

    logger.log(
        LogLevel::Info,
        Some("main::shutdown"),
        "Starting graceful shutdown",
        Some(json!({ "signal": shutdown_hooks.uninstall() })),
    );
    pool.shutdown();
    if let Err(error) = storage.flush() {
        logger.error(
            Some("main::shutdown"),
            &format!("storage flush failed during shutdown: {error}"),
        );
    }

    if let Err(error) = run_result {
        logger.flush();
        eprintln!("reactor error: {error}");
        process::exit(2);
    }
    logger.info(Some("main::shutdown"), "Shutdown completed");
    logger.flush();
}

fn load_config_or_exit() -> AppConfig {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}
