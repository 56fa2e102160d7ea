use redberry::config::Config;
use redberry::state::AppState;
use redberry::{logging, server};
use std::env;
use std::process::exit;
use std::sync::Arc;

fn main() {
    logging::init();

    let args: Vec<String> = env::args().collect();
    let mut config = Config::default();
    if args.len() == 2 {
        if let Err(e) = config.load_file(&args[1]) {
            eprintln!("failed to load config file {}: {e}", args[1]);
            exit(1);
        }
    } else if args.len() > 2 {
        eprintln!("Usage: redberry-server [/path/to/redberry.conf]");
        exit(1);
    } else {
        tracing::warn!("no config file specified, using the default configuration");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(async_main(config));
}

async fn async_main(config: Config) {
    let dir = config.dir.clone();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::error!(dir = %dir.display(), error = %e, "failed to create data directory");
        exit(1);
    }

    let state = Arc::new(AppState::new(config));

    let passwd_path = state.config.read().unwrap().passwd_path();
    match std::fs::read(&passwd_path) {
        Ok(bytes) if !bytes.is_empty() => {
            if state.users.load_from(&bytes).is_none() {
                tracing::warn!(path = %passwd_path.display(), "user store file is corrupt, starting fresh");
            }
        }
        _ => {}
    }
    if !state.users.exists("admin") {
        let admin_password = state.config.read().unwrap().admin_password.clone();
        state.bootstrap_default_admin(&admin_password);
        if let Err(e) = std::fs::write(&passwd_path, state.users.serialize()) {
            tracing::warn!(error = %e, "failed to persist bootstrapped user store");
        }
    }

    server::bootstrap_databases(&state);

    tracing::info!("redberry is ready to accept connections");
    if let Err(e) = server::run(state).await {
        tracing::error!(error = %e, "server exited with error");
        exit(1);
    }
}
