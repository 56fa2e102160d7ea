//! The listener loop: plaintext and TLS acceptors, per-connection
//! read-dispatch-write tasks, and the background maintenance tickers
//! (active expiry, snapshot triggers, AOF `everysec` flush) that the
//! teacher's single-threaded `ae` event loop drove from one thread
//! (spec.md §4.1, §4.4, §4.5). Generalized onto tokio tasks since the
//! redesigned engine is multi-threaded (spec.md §9).

use crate::client::Client;
use crate::commands;
use crate::persistence::{aof, rdb};
use crate::protocol::{self, Reply};
use crate::state::AppState;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::rustls::{self, pki_types::PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

/// Loads each database's on-disk state at startup: a snapshot file if
/// present, otherwise replaying the append-only log (spec.md §4.4, §4.5 —
/// AOF takes precedence only when both exist and `aof_enabled` is set,
/// since the log is the more complete record while enabled).
pub fn bootstrap_databases(state: &Arc<AppState>) {
    let cfg = state.config.read().unwrap().clone();
    for (index, db) in state.dbs.iter().enumerate() {
        if cfg.aof_enabled {
            let path = cfg.aof_path(index);
            let client_id = state.next_client_id();
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut replay_client = Client::new(client_id, tx);
            replay_client.db_index = index;
            replay_client.is_admin = true;
            replay_client.authenticated = true;
            if let Err(e) = aof::replay_file(&path, &cfg, |args| {
                let _ = commands::execute_queued(state, &mut replay_client, &args);
            }) {
                tracing::warn!(db = index, error = %e, "append-only log replay failed");
            }
        } else {
            let path = cfg.rdb_path(index);
            match rdb::load_snapshot(&path, &cfg) {
                Ok(Some(entries)) => {
                    db.write(|inner| {
                        for (key, entry) in entries {
                            inner.set(key, entry);
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(db = index, error = %e, "snapshot load failed"),
            }
        }
        if cfg.aof_enabled {
            match aof::AofWriter::open(&cfg.aof_path(index), &cfg) {
                Ok(writer) => *state.aof[index].lock().unwrap() = Some(writer),
                Err(e) => tracing::warn!(db = index, error = %e, "failed to open append-only log"),
            }
        }
    }
}

/// Runs the plaintext and (if configured) TLS listeners until the process is
/// asked to shut down. Background tickers run alongside on their own tasks.
pub async fn run(state: Arc<AppState>) -> io::Result<()> {
    let cfg = state.config.read().unwrap().clone();

    let bind_addr = if cfg.bind.is_empty() {
        vec![std::net::IpAddr::from([0, 0, 0, 0])]
    } else {
        cfg.bind.clone()
    };

    let mut tasks = tokio::task::JoinSet::new();

    for addr in &bind_addr {
        let listener = TcpListener::bind((*addr, cfg.port)).await?;
        tracing::info!(addr = %addr, port = cfg.port, "listening");
        let state = state.clone();
        tasks.spawn(accept_loop(listener, state, None));
    }

    if let (Some(tls_port), Some(cert_path), Some(key_path)) = (cfg.tls_port, &cfg.tls_cert, &cfg.tls_key) {
        let acceptor = build_tls_acceptor(cert_path, key_path)?;
        for addr in &bind_addr {
            let listener = TcpListener::bind((*addr, tls_port)).await?;
            tracing::info!(addr = %addr, port = tls_port, "listening (tls)");
            let state = state.clone();
            tasks.spawn(accept_loop(listener, state, Some(acceptor.clone())));
        }
    }

    tasks.spawn(active_expire_ticker(state.clone()));
    tasks.spawn(snapshot_ticker(state.clone()));
    tasks.spawn(aof_flush_ticker(state.clone()));
    tasks.spawn(shutdown_signal_task(state.clone()));

    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            tracing::error!(error = %e, "background task panicked");
        }
    }

    final_persist(&state).await;
    Ok(())
}

/// Runs once every listener and connection has drained (spec.md §4.8): a
/// last snapshot and append-only sync per database so nothing acknowledged
/// before shutdown is lost.
async fn final_persist(state: &Arc<AppState>) {
    let cfg = state.config.read().unwrap().clone();
    for (index, db) in state.dbs.iter().enumerate() {
        let path = cfg.rdb_path(index);
        let snapshot = db.read(|inner| inner.clone());
        let cfg = cfg.clone();
        let result = tokio::task::spawn_blocking(move || rdb::save_snapshot(&path, &snapshot, &cfg, crate::db::now_ms())).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(db = index, error = %e, "final snapshot failed"),
            Err(e) => tracing::warn!(db = index, error = %e, "final snapshot task panicked"),
        }
        if let Some(writer) = state.aof[index].lock().unwrap().as_mut() {
            if let Err(e) = writer.force_sync() {
                tracing::warn!(db = index, error = %e, "final append-only sync failed");
            }
        }
    }
}

fn build_tls_acceptor(cert_path: &std::path::Path, key_path: &std::path::Path) -> io::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(std::fs::File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut io::BufReader::new(std::fs::File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, PrivateKeyDer::from(key))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn accept_loop(listener: TcpListener, state: Arc<AppState>, tls: Option<TlsAcceptor>) {
    let mut shutdown_rx = state.shutdown_rx.clone();
    loop {
        let (socket, peer) = tokio::select! {
            res = listener.accept() => match res {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
            _ = shutdown_rx.changed() => {
                tracing::debug!("listener closing for shutdown");
                return;
            }
        };
        let _ = socket.set_nodelay(true);
        let state = state.clone();
        let tls = tls.clone();
        let client_id = state.next_client_id();
        let registry_state = state.clone();
        let handle = tokio::spawn(async move {
            state.stats.connections_received.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let result = if let Some(acceptor) = tls {
                match acceptor.accept(socket).await {
                    Ok(stream) => handle_connection(stream, state.clone(), client_id).await,
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "tls handshake failed");
                        state.connections.remove(client_id);
                        return;
                    }
                }
            } else {
                handle_connection(socket, state.clone(), client_id).await
            };
            if let Err(e) = result {
                tracing::debug!(peer = %peer, error = %e, "connection closed");
            }
            state.connections.remove(client_id);
        });
        registry_state.connections.insert(client_id, handle);
    }
}

/// Drives one connection: a reader half parses request frames and dispatches
/// them; a writer half drains `client.out`, which both the dispatch return
/// value and asynchronous pub/sub and `MONITOR` fan-out feed into (spec.md
/// §4.7, §4.8's "single writer per socket" requirement).
async fn handle_connection<S>(stream: S, state: Arc<AppState>, client_id: u64) -> io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let (tx, mut rx) = mpsc::unbounded_channel::<Reply>();
    let mut client = Client::new(client_id, tx);
    let mut shutdown_rx = state.shutdown_rx.clone();

    let writer_task = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            if protocol::write_reply(&mut write_half, &reply).await.is_err() {
                break;
            }
            let _ = write_half.flush().await;
        }
    });

    loop {
        let request = tokio::select! {
            res = protocol::read_request(&mut reader) => match res {
                Ok(Some(args)) if !args.is_empty() => args,
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    let _ = client.out.send(Reply::error(format!("ERR Protocol error: {e}")));
                    break;
                }
            },
            _ = shutdown_rx.changed() => {
                let _ = client.out.send(Reply::error("ERR server is shutting down".to_string()));
                break;
            }
        };

        let quit = request[0].eq_ignore_ascii_case(b"QUIT");
        let reply = commands::dispatch(&state, &mut client, request);
        if client.out.send(reply).is_err() || quit {
            break;
        }
    }

    ctx_cleanup(&state, &client);
    drop(client);
    let _ = writer_task.await;
    Ok(())
}

fn ctx_cleanup(state: &Arc<AppState>, client: &Client) {
    state.pubsub.unsubscribe_all(client.id);
    state.monitors.remove(client.id);
    for (db_index, _) in &client.watched_keys {
        if let Some(db) = state.dbs.get(*db_index) {
            db.unwatch_all(&client.tx_failed);
        }
    }
}

const EXPIRE_TICK: Duration = Duration::from_millis(100);
const EXPIRE_SAMPLE_SIZE: usize = 20;

async fn active_expire_ticker(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(EXPIRE_TICK);
    loop {
        interval.tick().await;
        if state.shutting_down.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        for db in state.dbs.iter() {
            let removed = db.active_expire_cycle(EXPIRE_SAMPLE_SIZE, crate::db::now_ms());
            if removed > 0 {
                state.stats.expired_keys.fetch_add(removed as u64, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }
}

async fn snapshot_ticker(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if state.shutting_down.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        for (index, trackers) in state.trackers.iter().enumerate() {
            let due = trackers.iter().any(|t| t.poll());
            if !due {
                continue;
            }
            if state.bgsave_in_progress[index].swap(true, std::sync::atomic::Ordering::SeqCst) {
                continue;
            }
            let cfg = state.config.read().unwrap().clone();
            let path = cfg.rdb_path(index);
            if let Some(db) = state.dbs.get(index) {
                let snapshot = db.read(|inner| inner.clone());
                let state = state.clone();
                tokio::spawn(async move {
                    let result =
                        tokio::task::spawn_blocking(move || rdb::save_snapshot(&path, &snapshot, &cfg, crate::db::now_ms())).await;
                    state.bgsave_in_progress[index].store(false, std::sync::atomic::Ordering::SeqCst);
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(db = index, error = %e, "scheduled snapshot failed"),
                        Err(e) => tracing::warn!(db = index, error = %e, "scheduled snapshot task panicked"),
                    }
                });
            } else {
                state.bgsave_in_progress[index].store(false, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }
}

async fn aof_flush_ticker(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if state.shutting_down.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        for writer in &state.aof {
            if let Some(writer) = writer.lock().unwrap().as_mut() {
                if let Err(e) = writer.tick_flush() {
                    tracing::warn!(error = %e, "append-only flush failed");
                }
            }
        }
    }
}

/// Waits for `ctrl_c`, then flips the shutdown flag, wakes every connection's
/// read loop, and awaits their drain before returning (spec.md §4.8).
async fn shutdown_signal_task(state: Arc<AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining connections");
    state.begin_shutdown().await;
    tracing::info!("connections drained");
}
