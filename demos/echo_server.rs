//! Example embedding application: a PING/PONG line handler registered with `muster` directly,
//! bypassing the `musterd` binary's default echo handler and config-file loading.
//!
//! Run with `cargo run --example echo_server` once this file is wired into `Cargo.toml` as an
//! `[[example]]` target (kept out of `Cargo.toml` by default in this tree since `muster` itself
//! ships `musterd` as its primary binary).

use std::rc::Rc;

use muster::{registration, Config};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn main() {
    let mut config = Config::default();
    config.worker_processes = 2;
    config.listen_port = 9000;

    let handler: Rc<muster::worker::RequestHandlerFn> = Rc::new(|stream| Box::pin(handle(stream)));
    let registration = registration::register_project(
        Some(Box::new(|| {
            println!("master starting up");
            Ok(())
        })),
        Some(Rc::new(|| {
            println!("worker {} ready", std::process::id());
            Ok(())
        })),
        handler,
    );

    if let Err(e) = muster::run(&config, registration, None) {
        eprintln!("echo_server: {e}");
        std::process::exit(1);
    }
}

async fn handle(stream: tokio::net::TcpStream) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = if line.trim() == "PING" { "PONG\n" } else { "?\n" };
        if writer.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}
