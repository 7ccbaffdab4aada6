use mogiwire::SmtpServer;
use std::env;
use std::sync::mpsc;
use std::thread;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    let addr = if args.len() > 1 {
        args[1].as_str()
    } else {
        "127.0.0.1:2525"
    };

    let hostname = if args.len() > 2 {
        args[2].as_str()
    } else {
        "mogiwire.local"
    };

    info!(%addr, %hostname, "starting MogiWire SMTP receiver");

    let (tx, rx) = mpsc::channel::<mogiwire::Email>();
    let server = SmtpServer::new(hostname);

    thread::spawn(move || {
        let mut count = 0;
        while let Ok(email) = rx.recv() {
            count += 1;
            info!(
                count,
                from = %email.from,
                to = ?email.to,
                subject = email.get_subject().unwrap_or(""),
                "received email"
            );
        }
    });

    if let Err(e) = server.start(addr, tx) {
        error!("failed to start server: {e}");
        std::process::exit(1);
    }
}
