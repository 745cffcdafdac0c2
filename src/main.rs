use color_eyre::eyre::{Result, WrapErr, eyre};
use echorpc::{
    ClientConfig, EchoClient, EchoServer, Message, PassThrough, RpcServer, ServerConfig,
    run_session,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 50051;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("echorpc=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let no_interceptor = args.iter().any(|arg| arg == "--no-interceptor");
    let positional: Vec<&String> = args.iter().skip(1).filter(|arg| !arg.starts_with("--")).collect();

    let mode = positional
        .first()
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "server".to_string());

    match mode.as_str() {
        "server" => {
            let port = match positional.get(1) {
                Some(port) => port
                    .parse::<u16>()
                    .wrap_err_with(|| format!("Invalid port: {port}"))?,
                None => DEFAULT_PORT,
            };

            let config = ServerConfig {
                bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
                max_connections: 1000,
                ..Default::default()
            };

            info!(address = %config.bind_addr, max_connections = config.max_connections, "Starting echo RPC server");

            let server = EchoServer::new(config);
            server.run().await.wrap_err("Failed to run echo RPC server")?;
        }
        "client" => {
            let addr: SocketAddr = match positional.get(1) {
                Some(addr) => addr
                    .parse()
                    .wrap_err_with(|| format!("Invalid server address: {addr}"))?,
                None => SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            };
            let count = match positional.get(2) {
                Some(count) => count
                    .parse::<usize>()
                    .wrap_err_with(|| format!("Invalid message count: {count}"))?,
                None => 1000,
            };
            let interval = match positional.get(3) {
                Some(ms) => ms
                    .parse::<u64>()
                    .wrap_err_with(|| format!("Invalid interval: {ms}"))?,
                None => 1,
            };

            let mut client = EchoClient::with_config(addr, ClientConfig::default());
            if !no_interceptor {
                client = client.with_interceptor(PassThrough);
            }

            info!(%addr, count, interval_ms = interval, interceptors = client.chain().len(), "Starting echo session");

            let messages = (0..count).map(|n| Message::new(format!("message: {n}")));
            let interval = (interval > 0).then(|| Duration::from_millis(interval));
            let responses = run_session(client.echo(), messages, interval)
                .await
                .wrap_err("Echo session failed")?;

            if responses.len() != count {
                return Err(eyre!(
                    "expected {} responses, received {}",
                    count,
                    responses.len()
                ));
            }
            info!(received = responses.len(), "Echo session finished");
        }
        _ => {
            let program = &args[0];
            eprintln!("Usage: {program} [server|client] [options]");
            eprintln!("  server [port]                                   Serve the echo service (default port {DEFAULT_PORT})");
            eprintln!("  client [addr] [count] [interval_ms] [--no-interceptor]");
            eprintln!("                                                  Stream messages and drain the echoes");
            eprintln!();
            eprintln!("Examples:");
            eprintln!("  {program} server 50051                  # Start the server on port 50051");
            eprintln!("  {program} client 127.0.0.1:50051 1000 1 # Send 1000 messages, 1ms apart");
            eprintln!("  {program} client --no-interceptor       # Same, without the pass-through interceptor");
            std::process::exit(1);
        }
    }

    Ok(())
}
