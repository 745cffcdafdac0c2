use color_eyre::eyre::{Context, Result, eyre};
use echorpc::common::{ScriptedPeer, TestServer, create_controlled_test_server_with_limit, spawn_test_server};
use echorpc::server::{RequestStream, ResponseSink};
use echorpc::wire::Frame;
use echorpc::{
    CallDetails, EchoClient, EchoError, EchoServer, InterceptorChain, LoggingInterceptor, Message,
    MetadataInterceptor, PassThrough, ServerConfig, StreamHandler, run_session,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

async fn start_server() -> Result<TestServer> {
    create_controlled_test_server_with_limit(100)
        .await
        .wrap_err("Failed to start test server")
}

fn numbered(count: usize) -> Vec<Message> {
    (0..count).map(|n| Message::new(format!("message: {n}"))).collect()
}

#[tokio::test]
async fn test_session_echoes_in_order() -> Result<()> {
    let server = start_server().await?;
    let client = EchoClient::new(server.addr).with_interceptor(PassThrough);

    let messages = vec![Message::new("a"), Message::new("b"), Message::new("c")];
    let responses = run_session(client.echo(), messages.clone(), None).await?;

    assert_eq!(responses, messages);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_empty_session() -> Result<()> {
    let server = start_server().await?;
    let client = EchoClient::new(server.addr);

    let responses = run_session(client.echo(), Vec::new(), None).await?;

    assert!(responses.is_empty());
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_paced_session() -> Result<()> {
    let server = start_server().await?;
    let client = EchoClient::new(server.addr).with_interceptor(PassThrough);

    let messages = numbered(20);
    let responses = run_session(client.echo(), messages.clone(), Some(Duration::from_millis(1))).await?;

    assert_eq!(responses, messages);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_large_session() -> Result<()> {
    let server = start_server().await?;
    let client = EchoClient::new(server.addr).with_interceptor(PassThrough);

    let messages = numbered(5_000);
    let responses = run_session(client.echo(), messages.clone(), None).await?;

    assert_eq!(responses.len(), 5_000);
    assert_eq!(responses, messages);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_sessions() -> Result<()> {
    let server = start_server().await?;
    let client = EchoClient::new(server.addr).with_interceptor(PassThrough);

    let mut sessions = Vec::new();
    for session in 0..10 {
        let client = client.clone();
        sessions.push(tokio::spawn(async move {
            let messages: Vec<Message> = (0..100)
                .map(|n| Message::new(format!("session {session} message {n}")))
                .collect();
            let responses = run_session(client.echo(), messages.clone(), None).await?;
            Ok::<_, EchoError>(responses == messages)
        }));
    }

    for session in sessions {
        assert!(session.await??, "session responses out of order");
    }
    info!("All concurrent sessions completed");
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_pass_through_matches_no_interceptor() -> Result<()> {
    let server = start_server().await?;
    let plain = EchoClient::new(server.addr);
    let wrapped = EchoClient::new(server.addr).with_chain(
        InterceptorChain::new()
            .with(PassThrough)
            .with(PassThrough)
            .with(PassThrough),
    );

    let plain_responses = run_session(plain.echo(), numbered(50), None).await?;
    let wrapped_responses = run_session(wrapped.echo(), numbered(50), None).await?;

    assert_eq!(plain_responses, wrapped_responses);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_logging_interceptor_observes_session() -> Result<()> {
    let server = start_server().await?;
    let logging = LoggingInterceptor::new();
    let stats = logging.stats();
    let client = EchoClient::new(server.addr).with_interceptor(logging);

    run_session(client.echo(), numbered(25), None).await?;
    run_session(client.echo(), numbered(5), None).await?;

    assert_eq!(stats.started(), 2);
    assert_eq!(stats.established(), 2);
    assert_eq!(stats.sent(), 30);
    assert_eq!(stats.received(), 30);
    server.shutdown().await?;
    Ok(())
}

/// Replies once with the caller's `x-client` metadata, then echoes
struct WhoAmI;

#[async_trait::async_trait]
impl StreamHandler for WhoAmI {
    async fn handle(&self, requests: &mut RequestStream, responses: &mut ResponseSink) -> echorpc::Result<()> {
        let caller = requests.metadata().get("x-client").cloned().unwrap_or_default();
        responses.send(Message::new(caller)).await?;
        while let Some(request) = requests.next_request().await? {
            responses.send(request).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_metadata_interceptor_reaches_server() -> Result<()> {
    let server = spawn_test_server(
        EchoServer::new(ServerConfig::default()).with_handler("/whoami.WhoAmI/Echo", WhoAmI),
    )
    .await?;
    let client = EchoClient::new(server.addr)
        .with_interceptor(PassThrough)
        .with_interceptor(MetadataInterceptor::new("x-client", "integration"));

    let responses = run_session(
        client.call(CallDetails::new("/whoami.WhoAmI/Echo")),
        vec![Message::new("ping")],
        None,
    )
    .await?;

    assert_eq!(responses, vec![Message::new("integration"), Message::new("ping")]);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_method_fails_session() -> Result<()> {
    let server = start_server().await?;
    let client = EchoClient::new(server.addr);

    let result = run_session(
        client.call(CallDetails::new("/echo.EchoService/Missing")),
        numbered(3),
        None,
    )
    .await;

    assert!(matches!(result, Err(EchoError::ConnectionFailed(_))));
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_fails_session() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let result = run_session(EchoClient::new(addr).echo(), numbered(3), None).await;

    assert!(matches!(result, Err(EchoError::ConnectionFailed(_))));
    Ok(())
}

#[tokio::test]
async fn test_server_closing_mid_session() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (received_tx, received_rx) = oneshot::channel::<()>();

    let peer = tokio::spawn(async move {
        let mut peer = ScriptedPeer::accept(&listener).await?;
        for _ in 0..2 {
            match peer.recv().await? {
                Some(frame @ Frame::Message(_)) => peer.send(frame).await?,
                other => return Err(eyre!("expected a message, got {other:?}")),
            }
        }
        // Close only once the client saw both echoes
        let _ = received_rx.await;
        Ok::<_, color_eyre::Report>(())
    });

    let client = EchoClient::new(addr).with_interceptor(PassThrough);
    let call = client.echo();
    call.write("a").await?;
    call.write("b").await?;
    assert_eq!(call.next_message().await?, Some(Message::new("a")));
    assert_eq!(call.next_message().await?, Some(Message::new("b")));
    let _ = received_tx.send(());
    peer.await??;

    for text in ["c", "d", "e"] {
        // the connection is gone, so these may or may not be accepted
        let _ = call.write(text).await;
    }

    assert!(matches!(call.next_message().await, Err(EchoError::TransportBroken(_))));
    assert!(matches!(call.done().await, Err(EchoError::TransportBroken(_))));
    Ok(())
}

#[tokio::test]
async fn test_dropped_session_does_not_block_shutdown() -> Result<()> {
    let server = start_server().await?;
    let client = EchoClient::new(server.addr);

    let call = client.echo();
    call.write("abandoned").await?;
    assert_eq!(call.next_message().await?, Some(Message::new("abandoned")));
    drop(call);

    tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .wrap_err("server did not drain after the client went away")??;
    Ok(())
}
