use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chainmux_core::{Chain, ResponseHandler, TransportError};
use chainmux_manager::{
    ChainSource, ConnectionManager, InboundPortMessage, LightClient, OutboundPortMessage, Port,
    WellKnownChain,
};
use chainmux_ws::{serve, WsPort, WsPortConfig, WsPortListener};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn listener() -> (WsPortListener, SocketAddr) {
    let listener = WsPortListener::bind("127.0.0.1:0", WsPortConfig::default())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn open(listener: &WsPortListener, addr: SocketAddr, path: &str) -> (Arc<WsPort>, Client) {
    let url = format!("ws://{addr}/{path}");
    let (client, port) = tokio::join!(tokio_tungstenite::connect_async(url), listener.accept());
    (port.unwrap(), client.unwrap().0)
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return text;
        }
    }
}

async fn expect_closed(client: &mut Client) {
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket was not closed");
}

#[tokio::test]
async fn path_and_query_name_the_port() {
    let (listener, addr) = listener().await;

    let (port, _client) = open(&listener, addr, "my-app::westend?tab=9").await;
    assert_eq!(port.name(), "my-app::westend");
    assert_eq!(port.sender().tab_id, 9);
    assert!(port.sender().url.starts_with("127.0.0.1:"));

    let (first, _a) = open(&listener, addr, "a::westend").await;
    let (second, _b) = open(&listener, addr, "b::westend").await;
    assert_ne!(first.sender().tab_id, second.sender().tab_id);
}

#[tokio::test]
async fn frames_sent_before_handlers_are_kept() {
    let (listener, addr) = listener().await;
    let (port, mut client) = open(&listener, addr, "my-app::westend").await;

    client
        .send(Message::Text(r#"{"type":"spec","payload":"westend"}"#.into()))
        .await
        .unwrap();
    client
        .send(Message::Text(r#"{"type":"rpc","payload":"{}"}"#.into()))
        .await
        .unwrap();
    client.send(Message::Text("not json".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    port.on_message(Box::new(move |message| {
        let _ = tx.send(message);
    }));

    assert_eq!(
        rx.recv().await.unwrap(),
        InboundPortMessage::Spec {
            payload: "westend".into(),
            parachain_payload: None,
        }
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        InboundPortMessage::Rpc {
            payload: "{}".into()
        }
    );
}

#[tokio::test]
async fn posted_messages_become_text_frames() {
    let (listener, addr) = listener().await;
    let (port, mut client) = open(&listener, addr, "my-app::westend").await;

    port.post_message(OutboundPortMessage::Rpc {
        payload: r#"{"jsonrpc":"2.0","id":1,"result":"ok"}"#.into(),
    });
    port.post_message(OutboundPortMessage::Error {
        payload: "boom".into(),
    });

    let first: serde_json::Value = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(first["type"], "rpc");
    assert_eq!(first["payload"], r#"{"jsonrpc":"2.0","id":1,"result":"ok"}"#);
    assert_eq!(
        next_text(&mut client).await,
        r#"{"type":"error","payload":"boom"}"#
    );
}

#[tokio::test]
async fn client_close_runs_disconnect_handlers() {
    let (listener, addr) = listener().await;
    let (port, mut client) = open(&listener, addr, "my-app::westend").await;
    let (tx, rx) = oneshot::channel();
    port.on_disconnect(Box::new(move || {
        let _ = tx.send(());
    }));

    client.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(port.is_disconnected());
}

#[tokio::test]
async fn disconnect_closes_the_socket_silently() {
    let (listener, addr) = listener().await;
    let (port, mut client) = open(&listener, addr, "my-app::westend").await;
    let (tx, mut rx) = oneshot::channel();
    port.on_disconnect(Box::new(move || {
        let _ = tx.send(());
    }));

    port.disconnect();

    expect_closed(&mut client).await;
    assert!(port.is_disconnected());
    assert!(rx.try_recv().is_err());

    // Posting after close is a no-op.
    port.post_message(OutboundPortMessage::Error {
        payload: "late".into(),
    });
}

struct NoChains;

#[async_trait]
impl LightClient for NoChains {
    async fn add_chain(
        &self,
        _chain_spec: &str,
        _relay_chain: Option<&ChainSource>,
        _on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError> {
        Err(TransportError::ChainCreation("no chains".into()))
    }

    async fn add_well_known_chain(
        &self,
        _chain: WellKnownChain,
        _on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError> {
        Err(TransportError::ChainCreation("no chains".into()))
    }
}

#[tokio::test]
async fn serve_registers_and_rejects_ports() {
    let (listener, addr) = listener().await;
    let manager = ConnectionManager::new(Arc::new(NoChains));
    let server = tokio::spawn(serve(listener, manager.clone()));

    let (mut rejected, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/invalid"))
        .await
        .unwrap();
    assert_eq!(
        next_text(&mut rejected).await,
        r#"{"type":"error","payload":"Invalid port name invalid expected <app_name>::<chain_name>"}"#
    );
    expect_closed(&mut rejected).await;

    let (mut accepted, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/my-app::westend?tab=3"))
            .await
            .unwrap();
    let mut registered = false;
    for _ in 0..100 {
        if manager.registered_apps() == ["my-app::westend"] {
            registered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(registered);
    assert_eq!(manager.state().apps[0].tab_id, 3);

    accepted.close(None).await.unwrap();
    for _ in 0..100 {
        if manager.registered_apps().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(manager.registered_apps().is_empty());

    server.abort();
}

#[tokio::test]
async fn stalled_handshake_does_not_block_other_clients() {
    let (listener, addr) = listener().await;
    let manager = ConnectionManager::new(Arc::new(NoChains));
    let server = tokio::spawn(serve(listener, manager.clone()));

    // Connects but never sends the upgrade request.
    let _stalled = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (_client, _) = tokio::time::timeout(
        Duration::from_secs(2),
        tokio_tungstenite::connect_async(format!("ws://{addr}/my-app::westend")),
    )
    .await
    .expect("handshake blocked behind a stalled client")
    .unwrap();
    let mut registered = false;
    for _ in 0..100 {
        if manager.registered_apps() == ["my-app::westend"] {
            registered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(registered);

    server.abort();
}

#[tokio::test]
async fn handshake_times_out() {
    let config = WsPortConfig {
        handshake_timeout: Duration::from_millis(50),
        ..WsPortConfig::default()
    };
    let listener = WsPortListener::bind("127.0.0.1:0", config).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let _stalled = TcpStream::connect(addr).await.unwrap();
    let accepted = tokio::time::timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("handshake timeout not applied");
    assert!(matches!(
        accepted,
        Err(chainmux_ws::WsPortError::HandshakeTimeout { .. })
    ));
}
