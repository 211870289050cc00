use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, header};
use futures::{SinkExt, StreamExt};
use hearth_core::Scope;
use hearth_transport::{
    Method, Router, Server, ServerConfig, ServerState, StatusCode, TransportError, app, handler_fn,
};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn ephemeral() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0)
}

fn ws_url(addr: SocketAddr, path: &str) -> String {
    format!("ws://{addr}{path}")
}

#[tokio::test]
async fn test_ping_route() {
    let router = Router::default();
    router
        .get("/ping", handler_fn(|_req| async { Ok::<_, Infallible>("pong") }))
        .unwrap();
    let app = app(router);

    let response = app
        .clone()
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "pong");

    let response = app
        .clone()
        .oneshot(Request::post("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");

    let response = app
        .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_json_body_reaches_handler() {
    let router = Router::default();
    router
        .post(
            "/echo/:id",
            handler_fn(|req| async move {
                let value: serde_json::Value = req.json()?;
                let id = req.param("id").unwrap_or("?");
                Ok::<_, serde_json::Error>(format!("{id}:{}", value["n"]))
            }),
        )
        .unwrap();
    let app = app(router);

    let response = app
        .clone()
        .oneshot(
            Request::post("/echo/7")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"n":42}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "7:42");

    let response = app
        .oneshot(
            Request::post("/echo/7")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let router = Router::new(ServerConfig::default().with_max_body_size(8));
    router
        .post("/upload", handler_fn(|_req| async { Ok::<_, Infallible>("stored") }))
        .unwrap();

    let response = app(router)
        .oneshot(
            Request::post("/upload")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("far more than eight bytes"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_handler_failure_is_500() {
    let router = Router::default();
    router
        .get("/broken", handler_fn(|_req| async { Err::<&str, _>("database offline") }))
        .unwrap();
    router
        .get("/fine", handler_fn(|_req| async { Ok::<_, Infallible>("fine") }))
        .unwrap();
    let app = app(router);

    let response = app
        .clone()
        .oneshot(Request::get("/broken").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app
        .oneshot(Request::get("/fine").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_websocket_accept_and_reject() {
    let router = Router::new(ephemeral());
    let chat = router.ws("/chat/:room").unwrap();
    let server = Server::bind(router).await.unwrap();
    let addr = server.local_addr();
    assert_eq!(server.state(), ServerState::Bound);

    let (mut client, _) = connect_async(ws_url(addr, "/chat/general")).await.unwrap();
    wait_for(|| chat.len() == 1).await;
    assert_eq!(chat.sockets()[0].path(), "/chat/general");

    assert_eq!(chat.broadcast("welcome"), 1);
    let message = client.next().await.unwrap().unwrap();
    assert_eq!(message.to_text().unwrap(), "welcome");

    let (mut rejected, _) = connect_async(ws_url(addr, "/other")).await.unwrap();
    match rejected.next().await {
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(chat.len(), 1);

    client.close(None).await.unwrap();
    wait_for(|| chat.is_empty()).await;

    server.shutdown().await;
    assert_eq!(server.state(), ServerState::Closed);
}

#[tokio::test]
async fn test_websocket_incoming_messages() {
    let router = Router::new(ephemeral());
    router
        .ws_with("/echo", |socket, _req| {
            let socket = socket.clone();
            let Some(mut incoming) = socket.take_incoming() else {
                return;
            };
            tokio::spawn(async move {
                while let Some(message) = incoming.recv().await {
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
            });
        })
        .unwrap();
    let server = Server::bind(router).await.unwrap();

    let (mut client, _) = connect_async(ws_url(server.local_addr(), "/echo"))
        .await
        .unwrap();
    client.send(WsMessage::text("marco")).await.unwrap();
    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "marco");

    server.shutdown().await;
}

#[tokio::test]
async fn test_closing_layer_closes_sockets() {
    let router = Router::new(ephemeral());
    let layer = router.ws("/feed").unwrap();
    let server = Server::bind(router.clone()).await.unwrap();

    let (mut client, _) = connect_async(ws_url(server.local_addr(), "/feed"))
        .await
        .unwrap();
    wait_for(|| layer.len() == 1).await;
    let socket = layer.sockets().remove(0);

    assert!(layer.close());
    assert!(socket.is_closed());
    assert!(router.layers().is_empty());
    match client.next().await {
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => panic!("unexpected frame {other:?}"),
    }

    let (mut late, _) = connect_async(ws_url(server.local_addr(), "/feed"))
        .await
        .unwrap();
    match late.next().await {
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => panic!("unexpected frame {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_scope_teardown_removes_routes_and_layers() {
    let router = Router::new(ephemeral());
    router
        .get("/health", handler_fn(|_req| async { Ok::<_, Infallible>("ok") }))
        .unwrap();

    let scope = Scope::new("plugin");
    let scoped = router.scoped(&scope);
    scoped
        .get("/r1", handler_fn(|_req| async { Ok::<_, Infallible>("r1") }))
        .unwrap();
    let layer = scoped.ws("/l1").unwrap();
    let server = Server::bind(router.clone()).await.unwrap();

    let (_client, _) = connect_async(ws_url(server.local_addr(), "/l1"))
        .await
        .unwrap();
    wait_for(|| layer.len() == 1).await;

    scope.dispose();
    assert!(layer.is_closed());

    let response = app(router.clone())
        .oneshot(Request::get("/r1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app(router.clone())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (mut rejected, _) = connect_async(ws_url(server.local_addr(), "/l1"))
        .await
        .unwrap();
    match rejected.next().await {
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => panic!("unexpected frame {other:?}"),
    }

    scope.dispose();
    assert_eq!(router.routes().len(), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_second_server_on_same_address_is_rejected() {
    let first = Server::bind(Router::new(ephemeral())).await.unwrap();
    let port = first.local_addr().port();

    let err = Server::bind(Router::new(ServerConfig::new("127.0.0.1", port)))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::AlreadyBound { .. }));

    first.shutdown().await;
    first.shutdown().await;
}

#[tokio::test]
async fn test_bound_port_is_reflected_in_urls() {
    let router = Router::new(ephemeral());
    let server = Server::bind(router.clone()).await.unwrap();
    let port = server.local_addr().port();
    assert_eq!(
        router.absolute_url("/status"),
        format!("http://127.0.0.1:{port}/status")
    );
    assert!(router.routes().is_empty());
    assert_eq!(Method::GET.as_str(), "GET");
    server.shutdown().await;
}
