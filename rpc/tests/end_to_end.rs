//! End-to-end coverage over a real listener: HTTP and WebSocket JSON-RPC,
//! subscriptions, raw paths, raw WebSocket sessions and the protocol
//! multiplexer.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uniport_core::channel::Channel;
use uniport_rpc::client::{dial, BatchElem, ClientOptions, JsonRpcOptions, SubscriptionSink, WsFrame, WsMode};
use uniport_rpc::context::RequestContext;
use uniport_rpc::error::Error;
use uniport_rpc::message::SubscriptionNotice;
use uniport_rpc::server::{
    raw_handler, raw_ws_handler, HttpMethod, Method, RawResponse, Server, ServerOptions, Service,
};

#[derive(Serialize, Deserialize, Default)]
struct Params {
    a: i64,
    b: i64,
}

#[derive(Deserialize, Debug, PartialEq)]
struct SubPayload {
    dt: String,
}

fn arithmetic_service() -> Service {
    Service::new("rpc")
        .method(
            "Add",
            Method::new(|_ctx: RequestContext, params: Params| async move {
                Ok(params.a + params.b)
            }),
        )
        .method(
            "Add2",
            Method::new(|_ctx: RequestContext, params: Params| async move {
                if (params.a + params.b) % 100 == 0 {
                    Err(uniport_rpc::error::RpcError::with_data(
                        -32000,
                        "bad param",
                        "aha error",
                    ))
                } else {
                    Ok(params.a + params.b)
                }
            }),
        )
        .method(
            "Sub",
            Method::new(|ctx: RequestContext, _params: Value| async move {
                let notifier = match ctx.rpc_notifier() {
                    Some(notifier) => notifier,
                    None => {
                        return Err(uniport_rpc::error::RpcError::new(
                            -32001,
                            "subscriptions require a websocket session",
                        ))
                    }
                };
                let subscription = notifier.id().to_string();
                let task_notifier = notifier.clone();
                tokio::spawn(async move {
                    for tick in 0..20 {
                        tokio::time::sleep(Duration::from_millis(25)).await;
                        let notice = SubscriptionNotice::new(
                            "Sub",
                            task_notifier.id(),
                            json!({"dt": format!("tick-{tick}")}),
                        );
                        if task_notifier.notify(&notice).is_err() {
                            break;
                        }
                    }
                });
                Ok(subscription)
            }),
        )
}

async fn start_server() -> (Arc<Server>, SocketAddr) {
    let server = Server::new(ServerOptions {
        addr: "127.0.0.1:0".to_string(),
        cluster_name: "e2e".to_string(),
        enable_inner_service: true,
        ..ServerOptions::default()
    });
    server.register_rpc(arithmetic_service()).unwrap();
    server
        .register_path(
            HttpMethod::Get,
            "/v1/get",
            raw_handler(|_ctx: RequestContext, _body| async move {
                RawResponse::text(200, "hello world")
            }),
        )
        .unwrap();
    server
        .register_path(
            HttpMethod::Post,
            "/v1/post",
            raw_handler(|_ctx: RequestContext, body| async move {
                let body = body.map(|bytes| bytes.to_vec()).unwrap_or_default();
                RawResponse::new(200, "application/octet-stream", body)
            }),
        )
        .unwrap();
    server.register_raw_ws(raw_ws_handler(|ctx: RequestContext, msg| async move {
        if let Some(notifier) = ctx.raw_notifier() {
            notifier.write(msg).ok();
        }
    }));

    let addr = server.bind().await.unwrap();
    let run = server.clone();
    tokio::spawn(async move { run.run().await });
    wait_until_accepting(addr).await;
    (server, addr)
}

async fn wait_until_accepting(addr: SocketAddr) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server at {addr} never became reachable");
}

fn jsonrpc_options() -> ClientOptions {
    ClientOptions {
        jsonrpc: Some(JsonRpcOptions::default()),
        ..ClientOptions::default()
    }
}

#[tokio::test]
async fn http_single_call_success() {
    let (_server, addr) = start_server().await;
    let client = dial(&format!("http://{addr}/_jsonrpc_"), jsonrpc_options())
        .await
        .unwrap();
    let result: i64 = client
        .call("rpc.Add", Some(Params { a: 100, b: 200 }))
        .await
        .unwrap();
    assert_eq!(result, 300);
}

#[tokio::test]
async fn http_handler_error_surfaces_verbatim() {
    let (_server, addr) = start_server().await;
    let client = dial(&format!("http://{addr}/_jsonrpc_"), jsonrpc_options())
        .await
        .unwrap();
    let err = client
        .call::<i64, _>("rpc.Add2", Some(Params { a: 50, b: 50 }))
        .await
        .unwrap_err();
    match err {
        Error::Rpc(rpc_err) => {
            assert_eq!(rpc_err.code, -32000);
            assert_eq!(rpc_err.message, "bad param");
            assert_eq!(rpc_err.data, Some(Value::String("aha error".to_string())));
        }
        other => panic!("expected rpc error, got {other}"),
    }
}

#[tokio::test]
async fn http_batch_call_populates_elements_in_order() {
    let (_server, addr) = start_server().await;
    let client = dial(&format!("http://{addr}/_jsonrpc_"), jsonrpc_options())
        .await
        .unwrap();
    let mut batch = [
        BatchElem::new("rpc.Add", Some(json!({"a": 1, "b": 2}))),
        BatchElem::new("nope", None),
    ];
    client.batch_call(&mut batch).await.unwrap();

    assert_eq!(batch[0].decode::<i64>().unwrap(), 3);
    match batch[1].error.as_ref().unwrap() {
        Error::Rpc(rpc_err) => assert_eq!(rpc_err.code, -32601),
        other => panic!("expected rpc error, got {other}"),
    }
}

#[tokio::test]
async fn http_empty_batch_yields_the_canonical_error() {
    let (_server, addr) = start_server().await;
    let http = reqwest::Client::new();
    let body = http
        .post(format!("http://{addr}/_jsonrpc_"))
        .header("content-type", "application/json")
        .body("[]")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(
        body,
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"Invalid request","data":"empty request"}}"#
    );
}

#[tokio::test]
async fn http_id_tokens_round_trip_bit_identically() {
    let (_server, addr) = start_server().await;
    let http = reqwest::Client::new();
    let body = http
        .post(format!("http://{addr}/_jsonrpc_"))
        .body(r#"{"jsonrpc":"2.0","id":9007199254740993,"method":"rpc.Add","params":{"a":1,"b":1}}"#)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, r#"{"jsonrpc":"2.0","id":9007199254740993,"result":2}"#);
}

#[tokio::test]
async fn raw_paths_serve_user_handlers() {
    let (_server, addr) = start_server().await;
    let client = dial(&format!("http://{addr}"), ClientOptions::default())
        .await
        .unwrap();

    let reply = client
        .raw_http(HttpMethod::Get, "/v1/get", None)
        .await
        .unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"hello world");

    let reply = client
        .raw_http(HttpMethod::Post, "/v1/post", Some(b"payload".to_vec()))
        .await
        .unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"payload");
}

#[tokio::test]
async fn reserved_paths_are_rejected_at_registration() {
    let (server, _addr) = start_server().await;
    let err = server
        .register_path(
            HttpMethod::Get,
            "_metrics_/foo",
            raw_handler(|_ctx: RequestContext, _body| async move { RawResponse::text(200, "x") }),
        )
        .unwrap_err();
    assert!(err.to_string().contains("conflict with builtin"));
}

#[tokio::test]
async fn inner_service_serves_index_and_metrics() {
    let (_server, addr) = start_server().await;
    let client = dial(&format!("http://{addr}/_jsonrpc_"), jsonrpc_options())
        .await
        .unwrap();
    let _: i64 = client
        .call("rpc.Add", Some(Params { a: 1, b: 2 }))
        .await
        .unwrap();

    let http = reqwest::Client::new();
    let index = http
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(index.contains("Welcome"));

    let metrics = http
        .get(format!("http://{addr}/_metrics_"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("request_total"));
    assert!(metrics.contains(r#"method="jsonRpc2""#));
}

#[tokio::test]
async fn ws_call_and_subscription_flow() {
    let (_server, addr) = start_server().await;
    let payloads = Channel::<SubPayload>::unbounded();
    let options = ClientOptions {
        jsonrpc: Some(JsonRpcOptions::default()),
        subscription_sink: Some(SubscriptionSink::typed(payloads.sender.clone())),
        ..ClientOptions::default()
    };
    let client = dial(&format!("ws://{addr}/_jsonrpc_ws_"), options)
        .await
        .unwrap();

    let result: i64 = client
        .call("rpc.Add", Some(Params { a: 2, b: 3 }))
        .await
        .unwrap();
    assert_eq!(result, 5);

    let subscription: String = client.call("rpc.Sub", Some(json!({}))).await.unwrap();
    assert!(subscription.starts_with("0x"));

    // notices arrive in order until close
    let first = tokio::time::timeout(Duration::from_secs(2), payloads.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), payloads.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.dt, "tick-0");
    assert_eq!(second.dt, "tick-1");

    let errors = client.ws_errors().unwrap();
    client.close();
    let terminal = tokio::time::timeout(Duration::from_secs(2), errors.recv())
        .await
        .unwrap();
    assert!(terminal.is_ok());
    // exactly one terminal error
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn ws_batch_responses_demultiplex_by_id() {
    let (_server, addr) = start_server().await;
    let client = dial(&format!("ws://{addr}/_jsonrpc_ws_"), jsonrpc_options())
        .await
        .unwrap();
    let mut batch = [
        BatchElem::new("rpc.Add", Some(json!({"a": 10, "b": 20}))),
        BatchElem::new("rpc.Add", Some(json!({"a": 1, "b": 1}))),
        BatchElem::new("rpc.Missing", None),
    ];
    client.batch_call(&mut batch).await.unwrap();
    assert_eq!(batch[0].decode::<i64>().unwrap(), 30);
    assert_eq!(batch[1].decode::<i64>().unwrap(), 2);
    assert!(batch[2].error.is_some());
}

#[tokio::test]
async fn raw_ws_session_echoes_frames_with_type_preserved() {
    let (_server, addr) = start_server().await;
    let frames = Channel::<WsFrame>::unbounded();
    let options = ClientOptions {
        ws_mode: WsMode::Raw,
        subscription_sink: Some(SubscriptionSink::frames(frames.sender.clone())),
        ..ClientOptions::default()
    };
    let client = dial(&format!("ws://{addr}/_raw_ws_"), options).await.unwrap();

    client
        .write_ws(WsFrame::Text("this is first".to_string()))
        .unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, WsFrame::Text("this is first".to_string()));

    client.write_ws(WsFrame::Binary(vec![1, 2, 3])).unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, WsFrame::Binary(vec![1, 2, 3]));
}

#[tokio::test]
async fn mux_closes_unclassified_connections() {
    let (_server, addr) = start_server().await;
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"SSH-2.0-OpenSSH\r\n").await.unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("connection should be closed by the server");
    assert_eq!(read.unwrap(), 0);
}

#[tokio::test]
async fn mux_routes_h2_preface_to_the_binary_incoming_stream() {
    use futures::StreamExt;

    let (server, addr) = start_server().await;
    let mut incoming = server.binary_incoming();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut preface = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n".to_vec();
    preface.extend_from_slice(&[0, 0, 0, 0x4, 0, 0, 0, 0, 0]);
    stream.write_all(&preface).await.unwrap();

    let routed = tokio::time::timeout(Duration::from_secs(5), incoming.next())
        .await
        .expect("binary connection should be routed")
        .expect("stream should stay open")
        .expect("routed connection should be ok");

    // the peeked bytes must be intact for the winning handler
    let mut sniffed = vec![0u8; preface.len()];
    let mut routed = routed;
    routed.read_exact(&mut sniffed).await.unwrap();
    assert_eq!(sniffed, preface);
}

#[tokio::test]
async fn side_files_appear_while_serving_and_stop_is_clean() {
    let (server, _addr) = start_server().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stem = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap();
    let pid = std::fs::read_to_string(format!("{stem}.pid")).unwrap();
    assert_eq!(pid, std::process::id().to_string());
    let net = std::fs::read_to_string(format!("{stem}.net")).unwrap();
    assert!(net.contains(':'));

    server.stop_and_join().await.unwrap();
}
