//! Demo client: HTTP calls and a batch against the demo server, then a
//! WebSocket subscription printing timer notices until interrupted.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use uniport_core::channel::Channel;
use uniport_rpc::client::{
    dial, BatchElem, ClientOptions, JsonRpcOptions, SubscriptionSink,
};
use uniport_rpc::result::Result;

#[derive(Serialize, Default)]
struct Params {
    a: i64,
    b: i64,
}

#[derive(Deserialize, Debug)]
struct SubPayload {
    dt: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let http = dial(
        "http://127.0.0.1:8888/_jsonrpc_",
        ClientOptions {
            jsonrpc: Some(JsonRpcOptions::default()),
            ..ClientOptions::default()
        },
    )
    .await?;

    let sum: i64 = http.call("rpc.Add", Some(Params { a: 100, b: 200 })).await?;
    println!("rpc.Add -> {sum}");

    match http
        .call::<serde_json::Value, _>("rpc.Add2", Some(Params { a: 50, b: 50 }))
        .await
    {
        Ok(value) => println!("rpc.Add2 -> {value}"),
        Err(err) => println!("rpc.Add2 -> error: {err}"),
    }

    let mut batch = [
        BatchElem::new("rpc.Add", Some(json!({"a": 1, "b": 2}))),
        BatchElem::new("rpc.Add", Some(json!({"a": 3, "b": 4}))),
    ];
    http.batch_call(&mut batch).await?;
    for elem in &batch {
        match elem.decode::<i64>() {
            Ok(value) => println!("{} -> {value}", elem.method),
            Err(err) => println!("{} -> error: {err}", elem.method),
        }
    }

    let payloads = Channel::<SubPayload>::unbounded();
    let ws = dial(
        "ws://127.0.0.1:8888/_jsonrpc_ws_",
        ClientOptions {
            jsonrpc: Some(JsonRpcOptions::default()),
            subscription_sink: Some(SubscriptionSink::typed(payloads.sender.clone())),
            ..ClientOptions::default()
        },
    )
    .await?;

    let subscription: String = ws.call("rpc.Sub", Some(json!({}))).await?;
    println!("rpc.Sub -> subscription {subscription}");

    let errors = ws.ws_errors()?;
    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            payload = payloads.recv() => match payload {
                Ok(payload) => println!("notice: dt={}", payload.dt),
                Err(_) => break,
            },
            err = errors.recv() => {
                if let Ok(err) = err {
                    println!("session ended: {err}");
                }
                break;
            }
            _ = &mut deadline => {
                println!("done watching notices");
                break;
            }
        }
    }

    ws.close();
    Ok(())
}
