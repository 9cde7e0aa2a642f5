//! Demo server: service "rpc" with an add pair and a timer subscription,
//! two raw paths and a raw WebSocket echo, all on one port.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uniport_rpc::context::RequestContext;
use uniport_rpc::error::RpcError;
use uniport_rpc::message::SubscriptionNotice;
use uniport_rpc::result::Result;
use uniport_rpc::server::{
    raw_handler, raw_ws_handler, HttpMethod, Method, RawResponse, Server, ServerOptions, Service,
};

#[derive(Serialize, Deserialize, Default)]
struct Params {
    a: i64,
    b: i64,
}

#[derive(Serialize)]
struct Result2 {
    c: i64,
}

fn now_string() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    seconds.to_string()
}

fn arithmetic_service() -> Service {
    Service::new("rpc")
        .method(
            "Add",
            Method::new(|ctx: RequestContext, params: Params| async move {
                let sum = params.a + params.b;
                ctx.log(format!("Add {sum}"));
                Ok(sum)
            }),
        )
        .method(
            "Add2",
            Method::new(|ctx: RequestContext, params: Params| async move {
                let result = Result2 {
                    c: params.a + params.b,
                };
                ctx.log(format!("Add2 {}", result.c));
                if result.c % 100 == 0 {
                    return Err(RpcError::with_data(-32000, "bad param", "aha error"));
                }
                Ok(result)
            }),
        )
        .method(
            "Sub",
            Method::new(|ctx: RequestContext, _params: Value| async move {
                let Some(notifier) = ctx.rpc_notifier() else {
                    return Err(RpcError::new(
                        -32001,
                        "subscriptions require a websocket session",
                    ));
                };
                let subscription = notifier.id().to_string();
                ctx.log(format!("Sub registered {subscription}"));
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        let notice = SubscriptionNotice::new(
                            "Sub",
                            notifier.id(),
                            json!({"dt": now_string()}),
                        );
                        if notifier.notify(&notice).is_err() {
                            break;
                        }
                    }
                });
                Ok(subscription)
            }),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let server = Server::new(ServerOptions {
        addr: "127.0.0.1:8888".to_string(),
        cluster_name: "demo".to_string(),
        enable_inner_service: true,
        ..ServerOptions::default()
    });

    server.register_rpc(arithmetic_service())?;

    server.register_path(
        HttpMethod::Get,
        "/v1/get",
        raw_handler(|_ctx: RequestContext, _body| async move {
            RawResponse::text(200, "hello world")
        }),
    )?;
    server.register_path(
        HttpMethod::Post,
        "/v1/post",
        raw_handler(|ctx: RequestContext, body| async move {
            let body = body.map(|bytes| bytes.to_vec()).unwrap_or_default();
            ctx.log(format!("httpBody {} bytes", body.len()));
            RawResponse::json(200, &json!({ "hello": String::from_utf8_lossy(&body) }))
        }),
    )?;

    server.register_raw_ws(raw_ws_handler(|ctx: RequestContext, msg| async move {
        if let Some(notifier) = ctx.raw_notifier() {
            notifier.write(msg).ok();
        }
    }));

    server.set_before_run(Box::new(|| {
        log::info!("demo server starting");
        Ok(())
    }));

    server.run().await
}
