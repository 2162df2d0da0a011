use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn, error, debug};
use crate::aliyun_client::AliyunClient;
use crate::config::Config;
use crate::error::AppError;
use crate::nfo::{handle_transfer_complete, TransferCompleteEvent};
use crate::rapid_upload::{rapid_upload, RapidUploadRequest};

const API_KEY_HEADER: &str = "x-api-key";

pub struct AppState {
    pub config: Arc<Config>,
    pub aliyun: Arc<AliyunClient>,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut resp = Response::new(Full::new(Bytes::from(bytes)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn failure(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "success": false, "message": message }))
}

fn request_api_key<B>(req: &Request<B>) -> Option<String> {
    let from_query = req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key != "apikey" {
                return None;
            }
            urlencoding::decode(value).ok().map(|v| v.into_owned())
        })
    });
    from_query.or_else(|| {
        req.headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

fn is_authorized<B>(config: &Config, req: &Request<B>) -> bool {
    match (&config.api_key, request_api_key(req)) {
        (Some(expected), Some(given)) => *expected == given,
        _ => false,
    }
}

async fn read_json<B, T>(req: Request<B>) -> Result<T, String>
where
    B: Body,
    B::Error: std::fmt::Display,
    T: serde::de::DeserializeOwned,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("cannot read body: {}", e))?
        .to_bytes();
    serde_json::from_slice(&body).map_err(|e| format!("invalid JSON body: {}", e))
}

pub async fn handle<B>(state: Arc<AppState>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let path = req.uri().path().to_string();
    debug!("{} {}", req.method(), path);

    if path != "/rapid_upload" && path != "/transfer_complete" {
        return failure(StatusCode::NOT_FOUND, "not found");
    }
    if req.method() != Method::POST {
        return failure(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }
    if !is_authorized(&state.config, &req) {
        warn!("Rejected unauthenticated request to {}", path);
        return failure(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    match path.as_str() {
        "/rapid_upload" => {
            let body: RapidUploadRequest = match read_json(req).await {
                Ok(body) => body,
                Err(e) => return failure(StatusCode::BAD_REQUEST, &e),
            };
            let resp = rapid_upload(&state.aliyun, &body).await;
            json_response(StatusCode::OK, &resp)
        }
        _ => {
            let event: TransferCompleteEvent = match read_json(req).await {
                Ok(event) => event,
                Err(e) => return failure(StatusCode::BAD_REQUEST, &e),
            };
            let anti_spoil = state.config.anti_spoil.clone();
            tokio::spawn(async move {
                let rewritten = handle_transfer_complete(&anti_spoil, &event).await;
                if rewritten > 0 {
                    info!("Hid spoilers in {} NFO files", rewritten);
                }
            });
            json_response(StatusCode::ACCEPTED, &json!({ "success": true }))
        }
    }
}

pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP endpoint listening on http://{}", addr);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(
                    io,
                    service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move { Ok::<_, hyper::Error>(handle(state, req).await) }
                    }),
                )
                .await
            {
                use std::error::Error;
                if let Some(io_err) = err.source().and_then(|s| s.downcast_ref::<std::io::Error>()) {
                    if matches!(
                        io_err.kind(),
                        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
                    ) {
                        return;
                    }
                }
                error!("Error serving connection: {:?}", err);
            }
        });
    }
}
