//! HTTP surface of the gateway: verb mapping, body decoding and reply encoding.

use crate::error::GatewayError;
use crate::session::{
    CapabilityInstaller, Exchange, Reply, ReplyBody, Router, SseEvent, TransportFactory, Verb,
};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::http::{
    header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE, ORIGIN},
    HeaderValue, Method, Request, Response, StatusCode,
};
use serde_json::Value;
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;
use tracing::{debug, warn};

/// Session id header, both directions.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";
const ALLOWED_METHODS: &str = "GET, POST, DELETE";

pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, Infallible>> + Send>>;

/// Tower service answering every request on the gateway endpoint.
pub struct GatewayService<F: TransportFactory, C> {
    router: Arc<Router<F, C>>,
    path: Arc<str>,
}

impl<F: TransportFactory, C> Clone for GatewayService<F, C> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            path: self.path.clone(),
        }
    }
}

impl<F, C> GatewayService<F, C>
where
    F: TransportFactory,
    C: CapabilityInstaller<F::Transport>,
{
    pub fn new(router: Arc<Router<F, C>>, path: impl Into<Arc<str>>) -> Self {
        Self {
            router,
            path: path.into(),
        }
    }

    async fn serve<B>(self, req: Request<B>) -> Response<ResponseBody>
    where
        B: http_body::Body + Send + 'static,
        B::Error: std::fmt::Display,
    {
        if req.uri().path() != &*self.path {
            return plain(StatusCode::NOT_FOUND, "Not Found");
        }
        let verb = match *req.method() {
            Method::POST => Verb::Submit,
            Method::GET => Verb::Listen,
            Method::DELETE => Verb::Terminate,
            _ => {
                let mut resp = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                resp.headers_mut()
                    .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
                return resp;
            }
        };
        let session_id = req
            .headers()
            .get(SESSION_ID_HEADER)
            // A value that is not valid UTF-8 still counts as present; lossy
            // decoding can never match a minted id, so the lookup misses.
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        let exchange = match verb {
            Verb::Submit => match read_json(req.into_body()).await {
                Ok(body) => Exchange::submit(session_id.as_deref(), body),
                Err(e) => return into_response(e.into_reply()),
            },
            Verb::Listen => Exchange::listen(session_id.as_deref()),
            Verb::Terminate => Exchange::terminate(session_id.as_deref()),
        };
        into_response(self.router.dispatch(exchange).await)
    }
}

impl<B, F, C> Service<Request<B>> for GatewayService<F, C>
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
    F: TransportFactory,
    C: CapabilityInstaller<F::Transport>,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.serve(req).await) })
    }
}

/// Rejects requests whose `Origin` is not allow-listed. Requests without an
/// `Origin` header pass through.
#[derive(Clone)]
pub struct OriginCheckService<S> {
    inner: S,
    allowed_origins: Arc<HashSet<String>>,
}

impl<S> OriginCheckService<S> {
    pub fn new(inner: S, allowed_origins: Arc<HashSet<String>>) -> Self {
        Self {
            inner,
            allowed_origins,
        }
    }
}

impl<B, S> Service<Request<B>> for OriginCheckService<S>
where
    B: Send + 'static,
    S: Service<Request<B>, Response = Response<ResponseBody>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let allowed_origins = self.allowed_origins.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
                if !allowed_origins.contains(origin) {
                    warn!(origin = %origin, "Rejected request from disallowed origin");
                    return Ok(plain(StatusCode::FORBIDDEN, "Forbidden"));
                }
            }
            inner.call(req).await
        })
    }
}

async fn read_json<B>(body: B) -> Result<Value, GatewayError>
where
    B: http_body::Body,
    B::Error: std::fmt::Display,
{
    let bytes = body
        .collect()
        .await
        .map_err(|e| GatewayError::MalformedBody(e.to_string()))?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::MalformedBody(e.to_string()))
}

/// Encode a transport reply as an HTTP response.
pub fn into_response(reply: Reply) -> Response<ResponseBody> {
    let mut builder = Response::builder().status(reply.status);
    if let Some(id) = &reply.session_id {
        builder = builder.header(SESSION_ID_HEADER, id.as_str());
    }
    let result = match reply.body {
        ReplyBody::Empty => builder.body(Empty::new().boxed_unsync()),
        ReplyBody::Json(value) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(value.to_string())).boxed_unsync()),
        ReplyBody::EventStream(events) => {
            let frames = events.map(|event: SseEvent| {
                Ok::<_, Infallible>(Frame::data(Bytes::from(event.encode())))
            });
            builder
                .header(CONTENT_TYPE, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .body(StreamBody::new(frames).boxed_unsync())
        }
    };
    result.unwrap_or_else(|e| {
        debug!(error = %e, "Invalid response parts");
        plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    })
}

fn plain(status: StatusCode, text: &'static str) -> Response<ResponseBody> {
    let mut resp = Response::new(Full::new(Bytes::from_static(text.as_bytes())).boxed_unsync());
    *resp.status_mut() = status;
    resp
}
