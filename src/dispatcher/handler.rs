//! Type-erased request handlers.
//!
//! A registered handler is a plain function or closure over typed request
//! and reply values. [`TypedHandler`] and [`SyncHandler`] wrap it so that the
//! dispatcher can call every handler the same way: payload bytes in, payload
//! bytes (or a [`HandlerError`]) out.
//!
//! Decoding, the call itself and encoding all happen inside the returned
//! future, so a panic anywhere in that chain surfaces at the dispatch
//! boundary where it is caught.

use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{HandlerError, JsonCodec};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) type HandlerResult = std::result::Result<Bytes, HandlerError>;

/// Handler trait for type-erased async functions.
pub(crate) trait HandlerFn: Send + Sync {
    fn call(&self, payload: Bytes) -> BoxFuture<'static, HandlerResult>;
}

/// Async handler: `Fn(TReq) -> impl Future<Output = Result<TResp, E>>`.
pub(crate) struct TypedHandler<F, Fut, TReq, TResp, E> {
    func: Arc<F>,
    codec: JsonCodec,
    _phantom: PhantomData<fn(TReq) -> (TResp, Fut, E)>,
}

impl<F, Fut, TReq, TResp, E> TypedHandler<F, Fut, TReq, TResp, E> {
    pub(crate) fn new(func: F, codec: JsonCodec) -> Self {
        Self {
            func: Arc::new(func),
            codec,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut, TReq, TResp, E> HandlerFn for TypedHandler<F, Fut, TReq, TResp, E>
where
    F: Fn(TReq) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<TResp, E>> + Send + 'static,
    TReq: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
    E: Display + Send + 'static,
{
    fn call(&self, payload: Bytes) -> BoxFuture<'static, HandlerResult> {
        // ---
        let func = Arc::clone(&self.func);
        let codec = self.codec;

        Box::pin(async move {
            let req: TReq = codec
                .decode(&payload)
                .map_err(|err| HandlerError::Decode(err.to_string()))?;

            let resp = (*func)(req).await.map_err(HandlerError::failed)?;

            codec
                .encode(&resp)
                .map_err(|err| HandlerError::Encode(err.to_string()))
        })
    }
}

/// Synchronous handler: `Fn(TReq) -> Result<TResp, E>`.
pub(crate) struct SyncHandler<F, TReq, TResp, E> {
    func: Arc<F>,
    codec: JsonCodec,
    _phantom: PhantomData<fn(TReq) -> (TResp, E)>,
}

impl<F, TReq, TResp, E> SyncHandler<F, TReq, TResp, E> {
    pub(crate) fn new(func: F, codec: JsonCodec) -> Self {
        Self {
            func: Arc::new(func),
            codec,
            _phantom: PhantomData,
        }
    }
}

impl<F, TReq, TResp, E> HandlerFn for SyncHandler<F, TReq, TResp, E>
where
    F: Fn(TReq) -> std::result::Result<TResp, E> + Send + Sync + 'static,
    TReq: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
    E: Display + Send + 'static,
{
    fn call(&self, payload: Bytes) -> BoxFuture<'static, HandlerResult> {
        // ---
        let func = Arc::clone(&self.func);
        let codec = self.codec;

        Box::pin(async move {
            let req: TReq = codec
                .decode(&payload)
                .map_err(|err| HandlerError::Decode(err.to_string()))?;

            let resp = (*func)(req).map_err(HandlerError::failed)?;

            codec
                .encode(&resp)
                .map_err(|err| HandlerError::Encode(err.to_string()))
        })
    }
}
