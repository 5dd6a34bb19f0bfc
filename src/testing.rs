// In-process doubles for the transport and navigation collaborators
// Available in test builds and with the `test-utils` feature

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

use crate::navigation::Navigator;
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;
type Matcher = dyn Fn(&ApiRequest) -> bool + Send + Sync;

/// Transport answering from a closure and recording every request
pub struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
    rendezvous: Option<(Arc<Barrier>, Box<Matcher>)>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            rendezvous: None,
        }
    }

    /// Hold requests matching `matcher` until `parties` of them are in flight
    pub fn with_rendezvous<M>(mut self, parties: usize, matcher: M) -> Self
    where
        M: Fn(&ApiRequest) -> bool + Send + Sync + 'static,
    {
        self.rendezvous = Some((Arc::new(Barrier::new(parties)), Box::new(matcher)));
        self
    }

    pub fn status(status: StatusCode) -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse::new(status, ""))
    }

    pub fn json(status: StatusCode, body: &str) -> Result<ApiResponse, TransportError> {
        let mut response = ApiResponse::new(status, body.to_string());
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(response)
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count_path(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    /// Authorization header of each request to `path`, in send order
    pub fn authorizations(&self, path: &str) -> Vec<Option<String>> {
        self.requests()
            .iter()
            .filter(|r| r.path == path)
            .map(|r| {
                r.headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .collect()
    }
}

/// Authorization header value of a request, if any
pub fn authorization_of(request: &ApiRequest) -> Option<&str> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some((barrier, matcher)) = &self.rendezvous {
            if matcher(&request) {
                barrier.wait().await;
            }
        }

        (self.handler)(&request)
    }
}

/// Navigator that counts how often each surface was requested
#[derive(Default)]
pub struct RecordingNavigator {
    logins: AtomicUsize,
    errors: AtomicUsize,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl Navigator for RecordingNavigator {
    fn go_to_login(&self) {
        self.logins.fetch_add(1, Ordering::SeqCst);
    }

    fn go_to_error_surface(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}
