use bytes::Bytes;
use std::collections::HashMap;

/// An inbound request as seen by the pipeline.
///
/// The front listener builds one of these from whatever HTTP stack it
/// runs on; nothing below the listener depends on that stack. Header
/// names are lowercased at construction.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`. Empty when absent.
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub client_ip: String,
    pub scheme: String,
}

impl GatewayRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: String::new(),
            headers: HashMap::new(),
            body: Bytes::new(),
            client_ip: "unknown".to_string(),
            scheme: "http".to_string(),
        }
    }

    /// Get a header value (names are stored lowercase).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_lowercase(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(&name.to_lowercase());
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// First value of a query parameter, if present.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then_some(v)
        })
    }
}

/// The response flowing back through the pipeline.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// JSON response with the given raw body.
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        let mut resp = Self::new(status);
        resp.set_header("content-type", "application/json");
        resp.body = body.into();
        resp
    }

    /// `{"error": "..."}` response; the message is JSON-escaped.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }).to_string())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_lowercase(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(&name.to_lowercase());
    }
}
