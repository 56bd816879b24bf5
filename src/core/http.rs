use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::Client;

use crate::core::state::EngineSettings;

/// Shared client for downloads and size probes.
///
/// Compression is disabled so `Content-Length` matches the bytes written to disk.
pub fn build_http_client(settings: &EngineSettings) -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .default_headers(default_headers)
        .connect_timeout(settings.connect_timeout());

    if let Some(timeout) = settings.request_timeout() {
        builder = builder.timeout(timeout);
    }

    builder.build()
}
