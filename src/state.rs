use crate::services::registry::Registry;
use axum::http::{HeaderMap, header};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    /// Base for share links; `None` means derive it from the `Host` header.
    pub public_url: Option<String>,
}

impl AppState {
    pub fn new(registry: Registry, public_url: Option<String>) -> Self {
        Self {
            registry,
            public_url,
        }
    }

    /// Absolute link that redirects to the download of `short_id`.
    pub fn share_url(&self, headers: &HeaderMap, short_id: &str) -> String {
        let base = match &self.public_url {
            Some(url) => url.clone(),
            None => {
                let host = headers
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("localhost");
                format!("http://{}", host)
            }
        };
        format!("{}/s/{}", base, short_id)
    }
}
