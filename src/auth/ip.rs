//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::request::Parts};

use crate::cli::ClientIpHeader;

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &axum::http::HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &axum::http::HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &axum::http::Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &axum::http::HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract client IP address based on configuration.
///
/// If `ip_header` is set, reads the IP from that header and returns an error
/// if it is missing or unparsable (does NOT fall back to the socket address).
/// Otherwise uses the SocketAddr from ConnectInfo.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    ip_header: Option<ClientIpHeader>,
) -> Result<String, &'static str> {
    match ip_header {
        Some(header) => {
            let value = source
                .headers()
                .get(header.header_name())
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            header.parse(value)
        }
        None => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .ok_or("No client IP available"),
    }
}
