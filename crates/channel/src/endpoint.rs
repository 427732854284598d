//! WebSocket endpoint derivation.
//!
//! The game server exposes a single socket endpoint on its own origin: the
//! scheme is upgraded (`http` -> `ws`, `https` -> `wss`) and the path replaced
//! by a fixed suffix.

use thiserror::Error;
use url::Url;

/// Path of the game socket on the server origin.
pub const DEFAULT_GAME_PATH: &str = "/game";

#[derive(Debug, Error, PartialEq)]
pub enum EndpointError {
    #[error("invalid origin: {0}")]
    InvalidOrigin(#[from] url::ParseError),
    #[error("unsupported origin scheme: {0}")]
    UnsupportedScheme(String),
}

/// Build the WebSocket URL for `path` on `origin`.
pub fn endpoint_from_origin(origin: &str, path: &str) -> Result<Url, EndpointError> {
    let origin = Url::parse(origin.trim())?;

    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    };

    let host = origin
        .host_str()
        .ok_or(EndpointError::InvalidOrigin(url::ParseError::EmptyHost))?;
    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    Ok(Url::parse(&format!("{scheme}://{authority}{path}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_origin_upgrades_to_ws() {
        let url = endpoint_from_origin("http://localhost:8080", DEFAULT_GAME_PATH)
            .expect("valid origin");
        assert_eq!(url.as_str(), "ws://localhost:8080/game");
    }

    #[test]
    fn test_https_origin_upgrades_to_wss() {
        let url = endpoint_from_origin("https://hat.example.com/game/ABCD?x=1#top", "/game")
            .expect("valid origin");
        assert_eq!(url.as_str(), "wss://hat.example.com/game");
    }

    #[test]
    fn test_socket_origins_are_kept() {
        let url = endpoint_from_origin("wss://hat.example.com:9443", "game").expect("valid");
        assert_eq!(url.as_str(), "wss://hat.example.com:9443/game");
    }

    #[test]
    fn test_unsupported_scheme_is_rejected() {
        assert_eq!(
            endpoint_from_origin("ftp://example.com", DEFAULT_GAME_PATH),
            Err(EndpointError::UnsupportedScheme("ftp".to_string()))
        );
    }

    #[test]
    fn test_garbage_origin_is_rejected() {
        assert!(matches!(
            endpoint_from_origin("not a url", DEFAULT_GAME_PATH),
            Err(EndpointError::InvalidOrigin(_))
        ));
    }
}
