//! Core primitives shared by the Tidepool terminal client and its backend.
//!
//! Both sides agree on the session data model, the viewport geometry rules,
//! the tagged binary frames carried over the terminal stream, and the JSON
//! bodies of the session API. Keeping them in one crate means the client and
//! the server cannot drift apart on any of those.

pub mod api;
pub mod geometry;
pub mod session;
pub mod wire;

pub use api::{CloseSessionResponse, CreateSessionRequest, ErrorBody, SessionListResponse};
pub use geometry::{GeometryError, ViewportGeometry};
pub use session::{ProjectId, Session, SessionId, SessionStatus, DEFAULT_SHELL_NAME};
pub use wire::{decode_frame, encode_frame, CloseReason, Frame, WireError, PROTOCOL_VERSION};

/// Parses the usual truthy spellings of an environment flag.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn flag_parsing_accepts_common_truthy_values() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" YES "));
        assert!(parse_flag("1"));
        assert!(parse_flag("on"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
