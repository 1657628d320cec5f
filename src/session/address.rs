//! Channel address derivation.
//!
//! ```text
//! host "localhost:8000/", secure false, session "abc", audio true
//!   ─▶ ws://localhost:8000/ws/abc?is_audio=true
//! ```

/// Build the channel address for a session.
///
/// An explicit `https`/`http` prefix on `host` picks `wss`/`ws` and is
/// stripped; otherwise `secure` decides.  Trailing slashes are dropped.
/// An empty host yields an empty address, which the connection manager
/// treats as "do not connect".
pub fn channel_address(host: &str, secure: bool, session_id: &str, audio_mode: bool) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return String::new();
    }

    let (scheme, bare) = if let Some(rest) = host.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = host.strip_prefix("http://") {
        ("ws", rest)
    } else if secure {
        ("wss", host)
    } else {
        ("ws", host)
    };

    format!("{scheme}://{bare}/ws/{session_id}?is_audio={audio_mode}")
}
