//! Default consumer-name derivation.
//!
//! The original distinguishes concurrent consumers on the same machine by a
//! MAC-derived identifier (`msq/mac.go`); that's out of scope here. Instead
//! this follows the teacher's `ProcessorConfig::from_env` fallback pattern:
//! hostname plus process id is unique enough per machine and trivially
//! available without network enumeration.

/// Build a default consumer id of the form `"<hostname>-<pid>"`.
pub fn default_consumer_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{host}-{}", std::process::id())
}
