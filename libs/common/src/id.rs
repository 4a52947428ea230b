use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = meeting_common::id::prefixed_ulid("ptc");
/// assert!(id.starts_with("ptc_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Returns true if `id` looks like `<prefix>_<ULID>`.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    match id.split_once('_') {
        Some((p, rest)) => p == prefix && Ulid::from_string(rest).is_ok(),
        None => false,
    }
}

/// Marker trait for types that represent a prefixed ID.
pub trait PrefixedId {
    const PREFIX: &'static str;

    fn generate() -> String {
        prefixed_ulid(Self::PREFIX)
    }
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Stable participant identity, survives reconnects.
    pub const PARTICIPANT: &str = "ptc";
    /// One WebSocket connection.
    pub const CONNECTION: &str = "conn";
    /// Opaque resume credential handed out on join.
    pub const RESUME: &str = "rsm";
}
