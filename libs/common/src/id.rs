use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = foodhub_common::id::prefixed_ulid("req");
/// assert!(id.starts_with("req_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Correlation id attached to every outbound API request.
    pub const REQUEST: &str = "req";
}
