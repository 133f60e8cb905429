//! Header forwarding policy and log sanitization.

/// Hop-by-hop and infrastructure headers that must never be forwarded
/// upstream.
pub const SKIP_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "accept-encoding",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "proxy-authorization",
    "proxy-connection",
    "x-forwarded-for",
    "x-forwarded-proto",
    "x-forwarded-host",
    "x-real-ip",
    "cf-connecting-ip",
];

/// Headers whose values are credentials and must be obfuscated in logs.
pub const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "api-key", "cookie"];

/// Whether a caller header may be forwarded to the upstream.
pub fn should_forward(name: &str) -> bool {
    let lowered = name.to_lowercase();
    !SKIP_HEADERS.contains(&lowered.as_str())
}

/// Obfuscate a credential value for logging: first 8 characters plus an
/// ellipsis, or fully redacted when too short to truncate safely.
pub fn obfuscate(value: &str) -> String {
    if value.chars().count() > 8 {
        let prefix: String = value.chars().take(8).collect();
        format!("{}...", prefix)
    } else {
        "[REDACTED]".to_string()
    }
}

/// Copy of a header list with sensitive values obfuscated, for logs.
pub fn sanitize_headers_for_logging(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if SENSITIVE_HEADERS.contains(&name.to_lowercase().as_str()) {
                (name.clone(), obfuscate(value))
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
