//! Resource-name encoding of usernames
//!
//! UserSignup resources are named after the user's preferred username, which
//! may contain characters that are not valid in a resource name. The encoding
//! keeps names deterministic and collision-resistant: a CRC-32 checksum of
//! the original value prefixes the sanitized remainder.

/// Encode a username into a resource-name-safe identifier.
///
/// `encode_user_identifier("jsmith@kubesaw") == "fdebf2d6-jsmithkubesaw"`
pub fn encode_user_identifier(username: &str) -> String {
    let checksum = crc32fast::hash(username.as_bytes());
    let sanitized: String = username
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    format!("{:08x}-{}", checksum, sanitized)
}
