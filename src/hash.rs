//! Hashing helpers for label values
//!
//! Emails and phone numbers are stored on resources only as MD5 hex digests,
//! which are then used for label-selector equality queries.

use md5::{Digest, Md5};

/// MD5 hex digest of a string
pub fn md5_hex(value: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Label value for an email address: MD5 of the lowercased address
pub fn email_hash(email: &str) -> String {
    md5_hex(&email.to_lowercase())
}

/// Label value for a phone number: MD5 of the canonicalized number
pub fn phone_hash(phone: &str) -> String {
    md5_hex(&canonicalize_phone(phone))
}

/// Strip every character except `+` and `[0-9]`
pub fn canonicalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| *c == '+' || c.is_ascii_digit())
        .collect()
}

/// Whether the value already is a 32-char hex MD5 digest
pub fn is_md5_hash(value: &str) -> bool {
    value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit())
}
