//! Key-space conventions.
//!
//! Every component writes under its own prefix, joined to the rest of the key
//! with `:`. Cache keys use the operation kind as prefix (`ocr:<hex>`); the
//! prefixes reserved here must never be used for cache entries.

/// Sliding-window rate limiter sets: `sliding_rate:<scope>:<caller>`.
pub const SLIDING_RATE: &str = "sliding_rate";

/// Access-token blacklist markers: `blacklist:<sha256-hex>`.
pub const BLACKLIST: &str = "blacklist";

/// Refresh token records: `refresh_token:<sha256-hex>`.
pub const REFRESH_TOKEN: &str = "refresh_token";

/// Refresh token revocation markers: `refresh_revoked:<sha256-hex>`.
pub const REFRESH_REVOKED: &str = "refresh_revoked";

/// Per-user refresh token index sets: `refresh_user:<user-id>`.
pub const REFRESH_USER_INDEX: &str = "refresh_user";

/// Prefixes owned by non-cache components.
pub const RESERVED: [&str; 5] = [
    SLIDING_RATE,
    BLACKLIST,
    REFRESH_TOKEN,
    REFRESH_REVOKED,
    REFRESH_USER_INDEX,
];

/// Join a prefix and the rest of a key.
pub fn join(prefix: &str, rest: &str) -> String {
    format!("{prefix}:{rest}")
}

/// SCAN pattern matching every key under `prefix`.
pub fn scan_pattern(prefix: &str) -> String {
    format!("{prefix}:*")
}

/// Returns `true` if `prefix` belongs to a non-cache component.
pub fn is_reserved(prefix: &str) -> bool {
    let head = prefix.split(':').next().unwrap_or(prefix);
    RESERVED.contains(&head)
}

/// Glob match supporting `*` and `?`, as used by `SCAN MATCH`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p = pattern.as_bytes();
    let k = key.as_bytes();
    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((sp, sk)) = star {
            pi = sp + 1;
            ki = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_pattern() {
        assert_eq!(join(BLACKLIST, "abc"), "blacklist:abc");
        assert_eq!(scan_pattern("ocr"), "ocr:*");
    }

    #[test]
    fn test_reserved_prefixes() {
        assert!(is_reserved("blacklist"));
        assert!(is_reserved("sliding_rate:public"));
        assert!(!is_reserved("ocr"));
        assert!(!is_reserved("detect"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("ocr:*", "ocr:0123"));
        assert!(!glob_match("ocr:*", "ocrx:0123"));
        assert!(!glob_match("ocr:*", "detect:0123"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abcd"));
    }
}
