//! Human-readable storage size parser: `"10G"`, `"500M"`, `"123"`.

/// Parse an integer with an optional K/M/G/T binary suffix
/// (case-insensitive). No suffix means bytes. Whitespace around the number
/// and suffix is tolerated; anything after the suffix is a parse error.
///
/// Returns `None` on any malformed input, including overflow.
pub fn parse_storage_size(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if digits_end == 0 {
        return None;
    }

    let base: u64 = trimmed[..digits_end].parse().ok()?;
    let rest = trimmed[digits_end..].trim();

    let multiplier: u64 = match rest {
        "" => 1,
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        "t" | "T" => 1 << 40,
        _ => return None,
    };

    base.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_bytes() {
        assert_eq!(parse_storage_size("123"), Some(123));
        assert_eq!(parse_storage_size("0"), Some(0));
    }

    #[test]
    fn test_suffixes() {
        assert_eq!(parse_storage_size("10K"), Some(10 * 1024));
        assert_eq!(parse_storage_size("500M"), Some(500 * 1024 * 1024));
        assert_eq!(parse_storage_size("10G"), Some(10u64 << 30));
        assert_eq!(parse_storage_size("1T"), Some(1u64 << 40));
    }

    #[test]
    fn test_lowercase_suffixes() {
        assert_eq!(parse_storage_size("10g"), parse_storage_size("10G"));
        assert_eq!(parse_storage_size("2t"), parse_storage_size("2T"));
    }

    #[test]
    fn test_whitespace_tolerated() {
        assert_eq!(parse_storage_size("  10G  "), Some(10u64 << 30));
        assert_eq!(parse_storage_size("10 G"), Some(10u64 << 30));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert_eq!(parse_storage_size("10GB"), None);
        assert_eq!(parse_storage_size("10G x"), None);
        assert_eq!(parse_storage_size("10Q"), None);
    }

    #[test]
    fn test_malformed_rejected() {
        assert_eq!(parse_storage_size(""), None);
        assert_eq!(parse_storage_size("   "), None);
        assert_eq!(parse_storage_size("G"), None);
        assert_eq!(parse_storage_size("-5G"), None);
    }

    #[test]
    fn test_overflow_rejected() {
        assert_eq!(parse_storage_size("18446744073709551615T"), None);
    }
}
