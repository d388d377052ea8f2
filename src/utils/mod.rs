pub mod ip;
pub mod password;

/// 短码最大长度
pub const MAX_SHORT_CODE_LEN: usize = 64;

/// 校验短码格式：1-64 位字母、数字、`-`、`_`
pub fn is_valid_short_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_SHORT_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_short_code() {
        assert!(is_valid_short_code("abc123"));
        assert!(is_valid_short_code("spring-sale_2026"));
        assert!(!is_valid_short_code(""));
        assert!(!is_valid_short_code("has space"));
        assert!(!is_valid_short_code("../etc"));
        assert!(!is_valid_short_code("码"));
        assert!(!is_valid_short_code(&"a".repeat(MAX_SHORT_CODE_LEN + 1)));
    }
}
