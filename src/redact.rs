//! Masking of secrets in transport error text before it is logged or
//! carried inside an error.

use std::sync::OnceLock;

use regex::Regex;

fn patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)\b(bearer)\s+[a-z0-9._\-~+/]+=*", "$1 [REDACTED]"),
            (
                r"(?i)\b(token|api[_\-]?key|secret|password|private[_\-]?key)\b(\s*[:=]\s*)([^,\s]+)",
                "$1$2[REDACTED]",
            ),
            (r"(?i)\bsk-[a-z0-9\-]{10,}\b", "sk-[REDACTED]"),
            (r"(?i)\b(0x)?[0-9a-f]{64}\b", "[REDACTED_KEY]"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

pub fn redact_sensitive_detail(raw: &str) -> String {
    let mut value = raw.to_string();
    for (re, replacement) in patterns() {
        value = re.replace_all(&value, *replacement).to_string();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_tokens_and_keys() {
        let message = "request failed bearer abc.def token=abc123 api_key: xyz987";
        let redacted = redact_sensitive_detail(message);
        assert!(!redacted.contains("abc.def"));
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("xyz987"));
    }

    #[test]
    fn masks_raw_private_keys() {
        let message =
            "bad key 0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80 supplied";
        let redacted = redact_sensitive_detail(message);
        assert_eq!(redacted, "bad key [REDACTED_KEY] supplied");
    }

    #[test]
    fn leaves_addresses_alone() {
        let message = "provider 0xf07240efa67755b5311bc75784a061edb47165dd unreachable";
        assert_eq!(redact_sensitive_detail(message), message);
    }
}
