use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the hex-encoded HMAC-SHA256 of `body` under `secret`, prefixed
/// `sha256=` the way Meta's webhook signatures are formatted. Used both to
/// verify inbound webhook deliveries and to sign outbound ones, so the two
/// sides of the protocol share one implementation.
#[must_use]
pub fn sign(body: &[u8], secret: &str) -> String {
    #[allow(clippy::expect_used)]
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    format!("sha256={}", hex::encode(digest))
}

/// Verifies `signature_header` (e.g. `"sha256=<hex>"`) against `body`
/// signed with `secret`. Constant-time so an attacker probing the
/// signature byte by byte cannot use response-time differences to forge
/// one.
#[must_use]
pub fn verify(body: &[u8], signature_header: &str, secret: &str) -> bool {
    let expected = sign(body, secret);
    constant_time_eq(&expected, signature_header)
}

/// Byte-for-byte constant-time string comparison. Always walks the full
/// length of the longer string so early mismatches don't shorten the
/// comparison time.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_matches_sign() {
        let body = b"{\"hello\":\"world\"}";
        let sig = sign(body, "shh");
        assert!(verify(body, &sig, "shh"));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = b"payload";
        let sig = sign(body, "shh");
        assert!(!verify(body, &sig, "different"));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let sig = sign(b"payload", "shh");
        assert!(!verify(b"tampered", &sig, "shh"));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(!constant_time_eq("abc", "abcd"));
    }

    proptest::proptest! {
        #[test]
        fn constant_time_eq_agrees_with_native_eq(a: String, b: String) {
            proptest::prop_assert_eq!(constant_time_eq(&a, &b), a == b);
        }
    }
}
