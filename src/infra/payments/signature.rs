//! HMAC-SHA512 webhook signatures.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Hex-encoded HMAC-SHA512 of `payload`
#[must_use]
pub fn sign_hex(secret: &[u8], payload: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha512::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature
#[must_use]
pub fn verify_hex(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Re-serialise a JSON body with object keys in sorted order.
///
/// `serde_json::Map` is ordered by key, so a parse/print round trip yields
/// the canonical form the crypto gateway signs.
pub fn canonical_json(payload: &[u8]) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signature = sign_hex(b"secret", b"{\"event\":\"charge.success\"}");
        assert_eq!(signature.len(), 128);
        assert!(verify_hex(b"secret", b"{\"event\":\"charge.success\"}", &signature));
        assert!(verify_hex(
            b"secret",
            b"{\"event\":\"charge.success\"}",
            &signature.to_uppercase()
        ));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signature = sign_hex(b"secret", b"{\"amount\":100}");
        assert!(!verify_hex(b"secret", b"{\"amount\":999}", &signature));
        assert!(!verify_hex(b"other", b"{\"amount\":100}", &signature));
        assert!(!verify_hex(b"secret", b"{\"amount\":100}", "not-hex"));
        assert!(!verify_hex(b"secret", b"{\"amount\":100}", ""));
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let canonical =
            canonical_json(br#"{"b": 1, "a": {"z": true, "c": null}, "order_id": "INS-1"}"#)
                .unwrap();
        assert_eq!(canonical, r#"{"a":{"c":null,"z":true},"b":1,"order_id":"INS-1"}"#);
    }
}
