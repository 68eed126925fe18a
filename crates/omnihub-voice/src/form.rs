//! Minimal `application/x-www-form-urlencoded` body parsing shared by
//! the voice adapters.

use std::collections::BTreeMap;

/// Decode a form body into an ordered map. Later duplicates win.
///
/// The ordered map matters for Twilio signature validation, which
/// concatenates parameters sorted by key.
pub fn parse(body: &[u8]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Ok(text) = std::str::from_utf8(body) else {
        return out;
    };
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        let k = urlencoding::decode(k).map(|c| c.into_owned()).unwrap_or_default();
        let v = v.replace('+', " ");
        let v = urlencoding::decode(&v).map(|c| c.into_owned()).unwrap_or_default();
        out.insert(k, v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_escapes_and_plus() {
        let params = parse(b"CallSid=CA123&From=%2B5511999990000&SpeechResult=track+my+order");
        assert_eq!(params["CallSid"], "CA123");
        assert_eq!(params["From"], "+5511999990000");
        assert_eq!(params["SpeechResult"], "track my order");
    }

    #[test]
    fn keys_come_out_sorted() {
        let params = parse(b"b=2&a=1&c=3");
        let keys: Vec<_> = params.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn tolerates_flag_params_and_garbage() {
        let params = parse(b"flag&k=v");
        assert_eq!(params["flag"], "");
        assert_eq!(params["k"], "v");
        assert!(parse(&[0xff, 0xfe]).is_empty());
    }
}
