use super::DecodeError;

/// Moves the longest valid UTF-8 prefix of `pending` into `out`.
///
/// An incomplete sequence at the end stays in `pending` so the next token can
/// finish it. Bytes that can never become valid UTF-8 are an error; `pending`
/// is left untouched in that case.
pub fn drain_utf8(pending: &mut Vec<u8>, out: &mut String) -> Result<(), DecodeError> {
    let valid_up_to = match std::str::from_utf8(pending) {
        Ok(text) => {
            out.push_str(text);
            pending.clear();
            return Ok(());
        }
        Err(e) if e.error_len().is_some() => return Err(DecodeError::TextDecode(pending.clone())),
        Err(e) => e.valid_up_to(),
    };

    let rest = pending.split_off(valid_up_to);
    // the prefix was just validated
    out.push_str(&String::from_utf8_lossy(pending));
    *pending = rest;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_text_is_drained() {
        let mut pending = b"hello".to_vec();
        let mut out = String::new();
        drain_utf8(&mut pending, &mut out).unwrap();
        assert_eq!(out, "hello");
        assert!(pending.is_empty());
    }

    #[test]
    fn split_character_waits_for_the_rest() {
        let euro = "€".as_bytes();
        let mut pending = vec![b'x', euro[0], euro[1]];
        let mut out = String::new();

        drain_utf8(&mut pending, &mut out).unwrap();
        assert_eq!(out, "x");
        assert_eq!(pending, &euro[..2]);

        pending.push(euro[2]);
        drain_utf8(&mut pending, &mut out).unwrap();
        assert_eq!(out, "x€");
        assert!(pending.is_empty());
    }

    #[test]
    fn invalid_bytes_are_an_error() {
        let mut pending = vec![b'a', 0xff, b'b'];
        let mut out = String::new();
        let err = drain_utf8(&mut pending, &mut out).unwrap_err();
        assert_eq!(err, DecodeError::TextDecode(vec![b'a', 0xff, b'b']));
        assert!(out.is_empty());
    }
}
