use std::path::Path;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::{
    ByteShiftTable, DecodeError, EncodeError, Token, TokenId, TokenListExt, Tokenizer, Vocabulary,
    VocabularyError,
};

/// What to do with a merged token that has no vocabulary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnknownTokenPolicy {
    /// Skip it. The encoded sequence silently loses that piece of text.
    #[default]
    Drop,
    /// Abort encoding with [`EncodeError::NotInVocabulary`].
    Fail,
    /// Emit the given id in its place.
    Substitute(TokenId),
}

/// Byte-level BPE tokenizer applying merge rules in file order, one full pass
/// per rule.
#[derive(Debug, Clone)]
pub struct BpeTokenizer {
    vocab: Vocabulary,
    shift: ByteShiftTable,
    unknown: UnknownTokenPolicy,
}

impl BpeTokenizer {
    pub fn new(vocab: Vocabulary) -> Self {
        Self {
            vocab,
            shift: ByteShiftTable::build(),
            unknown: UnknownTokenPolicy::default(),
        }
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, VocabularyError> {
        Ok(Self::new(Vocabulary::from_dir(dir)?))
    }

    pub fn with_unknown_policy(mut self, policy: UnknownTokenPolicy) -> Self {
        self.unknown = policy;
        self
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Splits `text` into single-character tokens of its shifted form: one
    /// token per UTF-8 byte, with unsafe bytes moved into `256..512`.
    pub fn shifted_chars(&self, text: &str) -> Vec<Token> {
        text.bytes()
            .map(|byte| self.shift.encode_char(byte).to_string())
            .collect()
    }

    /// Runs every merge rule over `tokens`, earliest rule first.
    pub fn merge(&self, tokens: &mut Vec<Token>) {
        for (left, right) in self.vocab.merges() {
            if tokens.len() < 2 {
                break;
            }
            tokens.apply_merge(left, right);
        }
    }

    /// Merged subword strings for `text`, before vocabulary lookup.
    pub fn pieces(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.shifted_chars(text);
        self.merge(&mut tokens);
        tokens
    }

    pub fn encode_text(&self, text: &str) -> Result<Vec<TokenId>, EncodeError> {
        let pieces = self.pieces(text);
        let mut ids = Vec::with_capacity(pieces.len());

        for piece in pieces {
            match (self.vocab.id(&piece), self.unknown) {
                (Some(id), _) => ids.push(id),
                (None, UnknownTokenPolicy::Drop) => {
                    debug!("dropping out-of-vocabulary piece {piece:?}")
                }
                (None, UnknownTokenPolicy::Fail) => return Err(EncodeError::NotInVocabulary(piece)),
                (None, UnknownTokenPolicy::Substitute(id)) => ids.push(id),
            }
        }

        trace!("encoded {} bytes into {} tokens", text.len(), ids.len());
        Ok(ids)
    }

    /// Raw bytes of one token, with the byte shift undone.
    ///
    /// Code points up to and including 256 pass through unchanged, as do
    /// characters beyond the shifted range; those are written as their UTF-8
    /// encoding.
    pub fn decode_bytes(&self, id: TokenId) -> Result<Vec<u8>, DecodeError> {
        let token = self.vocab.token(id).ok_or(DecodeError::UnknownToken {
            id,
            vocab_size: self.vocab.len(),
        })?;

        let mut bytes = Vec::with_capacity(token.len());
        for letter in token.chars() {
            let code_point = letter as u32;
            let restored = if code_point <= 256 {
                u8::try_from(code_point).ok()
            } else {
                self.shift.decode(code_point)
            };

            match restored {
                Some(byte) => bytes.push(byte),
                None => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(letter.encode_utf8(&mut buf).as_bytes());
                }
            }
        }

        Ok(bytes)
    }

    /// Text of a single token.
    pub fn decode_token(&self, id: TokenId) -> Result<String, DecodeError> {
        let bytes = self.decode_bytes(id)?;
        String::from_utf8(bytes).map_err(|e| DecodeError::TextDecode(e.into_bytes()))
    }

    /// Text of a token sequence. Bytes are joined before validation so a
    /// character split across tokens decodes correctly.
    pub fn decode_ids(&self, ids: &[TokenId]) -> Result<String, DecodeError> {
        let mut bytes = Vec::new();
        for &id in ids {
            bytes.extend(self.decode_bytes(id)?);
        }
        String::from_utf8(bytes).map_err(|e| DecodeError::TextDecode(e.into_bytes()))
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, string: &str) -> anyhow::Result<Vec<TokenId>> {
        Ok(self.encode_text(string)?)
    }

    fn decode(&self, tokens: &[TokenId]) -> anyhow::Result<String> {
        Ok(self.decode_ids(tokens)?)
    }
}

/// Vocabulary JSON with one entry per byte (id = byte value) and
/// `<|endoftext|>` at 256.
#[cfg(test)]
pub(crate) fn byte_level_vocab_json() -> String {
    let shift = ByteShiftTable::build();
    let mut entries: Vec<String> = (0..=u8::MAX)
        .map(|b| {
            let key = shift.encode_char(b).to_string();
            format!("{}: {b}", serde_json::to_string(&key).unwrap())
        })
        .collect();
    entries.push(r#""<|endoftext|>": 256"#.to_string());
    format!("{{{}}}", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tokenizer(vocab: &str, merges: &str) -> BpeTokenizer {
        BpeTokenizer::new(Vocabulary::load(vocab, merges).unwrap())
    }

    #[test]
    fn adjacent_pair_is_merged() {
        let tok = tokenizer(r#"{"a": 0, "b": 1, "ab": 2}"#, "a b");
        assert_eq!(tok.encode_text("ab").unwrap(), vec![2]);
        assert_eq!(tok.encode_text("aab").unwrap(), vec![0, 2]);
        assert_eq!(tok.encode_text("ba").unwrap(), vec![1, 0]);
    }

    #[test]
    fn rules_apply_in_file_order() {
        let vocab = r#"{"a": 0, "b": 1, "c": 2, "ab": 3, "bc": 4}"#;

        // "a b" runs first and consumes the "b" that "b c" would need
        let tok = tokenizer(vocab, "a b\nb c");
        assert_eq!(tok.pieces("abc"), vec!["ab", "c"]);

        let tok = tokenizer(vocab, "b c\na b");
        assert_eq!(tok.pieces("abc"), vec!["a", "bc"]);
    }

    #[test]
    fn later_rules_build_on_earlier_merges() {
        let tok = tokenizer(
            r#"{"a": 0, "b": 1, "ab": 2, "abab": 3}"#,
            "a b\nab ab",
        );
        assert_eq!(tok.encode_text("abab").unwrap(), vec![3]);
    }

    #[test]
    fn whitespace_is_shifted_before_merging() {
        let tok = tokenizer(r#"{"Ġ": 0, "h": 1, "i": 2, "Ġh": 3, "hi": 4}"#, "Ġ h");
        assert_eq!(tok.shifted_chars(" h"), vec!["Ġ", "h"]);
        assert_eq!(tok.encode_text(" hi").unwrap(), vec![3, 2]);
    }

    #[test]
    fn multi_byte_text_becomes_one_token_per_byte() {
        let tok = tokenizer(r#"{"a": 0}"#, "");
        // "é" is 0xC3 0xA9, both printable latin-1 code points
        assert_eq!(tok.shifted_chars("é"), vec!["Ã", "©"]);
    }

    #[test]
    fn unknown_pieces_follow_the_policy() {
        let vocab = r#"{"a": 0, "b": 1}"#;

        let tok = tokenizer(vocab, "");
        assert_eq!(tok.encode_text("axb").unwrap(), vec![0, 1]);

        let tok = tokenizer(vocab, "").with_unknown_policy(UnknownTokenPolicy::Fail);
        assert_eq!(
            tok.encode_text("axb").unwrap_err(),
            EncodeError::NotInVocabulary("x".to_string())
        );

        let tok = tokenizer(vocab, "").with_unknown_policy(UnknownTokenPolicy::Substitute(1));
        assert_eq!(tok.encode_text("axa").unwrap(), vec![0, 1, 0]);
    }

    #[test]
    fn decode_reverses_the_shift() {
        let tok = tokenizer(r#"{"Ġhello": 0, "Ċ": 1, "ĉx": 2}"#, "");
        assert_eq!(tok.decode_token(0).unwrap(), " hello");
        assert_eq!(tok.decode_token(1).unwrap(), "\n");
        assert_eq!(tok.decode_token(2).unwrap(), "\tx");
    }

    #[test]
    fn code_point_256_passes_through() {
        let tok = tokenizer(r#"{"Ā": 0}"#, "");
        assert_eq!(tok.decode_token(0).unwrap(), "Ā");
    }

    #[test]
    fn out_of_range_id_is_unknown_token() {
        let tok = tokenizer(r#"{"a": 0}"#, "");
        assert_eq!(
            tok.decode_token(5).unwrap_err(),
            DecodeError::UnknownToken { id: 5, vocab_size: 1 }
        );
    }

    #[test]
    fn split_character_decodes_as_a_sequence_only() {
        // "é" = 0xC3 0xA9 spread over two tokens
        let tok = tokenizer(r#"{"Ã": 0, "©": 1}"#, "");
        assert!(matches!(tok.decode_token(0), Err(DecodeError::TextDecode(_))));
        assert_eq!(tok.decode_ids(&[0, 1]).unwrap(), "é");
    }

    #[test]
    fn tokenizer_trait_round_trips() {
        let tok = tokenizer(&byte_level_vocab_json(), "");
        let ids = Tokenizer::encode(&tok, "line one\n\tline two").unwrap();
        assert_eq!(Tokenizer::decode(&tok, &ids).unwrap(), "line one\n\tline two");
    }

    const WORD_MERGES: &str = "Ġ h\ne l\nl o\nĠh el\nĠ w\no r\nl d\nĠw or";

    /// Byte-level vocabulary extended with every token `WORD_MERGES` can build.
    fn word_tokenizer() -> BpeTokenizer {
        let bytes = byte_level_vocab_json();
        let vocab = format!(
            r#"{}, "Ġh": 257, "el": 258, "lo": 259, "Ġhel": 260, "Ġw": 261, "or": 262, "ld": 263, "Ġwor": 264}}"#,
            bytes.trim_end_matches('}')
        );
        tokenizer(&vocab, WORD_MERGES)
    }

    #[test]
    fn merged_pieces_round_trip() {
        let tok = word_tokenizer();

        assert_eq!(tok.pieces(" hello world"), vec!["Ġhel", "lo", "Ġwor", "ld"]);
        let ids = tok.encode_text(" hello world").unwrap();
        assert_eq!(ids, vec![260, 259, 264, 263]);
        assert_eq!(tok.decode_ids(&ids).unwrap(), " hello world");
    }

    proptest! {
        #[test]
        fn ascii_text_round_trips(text in "[!-~]{0,64}") {
            let tok = tokenizer(&byte_level_vocab_json(), "");
            let ids = tok.encode_text(&text).unwrap();
            prop_assert_eq!(ids.len(), text.len());
            prop_assert_eq!(tok.decode_ids(&ids).unwrap(), text);
        }

        #[test]
        fn merged_text_round_trips(text in "[ dehlorw\n]{0,64}") {
            let tok = word_tokenizer().with_unknown_policy(UnknownTokenPolicy::Fail);
            let ids = tok.encode_text(&text).unwrap();
            prop_assert!(ids.len() <= text.len());
            prop_assert_eq!(tok.decode_ids(&ids).unwrap(), text);
        }
    }
}
