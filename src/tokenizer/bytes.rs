//! Reversible remapping of whitespace and control bytes.
//!
//! The tokenizer works on an intermediate string where every raw byte is one
//! character. Bytes that would read as whitespace or control characters are
//! moved into the private range `256..512` so merge matching never sees them
//! literally. Printable bytes keep their own code point.

/// First code point of the shifted range.
pub const SHIFT_OFFSET: u32 = 256;

/// Bytes treated as unsafe: ASCII control and space, DEL plus the C1 control
/// range and NBSP, and the soft hyphen.
pub fn is_unsafe_byte(byte: u8) -> bool {
    byte <= 32 || (127..=160).contains(&byte) || byte == 173
}

/// Forward and backward lookup tables for the byte shift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteShiftTable {
    encode: [u32; 256],
    decode: [u8; 256],
    unsafe_count: usize,
}

impl ByteShiftTable {
    /// Builds the tables. Unsafe bytes get offsets `256 + n` in ascending byte
    /// order.
    pub fn build() -> Self {
        let mut encode = [0u32; 256];
        let mut decode = [0u8; 256];
        let mut n = 0usize;

        for byte in 0..=u8::MAX {
            encode[byte as usize] = byte as u32;
            if is_unsafe_byte(byte) {
                encode[byte as usize] = SHIFT_OFFSET + n as u32;
                decode[n] = byte;
                n += 1;
            }
        }

        Self {
            encode,
            decode,
            unsafe_count: n,
        }
    }

    /// Code point that stands for `byte` in the shifted form.
    pub fn encode(&self, byte: u8) -> u32 {
        self.encode[byte as usize]
    }

    /// Character that stands for `byte` in the shifted form.
    pub fn encode_char(&self, byte: u8) -> char {
        // every mapped value is below 512, so never a surrogate
        char::from_u32(self.encode(byte)).unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    /// Original byte for a shifted code point, or `None` when `code_point` is
    /// not one of the synthetic offsets.
    pub fn decode(&self, code_point: u32) -> Option<u8> {
        let n = code_point.checked_sub(SHIFT_OFFSET)? as usize;
        (n < self.unsafe_count).then(|| self.decode[n])
    }

    /// Number of bytes moved into the shifted range.
    pub fn unsafe_count(&self) -> usize {
        self.unsafe_count
    }
}

impl Default for ByteShiftTable {
    fn default() -> Self {
        Self::build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn printable_bytes_map_to_themselves() {
        let table = ByteShiftTable::build();
        assert_eq!(table.encode(b'a'), 'a' as u32);
        assert_eq!(table.encode(b'~'), '~' as u32);
        assert_eq!(table.encode(0xff), 0xff);
    }

    #[test]
    fn unsafe_bytes_get_ascending_offsets() {
        let table = ByteShiftTable::build();
        assert_eq!(table.unsafe_count(), 68);
        assert_eq!(table.encode(0), 256);
        assert_eq!(table.encode(b' '), 256 + 32);
        assert_eq!(table.encode(127), 256 + 33);
        assert_eq!(table.encode(160), 256 + 66);
        assert_eq!(table.encode(173), 256 + 67);
    }

    #[test]
    fn decode_ignores_code_points_outside_shift_range() {
        let table = ByteShiftTable::build();
        assert_eq!(table.decode('a' as u32), None);
        assert_eq!(table.decode(256 + 68), None);
        assert_eq!(table.decode(256 + 10), Some(b'\n'));
    }

    #[test]
    fn mapping_is_a_bijection() {
        let table = ByteShiftTable::build();
        let mut seen = std::collections::HashSet::new();
        for byte in 0..=u8::MAX {
            assert!(seen.insert(table.encode(byte)));
            assert!(table.encode(byte) < 512);
        }
        assert_eq!(seen.len(), 256);
    }

    proptest! {
        #[test]
        fn every_byte_round_trips(byte in any::<u8>()) {
            let table = ByteShiftTable::build();
            let mapped = table.encode(byte);
            let restored = table.decode(mapped).unwrap_or(mapped as u8);
            prop_assert_eq!(restored, byte);
        }
    }
}
