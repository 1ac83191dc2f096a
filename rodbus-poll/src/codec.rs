//! Packing of 32-bit values into pairs of 16-bit registers
//!
//! A wide value occupies two consecutive registers. The [`WordOrder`] decides which of the two
//! words (the one at the lower address is always transmitted first) holds the most-significant
//! half. Byte order within each word is always big-endian, as on the wire.

/// Order of the two 16-bit words making up a 32-bit value
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum WordOrder {
    /// The first word is the most-significant half
    #[default]
    BigEndian,
    /// The first word is the least-significant half
    LittleEndian,
}

impl WordOrder {
    /// Create a word order from the big-endian flag
    pub fn from_big_endian(big_endian: bool) -> Self {
        if big_endian {
            Self::BigEndian
        } else {
            Self::LittleEndian
        }
    }

    /// Combine two words, in transmission order, into a 32-bit pattern
    pub fn combine(self, first: u16, second: u16) -> u32 {
        let (hi, lo) = match self {
            Self::BigEndian => (first, second),
            Self::LittleEndian => (second, first),
        };
        (u32::from(hi) << 16) | u32::from(lo)
    }

    /// Split a 32-bit pattern into two words in transmission order
    pub fn split(self, value: u32) -> [u16; 2] {
        let hi = (value >> 16) as u16;
        let lo = (value & 0xFFFF) as u16;
        match self {
            Self::BigEndian => [hi, lo],
            Self::LittleEndian => [lo, hi],
        }
    }

    /// Decode a register pair as a signed 32-bit integer
    pub fn decode_i32(self, words: [u16; 2]) -> i32 {
        self.combine(words[0], words[1]) as i32
    }

    /// Decode a register pair as an IEEE-754 single precision value
    pub fn decode_f32(self, words: [u16; 2]) -> f32 {
        f32::from_bits(self.combine(words[0], words[1]))
    }

    /// Encode an unsigned 32-bit integer as a register pair
    pub fn encode_u32(self, value: u32) -> [u16; 2] {
        self.split(value)
    }

    /// Encode an IEEE-754 single precision value as a register pair
    pub fn encode_f32(self, value: f32) -> [u16; 2] {
        self.split(value.to_bits())
    }
}

impl std::fmt::Display for WordOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BigEndian => f.write_str("big-endian"),
            Self::LittleEndian => f.write_str("little-endian"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn big_endian_puts_first_word_high() {
        assert_eq!(WordOrder::BigEndian.combine(0x1234, 0x5678), 0x1234_5678);
        assert_eq!(WordOrder::BigEndian.split(0x1234_5678), [0x1234, 0x5678]);
    }

    #[test]
    fn little_endian_puts_first_word_low() {
        assert_eq!(WordOrder::LittleEndian.combine(0x1234, 0x5678), 0x5678_1234);
        assert_eq!(WordOrder::LittleEndian.split(0x5678_1234), [0x1234, 0x5678]);
    }

    #[test]
    fn decodes_pi_from_big_endian_pair() {
        let value = WordOrder::BigEndian.decode_f32([0x4048, 0xF5C3]);
        assert_eq!(format!("{value:.2}"), "3.14");
    }

    #[test]
    fn decodes_pi_from_little_endian_pair() {
        let value = WordOrder::LittleEndian.decode_f32([0xF5C3, 0x4048]);
        assert_eq!(format!("{value:.2}"), "3.14");
    }

    #[test]
    fn integers_are_surfaced_as_signed() {
        assert_eq!(WordOrder::BigEndian.decode_i32([0xFFFF, 0xFFFE]), -2);
        assert_eq!(WordOrder::LittleEndian.decode_i32([0xFFFE, 0xFFFF]), -2);
        assert_eq!(WordOrder::BigEndian.decode_i32([0x0001, 0xE240]), 123_456);
    }

    #[test]
    fn default_is_big_endian() {
        assert_eq!(WordOrder::default(), WordOrder::BigEndian);
        assert_eq!(WordOrder::from_big_endian(false), WordOrder::LittleEndian);
    }

    fn order() -> impl Strategy<Value = WordOrder> {
        prop_oneof![Just(WordOrder::BigEndian), Just(WordOrder::LittleEndian)]
    }

    proptest! {
        #[test]
        fn integer_pairs_round_trip(first: u16, second: u16, order in order()) {
            let value = order.decode_i32([first, second]);
            prop_assert_eq!(order.encode_u32(value as u32), [first, second]);
        }

        #[test]
        fn float_pairs_round_trip(first: u16, second: u16, order in order()) {
            let value = order.decode_f32([first, second]);
            prop_assert_eq!(order.encode_f32(value), [first, second]);
        }

        #[test]
        fn integers_round_trip(value: u32, order in order()) {
            prop_assert_eq!(order.decode_i32(order.encode_u32(value)) as u32, value);
        }

        #[test]
        fn finite_floats_round_trip(
            value in proptest::num::f32::NORMAL | proptest::num::f32::ZERO,
            order in order(),
        ) {
            prop_assert_eq!(order.decode_f32(order.encode_f32(value)).to_bits(), value.to_bits());
        }
    }
}
