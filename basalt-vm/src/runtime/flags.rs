use crate::isa::Width;

pub const ZERO: u64 = 1 << 0;
pub const SIGN: u64 = 1 << 1;
pub const OVERFLOW: u64 = 1 << 2;
pub const CARRY: u64 = 1 << 3;

/// Condition flags held in `sfr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub zero: bool,
    pub sign: bool,
    pub overflow: bool,
    pub carry: bool,
}

impl Flags {
    pub fn from_bits(bits: u64) -> Self {
        Self {
            zero: bits & ZERO != 0,
            sign: bits & SIGN != 0,
            overflow: bits & OVERFLOW != 0,
            carry: bits & CARRY != 0,
        }
    }

    pub fn bits(self) -> u64 {
        let mut bits = 0;
        if self.zero {
            bits |= ZERO;
        }
        if self.sign {
            bits |= SIGN;
        }
        if self.overflow {
            bits |= OVERFLOW;
        }
        if self.carry {
            bits |= CARRY;
        }
        bits
    }

    /// Zero and sign of a result; overflow and carry cleared.
    pub fn logical(result: u64, width: Width) -> Self {
        let result = result & width.mask();
        Self {
            zero: result == 0,
            sign: result & width.sign_bit() != 0,
            overflow: false,
            carry: false,
        }
    }

    pub fn add(op1: u64, op2: u64, width: Width) -> (u64, Self) {
        let (a, b) = (op1 & width.mask(), op2 & width.mask());
        let r = a.wrapping_add(b) & width.mask();

        let mut flags = Self::logical(r, width);
        flags.carry = r < a;
        flags.overflow = (a ^ r) & (b ^ r) & width.sign_bit() != 0;
        (r, flags)
    }

    /// `op1 - op2`, carry signalling a borrow.
    pub fn sub(op1: u64, op2: u64, width: Width) -> (u64, Self) {
        let (a, b) = (op1 & width.mask(), op2 & width.mask());
        let r = a.wrapping_sub(b) & width.mask();

        let mut flags = Self::logical(r, width);
        flags.carry = r > a;
        flags.overflow = (a ^ b) & (a ^ r) & width.sign_bit() != 0;
        (r, flags)
    }

    pub fn mul(op1: u64, op2: u64, width: Width) -> (u64, Self) {
        let (a, b) = (op1 & width.mask(), op2 & width.mask());
        let full = a as u128 * b as u128;
        let r = full as u64 & width.mask();

        let mut flags = Self::logical(r, width);
        flags.carry = full > width.mask() as u128;
        flags.overflow = flags.carry;
        (r, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bits_round_trip() {
        for bits in 0..16 {
            assert_eq!(Flags::from_bits(bits).bits(), bits);
        }
    }

    #[test]
    fn subtract_below_zero() {
        let (r, f) = Flags::sub(0, 1, Width::QWord);
        assert_eq!(r, u64::MAX);
        assert!(f.carry && f.sign && !f.zero && !f.overflow);
    }

    #[test]
    fn signed_overflow_on_add() {
        let (r, f) = Flags::add(i64::MAX as u64, 1, Width::QWord);
        assert_eq!(r, 1 << 63);
        assert!(f.overflow && f.sign && !f.carry);

        let (r, f) = Flags::add(0x80, 0x80, Width::Byte);
        assert_eq!(r, 0);
        assert!(f.zero && f.carry && f.overflow);
    }

    #[test]
    fn byte_width_masks_operands() {
        let (r, f) = Flags::add(0x1FF, 1, Width::Byte);
        assert_eq!(r, 0);
        assert!(f.zero && f.carry);
    }

    #[test]
    fn product_overflow() {
        let (r, f) = Flags::mul(0x10, 0x10, Width::Byte);
        assert_eq!(r, 0);
        assert!(f.carry && f.overflow);

        let (r, f) = Flags::mul(6, 7, Width::QWord);
        assert_eq!(r, 42);
        assert!(!f.carry && !f.overflow);
    }

    proptest! {
        #[test]
        fn subtraction_flags_match_comparison(a: u64, b: u64) {
            let (r, f) = Flags::sub(a, b, Width::QWord);
            prop_assert_eq!(r, a.wrapping_sub(b));
            prop_assert_eq!(f.zero, a == b);
            prop_assert_eq!(f.carry, a < b);
            prop_assert_eq!(f.sign, (r as i64) < 0);
            prop_assert_eq!(f.sign != f.overflow, (a as i64) < (b as i64));
        }

        #[test]
        fn addition_flags_match_checked_arithmetic(a: u64, b: u64) {
            let (r, f) = Flags::add(a, b, Width::QWord);
            prop_assert_eq!(r, a.wrapping_add(b));
            prop_assert_eq!(f.carry, a.checked_add(b).is_none());
            prop_assert_eq!(f.overflow, (a as i64).checked_add(b as i64).is_none());
            prop_assert_eq!(f.zero, r == 0);
        }

        #[test]
        fn dword_flags_track_i32(a: u32, b: u32) {
            let (r, f) = Flags::sub(a as u64, b as u64, Width::DWord);
            prop_assert_eq!(r, a.wrapping_sub(b) as u64);
            prop_assert_eq!(f.carry, a < b);
            prop_assert_eq!(f.overflow, (a as i32).checked_sub(b as i32).is_none());
        }
    }
}
