macro_rules! impl_ext_trait {
    ($name:ident, $t:ty $(, $sign_bit:ident)?) => {
        pub trait $name {
            fn bit(self, i: u8) -> bool;

            $(fn $sign_bit(self) -> bool;)?
        }

        impl $name for $t {
            #[inline(always)]
            fn bit(self, i: u8) -> bool {
                self & (1 << i) != 0
            }

            $(
                #[inline(always)]
                fn $sign_bit(self) -> bool {
                    self.bit((<$t>::BITS - 1) as u8)
                }
            )?
        }
    };
}

impl_ext_trait!(U16Ext, u16, sign_bit);
impl_ext_trait!(U32Ext, u32);

pub trait I32Ext {
    fn clamp_to_i16(self) -> i16;
}

impl I32Ext for i32 {
    #[inline(always)]
    fn clamp_to_i16(self) -> i16 {
        self.clamp(i16::MIN.into(), i16::MAX.into()) as i16
    }
}

/// Signed 32x32 multiply that keeps only the high 32 bits of the 64-bit product.
///
/// Envelope levels and volumes are full-range 32-bit fractions (`0x7FFF_FFFF` is just under 1.0),
/// so multiplying a sample by one and keeping the high word scales the sample by half that
/// fraction. Callers that want unity gain pre-shift the sample left by 1.
///
/// The result is the floor of `a * b / 2^32`; negative products round towards negative infinity.
#[inline(always)]
#[must_use]
pub fn mul_shr32(a: i32, b: i32) -> i32 {
    ((i64::from(a) * i64::from(b)) >> 32) as i32
}

/// 1.15 fixed-point multiply used by the reverb coefficients and the core volume registers.
#[inline(always)]
#[must_use]
pub fn mul_q15(a: i32, b: i32) -> i32 {
    ((i64::from(a) * i64::from(b)) >> 15) as i32
}

// Addresses are 20 bits split across a high/low register pair
pub fn set_address_high(address: u32, value: u16) -> u32 {
    (address & 0xFFFF) | (u32::from(value & 0xF) << 16)
}

pub fn set_address_low(address: u32, value: u16) -> u32 {
    (address & 0xF_0000) | u32::from(value)
}

// Voice bitmasks put voices 0-15 in the first register and 16-23 in the second
pub fn set_mask_low(mask: u32, value: u16) -> u32 {
    (mask & !0xFFFF) | u32::from(value)
}

pub fn set_mask_high(mask: u32, value: u16) -> u32 {
    (mask & 0xFFFF) | (u32::from(value & 0xFF) << 16)
}
