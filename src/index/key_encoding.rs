//! Order-preserving mapping of field values onto index keys.
//!
//! For every implementation `a < b` implies `a.to_key() <= b.to_key()`.
//! Numeric keys are exact. String keys keep only the first eight bytes, so
//! distinct strings may collide and callers must confirm candidates.

use crate::common::EntryWidth;

pub trait SortableKey {
    /// Narrowest entry width able to hold every key of this type.
    const WIDTH: EntryWidth;

    fn to_key(&self) -> i64;
}

impl SortableKey for i64 {
    const WIDTH: EntryWidth = EntryWidth::Long;

    fn to_key(&self) -> i64 {
        *self
    }
}

impl SortableKey for i32 {
    const WIDTH: EntryWidth = EntryWidth::Int;

    fn to_key(&self) -> i64 {
        *self as i64
    }
}

impl SortableKey for i16 {
    const WIDTH: EntryWidth = EntryWidth::Int;

    fn to_key(&self) -> i64 {
        *self as i64
    }
}

impl SortableKey for u8 {
    const WIDTH: EntryWidth = EntryWidth::Int;

    fn to_key(&self) -> i64 {
        *self as i64
    }
}

impl SortableKey for bool {
    const WIDTH: EntryWidth = EntryWidth::Int;

    fn to_key(&self) -> i64 {
        *self as i64
    }
}

impl SortableKey for char {
    const WIDTH: EntryWidth = EntryWidth::Int;

    fn to_key(&self) -> i64 {
        *self as u32 as i64
    }
}

impl SortableKey for f64 {
    const WIDTH: EntryWidth = EntryWidth::Long;

    fn to_key(&self) -> i64 {
        let bits = self.to_bits() as i64;
        // negative values sort in reverse bit order
        if bits < 0 {
            bits ^ i64::MAX
        } else {
            bits
        }
    }
}

impl SortableKey for f32 {
    const WIDTH: EntryWidth = EntryWidth::Int;

    fn to_key(&self) -> i64 {
        let bits = self.to_bits() as i32;
        (if bits < 0 { bits ^ i32::MAX } else { bits }) as i64
    }
}

impl SortableKey for str {
    const WIDTH: EntryWidth = EntryWidth::Long;

    fn to_key(&self) -> i64 {
        let mut prefix = [0u8; 8];
        let bytes = self.as_bytes();
        let len = bytes.len().min(8);
        prefix[..len].copy_from_slice(&bytes[..len]);
        (u64::from_be_bytes(prefix) ^ (1 << 63)) as i64
    }
}

impl SortableKey for String {
    const WIDTH: EntryWidth = EntryWidth::Long;

    fn to_key(&self) -> i64 {
        self.as_str().to_key()
    }
}

impl<K: SortableKey + ?Sized> SortableKey for &K {
    const WIDTH: EntryWidth = K::WIDTH;

    fn to_key(&self) -> i64 {
        (**self).to_key()
    }
}

pub fn decode_f64(key: i64) -> f64 {
    let bits = if key < 0 { key ^ i64::MAX } else { key };
    f64::from_bits(bits as u64)
}

pub fn decode_f32(key: i64) -> f32 {
    let key = key as i32;
    let bits = if key < 0 { key ^ i32::MAX } else { key };
    f32::from_bits(bits as u32)
}
