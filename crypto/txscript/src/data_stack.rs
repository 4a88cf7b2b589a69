use crate::TxScriptError;
use std::fmt::Debug;

/// Maximum byte length of a number consumed by arithmetic opcodes. Results may be longer.
pub(crate) const MAX_SCRIPT_NUM_LEN: usize = 4;

pub(crate) type Stack = Vec<Vec<u8>>;

/// Conversion between stack elements and the typed values opcodes operate on
pub(crate) trait StackItem: Sized + Debug {
    fn from_item(item: &[u8]) -> Result<Self, TxScriptError>;
    fn to_item(&self) -> Vec<u8>;
}

/// Rejects numbers with superfluous high bytes, including negative zero
pub(crate) fn check_minimal_number_encoding(v: &[u8]) -> Result<(), TxScriptError> {
    let Some(&msb) = v.last() else {
        return Ok(());
    };
    // A zero high byte (sign aside) is only allowed when the next byte would otherwise be read as the sign
    if msb & 0x7f == 0 && (v.len() == 1 || v[v.len() - 2] & 0x80 == 0) {
        return Err(TxScriptError::NotMinimalData(format!("numeric value encoded as {v:x?} is not minimally encoded")));
    }
    Ok(())
}

/// Decodes a little endian sign-magnitude number of arbitrary (≤ 8) length
pub(crate) fn decode_number(v: &[u8], max_len: usize) -> Result<i64, TxScriptError> {
    if v.len() > max_len {
        return Err(TxScriptError::NumberTooBig(format!(
            "numeric value encoded as {v:x?} is {} bytes which exceeds the max allowed of {max_len}",
            v.len()
        )));
    }
    check_minimal_number_encoding(v)?;
    let Some((&msb, rest)) = v.split_last() else {
        return Ok(0);
    };
    let magnitude = rest.iter().rev().fold((msb & 0x7f) as i64, |acc, &b| (acc << 8) | b as i64);
    Ok(if msb & 0x80 != 0 { -magnitude } else { magnitude })
}

pub(crate) fn encode_number(n: i64) -> Vec<u8> {
    if n == 0 {
        return vec![];
    }
    let negative = n < 0;
    let mut magnitude = n.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    // Make room for the sign bit if the high byte already uses it
    if out.last().is_some_and(|&b| b & 0x80 != 0) {
        out.push(if negative { 0x80 } else { 0 });
    } else if negative {
        *out.last_mut().expect("non-zero number has at least one byte") |= 0x80;
    }
    out
}

impl StackItem for i64 {
    fn from_item(item: &[u8]) -> Result<Self, TxScriptError> {
        decode_number(item, MAX_SCRIPT_NUM_LEN)
    }

    fn to_item(&self) -> Vec<u8> {
        encode_number(*self)
    }
}

impl StackItem for i32 {
    fn from_item(item: &[u8]) -> Result<Self, TxScriptError> {
        // Four bytes of sign-magnitude always fit
        Ok(decode_number(item, MAX_SCRIPT_NUM_LEN)? as i32)
    }

    fn to_item(&self) -> Vec<u8> {
        encode_number(*self as i64)
    }
}

impl StackItem for bool {
    fn from_item(item: &[u8]) -> Result<Self, TxScriptError> {
        match item.split_last() {
            None => Ok(false),
            // Negative zero is false as well
            Some((&last, rest)) => Ok(last & 0x7f != 0 || rest.iter().any(|&b| b != 0)),
        }
    }

    fn to_item(&self) -> Vec<u8> {
        if *self { vec![1] } else { vec![] }
    }
}

pub(crate) trait DataStack {
    fn pop_items<const N: usize, T: StackItem>(&mut self) -> Result<[T; N], TxScriptError>;
    fn pop_raw<const N: usize>(&mut self) -> Result<[Vec<u8>; N], TxScriptError>;
    fn push_item<T: StackItem>(&mut self, item: T);
    fn drop_items<const N: usize>(&mut self) -> Result<(), TxScriptError>;
    fn dup_items<const N: usize>(&mut self) -> Result<(), TxScriptError>;
    fn over_items<const N: usize>(&mut self) -> Result<(), TxScriptError>;
    fn rot_items<const N: usize>(&mut self) -> Result<(), TxScriptError>;
    fn swap_items<const N: usize>(&mut self) -> Result<(), TxScriptError>;
}

impl DataStack for Stack {
    fn pop_items<const N: usize, T: StackItem>(&mut self) -> Result<[T; N], TxScriptError> {
        let raw: [Vec<u8>; N] = self.pop_raw()?;
        let mut items = Vec::with_capacity(N);
        for item in raw.iter() {
            items.push(T::from_item(item)?);
        }
        items.try_into().map_err(|_| TxScriptError::InvalidState("stack item count mismatch".to_string()))
    }

    fn pop_raw<const N: usize>(&mut self) -> Result<[Vec<u8>; N], TxScriptError> {
        if self.len() < N {
            return Err(TxScriptError::InvalidStackOperation(N, self.len()));
        }
        self.split_off(self.len() - N).try_into().map_err(|_| TxScriptError::InvalidState("stack item count mismatch".to_string()))
    }

    fn push_item<T: StackItem>(&mut self, item: T) {
        self.push(item.to_item());
    }

    fn drop_items<const N: usize>(&mut self) -> Result<(), TxScriptError> {
        if self.len() < N {
            return Err(TxScriptError::InvalidStackOperation(N, self.len()));
        }
        self.truncate(self.len() - N);
        Ok(())
    }

    fn dup_items<const N: usize>(&mut self) -> Result<(), TxScriptError> {
        if self.len() < N {
            return Err(TxScriptError::InvalidStackOperation(N, self.len()));
        }
        self.extend_from_within(self.len() - N..);
        Ok(())
    }

    fn over_items<const N: usize>(&mut self) -> Result<(), TxScriptError> {
        if self.len() < 2 * N {
            return Err(TxScriptError::InvalidStackOperation(2 * N, self.len()));
        }
        self.extend_from_within(self.len() - 2 * N..self.len() - N);
        Ok(())
    }

    fn rot_items<const N: usize>(&mut self) -> Result<(), TxScriptError> {
        if self.len() < 3 * N {
            return Err(TxScriptError::InvalidStackOperation(3 * N, self.len()));
        }
        let start = self.len() - 3 * N;
        self[start..].rotate_left(N);
        Ok(())
    }

    fn swap_items<const N: usize>(&mut self) -> Result<(), TxScriptError> {
        if self.len() < 2 * N {
            return Err(TxScriptError::InvalidStackOperation(2 * N, self.len()));
        }
        let start = self.len() - 2 * N;
        self[start..].rotate_left(N);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_encoding() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[]),
            (1, &[0x01]),
            (-1, &[0x81]),
            (127, &[0x7f]),
            (-127, &[0xff]),
            (128, &[0x80, 0x00]),
            (-128, &[0x80, 0x80]),
            (255, &[0xff, 0x00]),
            (256, &[0x00, 0x01]),
            (-256, &[0x00, 0x81]),
            (32767, &[0xff, 0x7f]),
            (-32768, &[0x00, 0x80, 0x80]),
            (2147483647, &[0xff, 0xff, 0xff, 0x7f]),
            (2147483648, &[0x00, 0x00, 0x00, 0x80, 0x00]),
            (-2147483648, &[0x00, 0x00, 0x00, 0x80, 0x80]),
        ];
        for &(n, bytes) in cases {
            assert_eq!(encode_number(n), bytes, "encoding {n}");
            assert_eq!(decode_number(bytes, 8).unwrap(), n, "decoding {bytes:x?}");
        }
    }

    #[test]
    fn test_number_decoding_rules() {
        assert!(matches!(decode_number(&[0x00], 4), Err(TxScriptError::NotMinimalData(_))));
        assert!(matches!(decode_number(&[0x80], 4), Err(TxScriptError::NotMinimalData(_))));
        assert!(matches!(decode_number(&[0x01, 0x00], 4), Err(TxScriptError::NotMinimalData(_))));
        assert!(matches!(decode_number(&[1, 2, 3, 4, 5], 4), Err(TxScriptError::NumberTooBig(_))));
        assert_eq!(decode_number(&[0xff, 0x00], 4).unwrap(), 255);
    }

    #[test]
    fn test_bool_items() {
        assert!(!bool::from_item(&[]).unwrap());
        assert!(!bool::from_item(&[0x00, 0x80]).unwrap());
        assert!(bool::from_item(&[0x00, 0x01]).unwrap());
        assert!(bool::from_item(&[0x80, 0x00]).unwrap());
    }

    #[test]
    fn test_stack_shuffles() {
        let mut stack: Stack = vec![vec![1], vec![2], vec![3], vec![4], vec![5], vec![6]];
        stack.rot_items::<1>().unwrap();
        assert_eq!(stack, vec![vec![1], vec![2], vec![3], vec![5], vec![6], vec![4]]);
        stack.swap_items::<2>().unwrap();
        assert_eq!(stack, vec![vec![1], vec![2], vec![6], vec![4], vec![3], vec![5]]);
        stack.over_items::<1>().unwrap();
        assert_eq!(stack.last(), Some(&vec![3]));
        assert_eq!(stack.pop_items::<2, i64>().unwrap(), [5, 3]);
        assert!(matches!(stack.drop_items::<9>(), Err(TxScriptError::InvalidStackOperation(9, 5))));
    }
}
