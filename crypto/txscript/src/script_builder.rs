use crate::{
    MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPTS_SIZE,
    data_stack::encode_number,
    opcodes::{OP_1_NEGATE_VAL, OP_SMALL_INT_MAX_VAL, codes::*},
};
use thiserror::Error;

const DEFAULT_SCRIPT_ALLOC: usize = 512;

#[derive(Error, PartialEq, Eq, Debug, Clone, Copy)]
pub enum ScriptBuilderError {
    #[error("adding opcode {0} would exceed the maximum allowed canonical script length of {MAX_SCRIPTS_SIZE}")]
    OpCodeRejected(u8),

    #[error("adding {0} opcodes would exceed the maximum allowed canonical script length of {MAX_SCRIPTS_SIZE}")]
    OpCodesRejected(usize),

    #[error("adding {0} bytes of data would exceed the maximum allowed canonical script length of {MAX_SCRIPTS_SIZE}")]
    DataRejected(usize),

    #[error("adding a data element of {0} bytes exceed the maximum allowed script element size of {MAX_SCRIPT_ELEMENT_SIZE}")]
    ElementExceedsMaxSize(usize),
}

pub type ScriptBuilderResult<T> = std::result::Result<T, ScriptBuilderError>;

/// Builds scripts using canonical (minimal) push encodings. Pushes that the engine would
/// refuse to execute are rejected instead of being appended.
///
/// ```
/// use kestrel_txscript::opcodes::codes::*;
/// use kestrel_txscript::script_builder::{ScriptBuilder, ScriptBuilderResult};
/// fn hash_lock(hash: &[u8; 32]) -> ScriptBuilderResult<Vec<u8>> {
///     Ok(ScriptBuilder::new().add_op(OpBlake3)?.add_data(hash)?.add_op(OpEqual)?.drain())
/// }
/// ```
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self { script: Vec::with_capacity(DEFAULT_SCRIPT_ALLOC) }
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }

    /// Takes the built script. The builder is left empty.
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.script)
    }

    pub fn add_op(&mut self, opcode: u8) -> ScriptBuilderResult<&mut Self> {
        if self.script.len() >= MAX_SCRIPTS_SIZE {
            return Err(ScriptBuilderError::OpCodeRejected(opcode));
        }
        self.script.push(opcode);
        Ok(self)
    }

    pub fn add_ops(&mut self, opcodes: &[u8]) -> ScriptBuilderResult<&mut Self> {
        if self.script.len() + opcodes.len() > MAX_SCRIPTS_SIZE {
            return Err(ScriptBuilderError::OpCodesRejected(opcodes.len()));
        }
        self.script.extend_from_slice(opcodes);
        Ok(self)
    }

    /// Number of bytes the canonical push of `data` takes
    pub fn canonical_data_size(data: &[u8]) -> usize {
        let data_len = data.len();
        if data_len == 0 || (data_len == 1 && (data[0] <= OP_SMALL_INT_MAX_VAL || data[0] == OP_1_NEGATE_VAL)) {
            return 1;
        }
        data_len
            + match data_len {
                l if l <= OpData75 as usize => 1,
                l if l <= u8::MAX as usize => 2,
                l if l <= u16::MAX as usize => 3,
                _ => 5,
            }
    }

    fn add_raw_data(&mut self, data: &[u8]) -> &mut Self {
        let data_len = data.len();
        match data {
            [] | [0] => {
                self.script.push(Op0);
                return self;
            }
            [n] if *n <= OP_SMALL_INT_MAX_VAL => {
                self.script.push(Op1 - 1 + n);
                return self;
            }
            [OP_1_NEGATE_VAL] => {
                self.script.push(Op1Negate);
                return self;
            }
            _ => {}
        }
        if data_len <= OpData75 as usize {
            self.script.push(data_len as u8);
        } else if data_len <= u8::MAX as usize {
            self.script.extend([OpPushData1, data_len as u8]);
        } else if data_len <= u16::MAX as usize {
            self.script.push(OpPushData2);
            self.script.extend((data_len as u16).to_le_bytes());
        } else {
            self.script.push(OpPushData4);
            self.script.extend((data_len as u32).to_le_bytes());
        }
        self.script.extend_from_slice(data);
        self
    }

    /// Pushes `data` with the smallest encoding the engine accepts
    pub fn add_data(&mut self, data: &[u8]) -> ScriptBuilderResult<&mut Self> {
        let data_size = Self::canonical_data_size(data);
        if self.script.len() + data_size > MAX_SCRIPTS_SIZE {
            return Err(ScriptBuilderError::DataRejected(data_size));
        }
        if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptBuilderError::ElementExceedsMaxSize(data.len()));
        }
        Ok(self.add_raw_data(data))
    }

    pub fn add_i64(&mut self, val: i64) -> ScriptBuilderResult<&mut Self> {
        match val {
            0 => self.add_op(Op0),
            -1 | 1..=16 => self.add_op((Op1 as i64 - 1 + val) as u8),
            _ => self.add_data(&encode_number(val)),
        }
    }

    /// Pushes a lock time as trimmed little endian bytes, the operand form of `OpCheckLockTimeVerify`
    pub fn add_lock_time(&mut self, lock_time: u64) -> ScriptBuilderResult<&mut Self> {
        self.add_u64(lock_time)
    }

    /// Pushes a sequence as trimmed little endian bytes, the operand form of `OpCheckSequenceVerify`
    pub fn add_sequence(&mut self, sequence: u64) -> ScriptBuilderResult<&mut Self> {
        self.add_u64(sequence)
    }

    fn add_u64(&mut self, val: u64) -> ScriptBuilderResult<&mut Self> {
        let buffer = val.to_le_bytes();
        let trimmed_size = 8 - buffer.iter().rev().take_while(|&&b| b == 0).count();
        self.add_data(&buffer[..trimmed_size])
    }
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_i64() {
        let tests: &[(i64, &[u8])] = &[
            (-1, &[Op1Negate]),
            (0, &[Op0]),
            (1, &[Op1]),
            (16, &[Op16]),
            (17, &[OpData1, 0x11]),
            (127, &[OpData1, 0x7f]),
            (128, &[0x02, 0x80, 0]),
            (256, &[0x02, 0, 0x01]),
            (-2, &[OpData1, 0x82]),
            (-128, &[0x02, 0x80, 0x80]),
            (2147483647, &[0x04, 0xff, 0xff, 0xff, 0x7f]),
        ];
        for &(val, expected) in tests {
            assert_eq!(ScriptBuilder::new().add_i64(val).unwrap().script(), expected, "push {val}");
        }
    }

    #[test]
    fn test_add_data() {
        assert_eq!(ScriptBuilder::new().add_data(&[]).unwrap().script(), &[Op0]);
        assert_eq!(ScriptBuilder::new().add_data(&[0x05]).unwrap().script(), &[Op1 + 4]);
        assert_eq!(ScriptBuilder::new().add_data(&[OP_1_NEGATE_VAL]).unwrap().script(), &[Op1Negate]);
        assert_eq!(ScriptBuilder::new().add_data(&[0x20, 0x21]).unwrap().script(), &[0x02, 0x20, 0x21]);

        let data = vec![0x49; 76];
        let script = ScriptBuilder::new().add_data(&data).unwrap().drain();
        assert_eq!(&script[..2], &[OpPushData1, 76]);
        assert_eq!(script.len(), 78);

        let data = vec![0x49; 300];
        let script = ScriptBuilder::new().add_data(&data).unwrap().drain();
        assert_eq!(&script[..3], &[OpPushData2, 0x2c, 0x01]);

        let too_big = vec![0u8; MAX_SCRIPT_ELEMENT_SIZE + 1];
        assert_eq!(
            ScriptBuilder::new().add_data(&too_big).err(),
            Some(ScriptBuilderError::ElementExceedsMaxSize(MAX_SCRIPT_ELEMENT_SIZE + 1))
        );
    }

    #[test]
    fn test_script_size_limit() {
        let mut builder = ScriptBuilder::new();
        builder.add_ops(&vec![OpNop; MAX_SCRIPTS_SIZE]).unwrap();
        assert_eq!(builder.add_op(OpNop).err(), Some(ScriptBuilderError::OpCodeRejected(OpNop)));
        assert_eq!(builder.add_data(&[0x20, 0x21]).err(), Some(ScriptBuilderError::DataRejected(3)));
        assert_eq!(builder.script().len(), MAX_SCRIPTS_SIZE);
    }

    #[test]
    fn test_lock_time_operands() {
        assert_eq!(ScriptBuilder::new().add_lock_time(0).unwrap().script(), &[Op0]);
        assert_eq!(ScriptBuilder::new().add_lock_time(0x1234).unwrap().script(), &[0x02, 0x34, 0x12]);
        assert_eq!(ScriptBuilder::new().add_sequence(u64::MAX).unwrap().script().len(), 9);
    }
}
