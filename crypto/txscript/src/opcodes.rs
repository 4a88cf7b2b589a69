//! Opcode table, script parsing and opcode execution.

use crate::{
    MAX_PUB_KEYS_PER_MULTISIG, MAX_SCRIPT_ELEMENT_SIZE, ScriptSource, TxScriptEngine, TxScriptError,
    data_stack::{DataStack, Stack},
};
use kestrel_consensus_core::{
    constants::{LOCK_TIME_THRESHOLD, MAX_TX_IN_SEQUENCE_NUM, SEQUENCE_LOCK_TIME_DISABLED, SEQUENCE_LOCK_TIME_MASK},
    hashing::{sighash_type::SigHashType, template::calc_template_hash},
    tx::VerifiableTransaction,
};
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Formatter};

#[allow(non_upper_case_globals)]
pub mod codes {
    pub const OpFalse: u8 = 0x00;
    pub const Op0: u8 = OpFalse;
    pub const OpData1: u8 = 0x01;
    pub const OpData20: u8 = 0x14;
    pub const OpData32: u8 = 0x20;
    pub const OpData33: u8 = 0x21;
    pub const OpData65: u8 = 0x41;
    pub const OpData75: u8 = 0x4b;
    pub const OpPushData1: u8 = 0x4c;
    pub const OpPushData2: u8 = 0x4d;
    pub const OpPushData4: u8 = 0x4e;
    pub const Op1Negate: u8 = 0x4f;
    pub const OpReserved: u8 = 0x50;
    pub const OpTrue: u8 = 0x51;
    pub const Op1: u8 = OpTrue;
    pub const Op2: u8 = 0x52;
    pub const Op3: u8 = 0x53;
    pub const Op16: u8 = 0x60;

    pub const OpNop: u8 = 0x61;
    pub const OpVer: u8 = 0x62;
    pub const OpIf: u8 = 0x63;
    pub const OpNotIf: u8 = 0x64;
    pub const OpVerIf: u8 = 0x65;
    pub const OpVerNotIf: u8 = 0x66;
    pub const OpElse: u8 = 0x67;
    pub const OpEndIf: u8 = 0x68;
    pub const OpVerify: u8 = 0x69;
    pub const OpReturn: u8 = 0x6a;

    pub const OpToAltStack: u8 = 0x6b;
    pub const OpFromAltStack: u8 = 0x6c;
    pub const Op2Drop: u8 = 0x6d;
    pub const Op2Dup: u8 = 0x6e;
    pub const Op3Dup: u8 = 0x6f;
    pub const Op2Over: u8 = 0x70;
    pub const Op2Rot: u8 = 0x71;
    pub const Op2Swap: u8 = 0x72;
    pub const OpIfDup: u8 = 0x73;
    pub const OpDepth: u8 = 0x74;
    pub const OpDrop: u8 = 0x75;
    pub const OpDup: u8 = 0x76;
    pub const OpNip: u8 = 0x77;
    pub const OpOver: u8 = 0x78;
    pub const OpPick: u8 = 0x79;
    pub const OpRoll: u8 = 0x7a;
    pub const OpRot: u8 = 0x7b;
    pub const OpSwap: u8 = 0x7c;
    pub const OpTuck: u8 = 0x7d;

    pub const OpCat: u8 = 0x7e;
    pub const OpSubStr: u8 = 0x7f;
    pub const OpLeft: u8 = 0x80;
    pub const OpRight: u8 = 0x81;
    pub const OpSize: u8 = 0x82;

    pub const OpInvert: u8 = 0x83;
    pub const OpAnd: u8 = 0x84;
    pub const OpOr: u8 = 0x85;
    pub const OpXor: u8 = 0x86;
    pub const OpEqual: u8 = 0x87;
    pub const OpEqualVerify: u8 = 0x88;
    pub const OpReserved1: u8 = 0x89;
    pub const OpReserved2: u8 = 0x8a;

    pub const Op1Add: u8 = 0x8b;
    pub const Op1Sub: u8 = 0x8c;
    pub const Op2Mul: u8 = 0x8d;
    pub const Op2Div: u8 = 0x8e;
    pub const OpNegate: u8 = 0x8f;
    pub const OpAbs: u8 = 0x90;
    pub const OpNot: u8 = 0x91;
    pub const Op0NotEqual: u8 = 0x92;
    pub const OpAdd: u8 = 0x93;
    pub const OpSub: u8 = 0x94;
    pub const OpMul: u8 = 0x95;
    pub const OpDiv: u8 = 0x96;
    pub const OpMod: u8 = 0x97;
    pub const OpLShift: u8 = 0x98;
    pub const OpRShift: u8 = 0x99;
    pub const OpBoolAnd: u8 = 0x9a;
    pub const OpBoolOr: u8 = 0x9b;
    pub const OpNumEqual: u8 = 0x9c;
    pub const OpNumEqualVerify: u8 = 0x9d;
    pub const OpNumNotEqual: u8 = 0x9e;
    pub const OpLessThan: u8 = 0x9f;
    pub const OpGreaterThan: u8 = 0xa0;
    pub const OpLessThanOrEqual: u8 = 0xa1;
    pub const OpGreaterThanOrEqual: u8 = 0xa2;
    pub const OpMin: u8 = 0xa3;
    pub const OpMax: u8 = 0xa4;
    pub const OpWithin: u8 = 0xa5;

    pub const OpSHA256: u8 = 0xa8;
    pub const OpCheckMultiSigECDSA: u8 = 0xa9;
    pub const OpBlake3: u8 = 0xaa;
    pub const OpCheckSigECDSA: u8 = 0xab;
    pub const OpCheckSig: u8 = 0xac;
    pub const OpCheckSigVerify: u8 = 0xad;
    pub const OpCheckMultiSig: u8 = 0xae;
    pub const OpCheckMultiSigVerify: u8 = 0xaf;
    pub const OpCheckLockTimeVerify: u8 = 0xb0;
    pub const OpCheckSequenceVerify: u8 = 0xb1;
    pub const OpCheckTemplateVerify: u8 = 0xb2;
}

use codes::*;

/// Value pushed by `Op1Negate`, as a single stack byte
pub const OP_1_NEGATE_VAL: u8 = 0x81;
pub const OP_SMALL_INT_MAX_VAL: u8 = 16;

/// The last opcode which does not count toward the per-script operation limit
pub const NO_COST_OPCODE: u8 = Op16;

/// Script version from which splice opcodes and `OpCheckTemplateVerify` are available
pub const COVENANT_SCRIPT_VERSION: u16 = 1;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum OpCond {
    False,
    True,
    Skip,
}

impl OpCond {
    fn negate(self) -> OpCond {
        match self {
            OpCond::True => OpCond::False,
            OpCond::False => OpCond::True,
            OpCond::Skip => OpCond::Skip,
        }
    }
}

/// A single decoded instruction, borrowing its push data from the script
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ParsedOpcode<'a> {
    pub code: u8,
    pub data: &'a [u8],
}

impl Debug for ParsedOpcode<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Opcode<{:#04x}>{{ data: {:x?} }}", self.code, self.data)
    }
}

impl ParsedOpcode<'_> {
    pub fn is_push_opcode(&self) -> bool {
        self.code <= NO_COST_OPCODE
    }

    /// Flow control opcodes are processed even inside unexecuted branches so that nesting stays balanced
    pub fn is_conditional(&self) -> bool {
        (OpIf..=OpEndIf).contains(&self.code)
    }

    /// Opcodes which fail the script even when they sit in an unexecuted branch
    pub fn is_disabled(&self, script_version: u16) -> bool {
        (match self.code {
            OpInvert | OpAnd | OpOr | OpXor | Op2Mul | Op2Div | OpMul | OpDiv | OpMod | OpLShift | OpRShift => true,
            _ => false,
        }) || (script_version < COVENANT_SCRIPT_VERSION && self.requires_covenant_version())
    }

    pub fn requires_covenant_version(&self) -> bool {
        matches!(self.code, OpCat | OpSubStr | OpLeft | OpRight | OpCheckTemplateVerify)
    }

    pub fn always_illegal(&self) -> bool {
        matches!(self.code, OpVerIf | OpVerNotIf)
    }

    pub fn small_int_value(&self) -> Option<u8> {
        match self.code {
            OpFalse => Some(0),
            Op1..=Op16 => Some(self.code - (Op1 - 1)),
            _ => None,
        }
    }

    pub fn check_minimal_data_push(&self) -> Result<(), TxScriptError> {
        let len = self.data.len();
        let expected = match len {
            0 => OpFalse,
            1 if (1..=OP_SMALL_INT_MAX_VAL).contains(&self.data[0]) => Op1 - 1 + self.data[0],
            1 if self.data[0] == OP_1_NEGATE_VAL => Op1Negate,
            l if l <= OpData75 as usize => l as u8,
            l if l <= u8::MAX as usize => OpPushData1,
            l if l <= u16::MAX as usize => OpPushData2,
            _ => OpPushData4,
        };
        if self.code != expected {
            return Err(TxScriptError::NotMinimalData(format!(
                "data push of {len} bytes encoded with opcode {:#04x} instead of {expected:#04x}",
                self.code
            )));
        }
        Ok(())
    }
}

/// Decodes the next instruction from `script` starting at `*offset`
fn parse_next<'a>(script: &'a [u8], offset: &mut usize) -> Result<ParsedOpcode<'a>, TxScriptError> {
    let code = script[*offset];
    *offset += 1;
    let remaining = &script[*offset..];
    let (len_bytes, data_len) = match code {
        OpData1..=OpData75 => (0, code as usize),
        OpPushData1 | OpPushData2 | OpPushData4 => {
            let width = match code {
                OpPushData1 => 1,
                OpPushData2 => 2,
                _ => 4,
            };
            if remaining.len() < width {
                return Err(TxScriptError::MalformedPushSize(remaining.to_vec()));
            }
            let mut le = [0u8; 4];
            le[..width].copy_from_slice(&remaining[..width]);
            (width, u32::from_le_bytes(le) as usize)
        }
        _ => (0, 0),
    };
    let available = remaining.len() - len_bytes;
    if data_len > available {
        return Err(TxScriptError::MalformedPush(data_len, available));
    }
    let data = &remaining[len_bytes..len_bytes + data_len];
    *offset += len_bytes + data_len;
    Ok(ParsedOpcode { code, data })
}

/// Iterates the instructions of a script. Iteration stops after the first parse error.
pub fn parse_script(script: &[u8]) -> impl Iterator<Item = Result<ParsedOpcode<'_>, TxScriptError>> + '_ {
    let mut offset = 0;
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed || offset >= script.len() {
            return None;
        }
        let next = parse_next(script, &mut offset);
        failed = next.is_err();
        Some(next)
    })
}

/// Reads an up-to-8-byte little endian unsigned operand, padding with zeros
fn read_u64_operand(bytes: &[u8], what: &str) -> Result<u64, TxScriptError> {
    if bytes.len() > 8 {
        return Err(TxScriptError::NumberTooBig(format!("{what} value represented as {bytes:x?} is longer than 8 bytes")));
    }
    let mut le = [0u8; 8];
    le[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(le))
}

fn pick_index(stack: &Stack, n: i32) -> Result<usize, TxScriptError> {
    if n < 0 || n as usize >= stack.len() {
        return Err(TxScriptError::InvalidState(format!("index {n} is invalid for stack size {}", stack.len())));
    }
    Ok(stack.len() - 1 - n as usize)
}

fn splice_bound(n: i32, len: usize) -> Result<usize, TxScriptError> {
    if n < 0 || n as usize > len {
        return Err(TxScriptError::InvalidState(format!("splice index {n} is out of range for data of {len} bytes")));
    }
    Ok(n as usize)
}

impl<T: VerifiableTransaction> TxScriptEngine<'_, T> {
    fn pop_condition(&mut self) -> Result<bool, TxScriptError> {
        let item = self.dstack.pop().ok_or(TxScriptError::EmptyStack)?;
        match item.as_slice() {
            [] => Ok(false),
            [1] => Ok(true),
            _ => Err(TxScriptError::InvalidState("expected boolean".to_string())),
        }
    }

    fn verify_top(&mut self) -> Result<(), TxScriptError> {
        let [valid]: [bool; 1] = self.dstack.pop_items()?;
        if valid { Ok(()) } else { Err(TxScriptError::VerifyError) }
    }

    fn unary_num(&mut self, f: impl FnOnce(i64) -> i64) -> Result<(), TxScriptError> {
        let [a]: [i64; 1] = self.dstack.pop_items()?;
        self.dstack.push_item(f(a));
        Ok(())
    }

    fn binary_num(&mut self, f: impl FnOnce(i64, i64) -> i64) -> Result<(), TxScriptError> {
        let [a, b]: [i64; 2] = self.dstack.pop_items()?;
        self.dstack.push_item(f(a, b));
        Ok(())
    }

    fn push_element(&mut self, element: Vec<u8>) -> Result<(), TxScriptError> {
        if element.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(TxScriptError::ElementTooBig(element.len(), MAX_SCRIPT_ELEMENT_SIZE));
        }
        self.dstack.push(element);
        Ok(())
    }

    fn op_check_sig(&mut self, ecdsa: bool) -> Result<(), TxScriptError> {
        let [mut sig, key] = self.dstack.pop_raw()?;
        let Some(typ) = sig.pop() else {
            self.dstack.push_item(false);
            return Ok(());
        };
        let hash_type = SigHashType::from_u8(typ).map_err(|_| TxScriptError::InvalidSigHashType(typ))?;
        let valid = if ecdsa {
            self.check_ecdsa_signature(hash_type, &key, &sig)?
        } else {
            self.check_schnorr_signature(hash_type, &key, &sig)?
        };
        self.dstack.push_item(valid);
        Ok(())
    }

    fn op_check_lock_time_verify(&mut self) -> Result<(), TxScriptError> {
        let ScriptSource::TxInput { tx, input, .. } = self.script_source else {
            return Err(TxScriptError::NotATransactionInput);
        };
        let [operand] = self.dstack.pop_raw()?;
        let stack_lock_time = read_u64_operand(&operand, "lock time")?;
        let tx_lock_time = tx.tx().lock_time;

        // Both must be DAA scores or both timestamps
        if (tx_lock_time < LOCK_TIME_THRESHOLD) != (stack_lock_time < LOCK_TIME_THRESHOLD) {
            return Err(TxScriptError::UnsatisfiedLockTime(format!(
                "mismatched locktime types -- tx locktime {tx_lock_time}, stack locktime {stack_lock_time}"
            )));
        }
        if stack_lock_time > tx_lock_time {
            return Err(TxScriptError::UnsatisfiedLockTime(format!(
                "locktime requirement not satisfied -- locktime is greater than the transaction locktime: {stack_lock_time} > {tx_lock_time}"
            )));
        }
        // A finalized input would bypass the lock time entirely
        if input.sequence == MAX_TX_IN_SEQUENCE_NUM {
            return Err(TxScriptError::UnsatisfiedLockTime("transaction input is finalized".to_string()));
        }
        Ok(())
    }

    fn op_check_sequence_verify(&mut self) -> Result<(), TxScriptError> {
        let ScriptSource::TxInput { input, .. } = self.script_source else {
            return Err(TxScriptError::NotATransactionInput);
        };
        let [operand] = self.dstack.pop_raw()?;
        let stack_sequence = read_u64_operand(&operand, "sequence")?;

        // A disabled operand makes the opcode a no-op for future soft forks
        if stack_sequence & SEQUENCE_LOCK_TIME_DISABLED != 0 {
            return Ok(());
        }
        if input.sequence & SEQUENCE_LOCK_TIME_DISABLED != 0 {
            return Err(TxScriptError::UnsatisfiedLockTime(format!(
                "transaction sequence has sequence locktime disabled bit set: {:#x}",
                input.sequence
            )));
        }
        if stack_sequence & SEQUENCE_LOCK_TIME_MASK > input.sequence & SEQUENCE_LOCK_TIME_MASK {
            return Err(TxScriptError::UnsatisfiedLockTime(format!(
                "sequence requirement not satisfied -- {} > {}",
                stack_sequence & SEQUENCE_LOCK_TIME_MASK,
                input.sequence & SEQUENCE_LOCK_TIME_MASK
            )));
        }
        Ok(())
    }

    fn op_check_template_verify(&mut self) -> Result<(), TxScriptError> {
        let ScriptSource::TxInput { tx, idx, .. } = self.script_source else {
            return Err(TxScriptError::NotATransactionInput);
        };
        let [committed] = self.dstack.pop_raw()?;
        if committed.len() != 32 {
            return Err(TxScriptError::TemplateHashLength(committed.len()));
        }
        let expected = calc_template_hash(tx.tx(), idx as u32);
        if expected.as_bytes().as_slice() != committed.as_slice() {
            return Err(TxScriptError::CheckTemplateVerify);
        }
        Ok(())
    }

    /// Executes a single instruction. The caller has already checked disabled and push-only constraints.
    pub(crate) fn execute_opcode(&mut self, op: ParsedOpcode<'_>) -> Result<(), TxScriptError> {
        if !op.is_push_opcode() {
            self.num_ops += 1;
            if self.num_ops > crate::MAX_OPS_PER_SCRIPT {
                return Err(TxScriptError::TooManyOperations(crate::MAX_OPS_PER_SCRIPT));
            }
        } else if op.data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(TxScriptError::ElementTooBig(op.data.len(), MAX_SCRIPT_ELEMENT_SIZE));
        }

        if !self.is_executing() && !op.is_conditional() {
            return Ok(());
        }
        if op.code <= OpPushData4 {
            op.check_minimal_data_push()?;
        }

        match op.code {
            OpFalse..=OpPushData4 => self.dstack.push(op.data.to_vec()),
            Op1Negate => self.dstack.push_item(-1i64),
            Op1..=Op16 => self.dstack.push_item((op.code - (Op1 - 1)) as i64),
            OpReserved | OpVer | OpReserved1 | OpReserved2 => return Err(TxScriptError::OpcodeReserved(format!("{op:?}"))),
            OpNop => {}

            OpIf | OpNotIf => {
                let cond = if self.is_executing() {
                    let taken = self.pop_condition()? == (op.code == OpIf);
                    if taken { OpCond::True } else { OpCond::False }
                } else {
                    OpCond::Skip
                };
                self.cond_stack.push(cond);
            }
            OpElse => match self.cond_stack.last_mut() {
                Some(cond) => *cond = cond.negate(),
                None => return Err(TxScriptError::InvalidState("condition stack empty".to_string())),
            },
            OpEndIf => {
                if self.cond_stack.pop().is_none() {
                    return Err(TxScriptError::InvalidState("condition stack empty".to_string()));
                }
            }
            OpVerify => self.verify_top()?,
            OpReturn => return Err(TxScriptError::EarlyReturn),

            OpToAltStack => {
                let [item] = self.dstack.pop_raw()?;
                self.astack.push(item);
            }
            OpFromAltStack => {
                let item = self.astack.pop().ok_or(TxScriptError::EmptyStack)?;
                self.dstack.push(item);
            }
            Op2Drop => self.dstack.drop_items::<2>()?,
            Op2Dup => self.dstack.dup_items::<2>()?,
            Op3Dup => self.dstack.dup_items::<3>()?,
            Op2Over => self.dstack.over_items::<2>()?,
            Op2Rot => self.dstack.rot_items::<2>()?,
            Op2Swap => self.dstack.swap_items::<2>()?,
            OpIfDup => {
                let top = self.dstack.last().ok_or(TxScriptError::EmptyStack)?;
                if crate::data_stack::StackItem::from_item(top)? {
                    let dup = top.clone();
                    self.dstack.push(dup);
                }
            }
            OpDepth => {
                let depth = self.dstack.len() as i64;
                self.dstack.push_item(depth);
            }
            OpDrop => self.dstack.drop_items::<1>()?,
            OpDup => self.dstack.dup_items::<1>()?,
            OpNip => {
                if self.dstack.len() < 2 {
                    return Err(TxScriptError::InvalidStackOperation(2, self.dstack.len()));
                }
                self.dstack.remove(self.dstack.len() - 2);
            }
            OpOver => self.dstack.over_items::<1>()?,
            OpPick | OpRoll => {
                let [n]: [i32; 1] = self.dstack.pop_items()?;
                let index = pick_index(&self.dstack, n)?;
                let item = if op.code == OpPick { self.dstack[index].clone() } else { self.dstack.remove(index) };
                self.dstack.push(item);
            }
            OpRot => self.dstack.rot_items::<1>()?,
            OpSwap => self.dstack.swap_items::<1>()?,
            OpTuck => {
                if self.dstack.len() < 2 {
                    return Err(TxScriptError::InvalidStackOperation(2, self.dstack.len()));
                }
                let top = self.dstack[self.dstack.len() - 1].clone();
                self.dstack.insert(self.dstack.len() - 2, top);
            }

            OpCat => {
                let [mut a, b] = self.dstack.pop_raw()?;
                a.extend_from_slice(&b);
                self.push_element(a)?;
            }
            OpSubStr => {
                // Operands are [data, start, length] with length on top
                let [start, length]: [i32; 2] = self.dstack.pop_items()?;
                let [data] = self.dstack.pop_raw()?;
                let begin = splice_bound(start, data.len())?;
                let end = splice_bound(start.saturating_add(length.max(-1)), data.len())?;
                if length < 0 || end < begin {
                    return Err(TxScriptError::InvalidState(format!("invalid substring length {length}")));
                }
                self.dstack.push(data[begin..end].to_vec());
            }
            OpLeft | OpRight => {
                let [n]: [i32; 1] = self.dstack.pop_items()?;
                let [data] = self.dstack.pop_raw()?;
                let bound = splice_bound(n, data.len())?;
                let part = if op.code == OpLeft { data[..bound].to_vec() } else { data[bound..].to_vec() };
                self.dstack.push(part);
            }
            OpSize => {
                let len = self.dstack.last().ok_or(TxScriptError::EmptyStack)?.len() as i64;
                self.dstack.push_item(len);
            }

            OpEqual | OpEqualVerify => {
                let [a, b] = self.dstack.pop_raw()?;
                if op.code == OpEqual {
                    self.dstack.push_item(a == b);
                } else if a != b {
                    return Err(TxScriptError::VerifyError);
                }
            }

            Op1Add => self.unary_num(|a| a + 1)?,
            Op1Sub => self.unary_num(|a| a - 1)?,
            OpNegate => self.unary_num(|a| -a)?,
            OpAbs => self.unary_num(|a| a.abs())?,
            OpNot => self.unary_num(|a| (a == 0) as i64)?,
            Op0NotEqual => self.unary_num(|a| (a != 0) as i64)?,
            OpAdd => self.binary_num(|a, b| a + b)?,
            OpSub => self.binary_num(|a, b| a - b)?,
            OpBoolAnd => self.binary_num(|a, b| (a != 0 && b != 0) as i64)?,
            OpBoolOr => self.binary_num(|a, b| (a != 0 || b != 0) as i64)?,
            OpNumEqual => self.binary_num(|a, b| (a == b) as i64)?,
            OpNumEqualVerify => {
                let [a, b]: [i64; 2] = self.dstack.pop_items()?;
                if a != b {
                    return Err(TxScriptError::VerifyError);
                }
            }
            OpNumNotEqual => self.binary_num(|a, b| (a != b) as i64)?,
            OpLessThan => self.binary_num(|a, b| (a < b) as i64)?,
            OpGreaterThan => self.binary_num(|a, b| (a > b) as i64)?,
            OpLessThanOrEqual => self.binary_num(|a, b| (a <= b) as i64)?,
            OpGreaterThanOrEqual => self.binary_num(|a, b| (a >= b) as i64)?,
            OpMin => self.binary_num(i64::min)?,
            OpMax => self.binary_num(i64::max)?,
            OpWithin => {
                let [x, min, max]: [i64; 3] = self.dstack.pop_items()?;
                self.dstack.push_item(x >= min && x < max);
            }

            OpSHA256 => {
                let [data] = self.dstack.pop_raw()?;
                self.dstack.push(Sha256::digest(&data).to_vec());
            }
            OpBlake3 => {
                let [data] = self.dstack.pop_raw()?;
                self.dstack.push(blake3::hash(&data).as_bytes().to_vec());
            }
            OpCheckSig => self.op_check_sig(false)?,
            OpCheckSigECDSA => self.op_check_sig(true)?,
            OpCheckSigVerify => {
                self.op_check_sig(false)?;
                self.verify_top()?;
            }
            OpCheckMultiSig => self.op_check_multisig(false)?,
            OpCheckMultiSigECDSA => self.op_check_multisig(true)?,
            OpCheckMultiSigVerify => {
                self.op_check_multisig(false)?;
                self.verify_top()?;
            }
            OpCheckLockTimeVerify => self.op_check_lock_time_verify()?,
            OpCheckSequenceVerify => self.op_check_sequence_verify()?,
            OpCheckTemplateVerify => self.op_check_template_verify()?,

            _ => return Err(TxScriptError::InvalidOpcode(format!("{op:?}"))),
        }
        Ok(())
    }
}

/// Counts signature operations statically. Multisig counts the preceding small int, or the maximum when unknown.
pub(crate) fn count_sig_ops(script: &[u8]) -> u64 {
    let mut num_sigs = 0u64;
    let mut prev: Option<ParsedOpcode<'_>> = None;
    for op in parse_script(script) {
        let Ok(op) = op else {
            break;
        };
        match op.code {
            OpCheckSig | OpCheckSigVerify | OpCheckSigECDSA => num_sigs += 1,
            OpCheckMultiSig | OpCheckMultiSigVerify | OpCheckMultiSigECDSA => {
                num_sigs += match prev.and_then(|p| p.small_int_value()).filter(|&v| v > 0) {
                    Some(n) => n as u64,
                    None => MAX_PUB_KEYS_PER_MULTISIG as u64,
                }
            }
            _ => {}
        }
        prev = Some(op);
    }
    num_sigs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let script = [OpData1, 0x07, OpPushData1, 2, 0xaa, 0xbb, OpDup, OpPushData2, 1, 0, 0xcc];
        let ops: Vec<_> = parse_script(&script).collect::<Result<_, _>>().unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0].data, &[0x07]);
        assert_eq!(ops[1].data, &[0xaa, 0xbb]);
        assert_eq!(ops[2].code, OpDup);
        assert_eq!(ops[3].data, &[0xcc]);

        let truncated = [OpData32, 1, 2, 3];
        let ops: Vec<_> = parse_script(&truncated).collect();
        assert_eq!(ops, vec![Err(TxScriptError::MalformedPush(32, 3))]);

        let missing_len = [OpPushData2, 1];
        assert_eq!(parse_script(&missing_len).next(), Some(Err(TxScriptError::MalformedPushSize(vec![1]))));
    }

    #[test]
    fn test_minimal_pushes() {
        let ok = [
            ParsedOpcode { code: OpFalse, data: &[] },
            ParsedOpcode { code: OpData1, data: &[0x20] },
            ParsedOpcode { code: OpPushData1, data: &[0u8; 76] },
        ];
        for op in ok {
            assert_eq!(op.check_minimal_data_push(), Ok(()), "{op:?}");
        }
        let not_minimal = [
            ParsedOpcode { code: OpData1, data: &[5] },
            ParsedOpcode { code: OpData1, data: &[OP_1_NEGATE_VAL] },
            ParsedOpcode { code: OpPushData1, data: &[0u8; 10] },
            ParsedOpcode { code: OpPushData2, data: &[0u8; 200] },
        ];
        for op in not_minimal {
            assert!(matches!(op.check_minimal_data_push(), Err(TxScriptError::NotMinimalData(_))), "{op:?}");
        }
    }

    #[test]
    fn test_count_sig_ops() {
        assert_eq!(count_sig_ops(&[OpCheckSig, OpCheckSigVerify, OpCheckSigECDSA]), 3);
        assert_eq!(count_sig_ops(&[Op2, OpCheckMultiSig]), 2);
        assert_eq!(count_sig_ops(&[OpCheckMultiSig]), MAX_PUB_KEYS_PER_MULTISIG as u64);
        assert_eq!(count_sig_ops(&[OpCheckSig, OpData32]), 1);
    }

    #[test]
    fn test_version_gated_opcodes() {
        let cat = ParsedOpcode { code: OpCat, data: &[] };
        assert!(cat.is_disabled(0));
        assert!(!cat.is_disabled(COVENANT_SCRIPT_VERSION));
        let mul = ParsedOpcode { code: OpMul, data: &[] };
        assert!(mul.is_disabled(COVENANT_SCRIPT_VERSION));
    }
}
