#![cfg_attr(not(test), no_std)]

//! Reference traces and the processor loop that replays them.
//!
//! A trace is a text file with one memory operation per line:
//!
//! ```text
//! # comment
//! r  0x80          read a byte
//! w  0x80 7        write a byte
//! rw 0x400         read a little-endian word
//! ww 0x400 0xbeef  write a little-endian word
//! ```
//!
//! Addresses and values are decimal or `0x`-prefixed hexadecimal.

extern crate alloc;

use core::fmt;

use alloc::vec::Vec;
use vmm::{AccessError, AddressSpace, FaultError, VirtualAddress};

/// A single memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadByte(VirtualAddress),
    WriteByte(VirtualAddress, u8),
    ReadWord(VirtualAddress),
    WriteWord(VirtualAddress, u32),
}

impl Operation {
    pub fn address(&self) -> VirtualAddress {
        match *self {
            Self::ReadByte(addr)
            | Self::WriteByte(addr, _)
            | Self::ReadWord(addr)
            | Self::WriteWord(addr, _) => addr,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::WriteByte(..) | Self::WriteWord(..))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadByte(addr) => write!(f, "r {}", addr),
            Self::WriteByte(addr, value) => write!(f, "w {} {:#x}", addr, value),
            Self::ReadWord(addr) => write!(f, "rw {}", addr),
            Self::WriteWord(addr, value) => write!(f, "ww {} {:#x}", addr, value),
        }
    }
}

/// Why a trace line could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceErrorKind {
    UnknownOperation,
    MissingAddress,
    MissingValue,
    BadNumber,
    ValueTooLarge,
    TrailingInput,
}

/// A parse error, with the 1-based line it occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceError {
    pub line: usize,
    pub kind: TraceErrorKind,
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.kind {
            TraceErrorKind::UnknownOperation => "unknown operation",
            TraceErrorKind::MissingAddress => "missing address",
            TraceErrorKind::MissingValue => "missing value",
            TraceErrorKind::BadNumber => "malformed number",
            TraceErrorKind::ValueTooLarge => "value does not fit the access size",
            TraceErrorKind::TrailingInput => "unexpected trailing input",
        };
        write!(f, "line {}: {}", self.line, reason)
    }
}

impl core::error::Error for TraceError {}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Parses a whole trace.
pub fn parse_trace(text: &str) -> Result<Vec<Operation>, TraceError> {
    let mut operations = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let content = line.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let operation = parse_line(content).map_err(|kind| TraceError {
            line: line_number,
            kind,
        })?;
        operations.push(operation);
    }
    Ok(operations)
}

fn parse_line(line: &str) -> Result<Operation, TraceErrorKind> {
    let mut fields = line.split_whitespace();
    let mnemonic = fields.next().ok_or(TraceErrorKind::UnknownOperation)?;

    let address = fields.next().ok_or(TraceErrorKind::MissingAddress)?;
    let address = parse_number(address).ok_or(TraceErrorKind::BadNumber)?;
    let address = usize::try_from(address).map_err(|_| TraceErrorKind::ValueTooLarge)?;
    let address = VirtualAddress::new(address);

    let mut value = || -> Result<u64, TraceErrorKind> {
        let text = fields.next().ok_or(TraceErrorKind::MissingValue)?;
        parse_number(text).ok_or(TraceErrorKind::BadNumber)
    };

    let operation = match mnemonic {
        "r" => Operation::ReadByte(address),
        "rw" => Operation::ReadWord(address),
        "w" => {
            let value = u8::try_from(value()?).map_err(|_| TraceErrorKind::ValueTooLarge)?;
            Operation::WriteByte(address, value)
        }
        "ww" => {
            let value = u32::try_from(value()?).map_err(|_| TraceErrorKind::ValueTooLarge)?;
            Operation::WriteWord(address, value)
        }
        _ => return Err(TraceErrorKind::UnknownOperation),
    };

    if fields.next().is_some() {
        return Err(TraceErrorKind::TrailingInput);
    }
    Ok(operation)
}

/// Why an operation could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The page fault could not be resolved.
    Fault(FaultError),
    /// The access is invalid, or still missed after the fault was resolved.
    Access(AccessError),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fault(err) => write!(f, "{}", err),
            Self::Access(err) => write!(f, "{}", err),
        }
    }
}

impl core::error::Error for ExecError {}

impl From<FaultError> for ExecError {
    fn from(err: FaultError) -> Self {
        Self::Fault(err)
    }
}

impl From<AccessError> for ExecError {
    fn from(err: AccessError) -> Self {
        Self::Access(err)
    }
}

/// The step of a trace that terminated the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunError {
    /// Zero-based index of the failing operation.
    pub step: usize,
    pub operation: Operation,
    pub error: ExecError,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({}): {}", self.step, self.operation, self.error)
    }
}

impl core::error::Error for RunError {}

/// A value returned by a read in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    pub step: usize,
    pub operation: Operation,
    pub value: u32,
}

/// Stands in for the CPU: issues accesses and services the resulting page faults.
pub struct Processor<'a> {
    space: &'a mut AddressSpace,
    steps: usize,
    page_faults: usize,
}

impl<'a> Processor<'a> {
    pub fn new(space: &'a mut AddressSpace) -> Self {
        Self {
            space,
            steps: 0,
            page_faults: 0,
        }
    }

    /// Number of operations completed.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of accesses that trapped on a non-resident page.
    pub fn page_faults(&self) -> usize {
        self.page_faults
    }

    pub fn space(&self) -> &AddressSpace {
        self.space
    }

    /// Performs one operation, returning the value read if it is a read.
    ///
    /// A page fault is handed to the address space and the access is retried once.
    pub fn execute(&mut self, operation: Operation) -> Result<Option<u32>, ExecError> {
        let result = match self.access(operation) {
            Err(AccessError::PageFault(addr)) => {
                self.page_faults += 1;
                log::trace!("trap at {}, resolving", addr);
                self.space.handle_fault(addr)?;
                self.access(operation)
            }
            other => other,
        };
        let value = result?;
        self.steps += 1;
        Ok(value)
    }

    /// Runs `operations` in order, stopping at the first failure.
    pub fn run(&mut self, operations: &[Operation]) -> Result<Vec<ReadResult>, RunError> {
        let mut reads = Vec::new();
        for (step, &operation) in operations.iter().enumerate() {
            match self.execute(operation) {
                Ok(Some(value)) => reads.push(ReadResult {
                    step,
                    operation,
                    value,
                }),
                Ok(None) => {}
                Err(error) => {
                    log::warn!("step {} ({}) failed: {}", step, operation, error);
                    return Err(RunError {
                        step,
                        operation,
                        error,
                    });
                }
            }
        }
        Ok(reads)
    }

    fn access(&mut self, operation: Operation) -> Result<Option<u32>, AccessError> {
        match operation {
            Operation::ReadByte(addr) => self.space.read_u8(addr).map(|v| Some(u32::from(v))),
            Operation::WriteByte(addr, value) => self.space.write_u8(addr, value).map(|_| None),
            Operation::ReadWord(addr) => self.space.read_u32(addr).map(Some),
            Operation::WriteWord(addr, value) => self.space.write_u32(addr, value).map(|_| None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parser {
        use super::*;

        #[test]
        fn parses_every_operation() {
            let trace = "r 0x10\nw 16 255\nrw 0x40\nww 0x44 0xdeadbeef\n";
            assert_eq!(
                parse_trace(trace),
                Ok(vec![
                    Operation::ReadByte(VirtualAddress::new(0x10)),
                    Operation::WriteByte(VirtualAddress::new(16), 255),
                    Operation::ReadWord(VirtualAddress::new(0x40)),
                    Operation::WriteWord(VirtualAddress::new(0x44), 0xdead_beef),
                ])
            );
        }

        #[test]
        fn skips_comments_and_blank_lines() {
            let trace = "# warm up\n\n  r 0   # first page\n";
            assert_eq!(
                parse_trace(trace),
                Ok(vec![Operation::ReadByte(VirtualAddress::new(0))])
            );
        }

        #[test]
        fn reports_line_numbers() {
            let trace = "r 0\n\nx 4\n";
            assert_eq!(
                parse_trace(trace),
                Err(TraceError {
                    line: 3,
                    kind: TraceErrorKind::UnknownOperation
                })
            );
        }

        #[test]
        fn rejects_malformed_lines() {
            let kind = |line: &str| parse_trace(line).unwrap_err().kind;
            assert_eq!(kind("r"), TraceErrorKind::MissingAddress);
            assert_eq!(kind("w 0"), TraceErrorKind::MissingValue);
            assert_eq!(kind("r zz"), TraceErrorKind::BadNumber);
            assert_eq!(kind("w 0 256"), TraceErrorKind::ValueTooLarge);
            assert_eq!(kind("r 0 1"), TraceErrorKind::TrailingInput);
        }

        #[test]
        fn numbers_accept_both_radixes() {
            assert_eq!(parse_number("0x1F"), Some(31));
            assert_eq!(parse_number("0X10"), Some(16));
            assert_eq!(parse_number("42"), Some(42));
            assert_eq!(parse_number("0x"), None);
            assert_eq!(parse_number("-1"), None);
        }
    }

    mod processor {
        use super::*;
        use alloc::sync::Arc;
        use vmm::{ImageBuilder, MemoryFileSystem, MemoryManager, PAGE_SIZE, VmConfig};

        fn space(code: &[u8], limit: usize) -> AddressSpace {
            let fs = Arc::new(MemoryFileSystem::new());
            fs.insert("prog", ImageBuilder::new().code(code).build());
            let config = VmConfig::new()
                .with_resident_limit(limit)
                .with_physical_frames(4)
                .with_stack_pages(2);
            MemoryManager::new(config, fs).unwrap().spawn("prog").unwrap()
        }

        #[test]
        fn faults_then_retries() {
            let mut space = space(&[5; PAGE_SIZE], 2);
            let mut cpu = Processor::new(&mut space);

            assert_eq!(
                cpu.execute(Operation::ReadByte(VirtualAddress::new(3))),
                Ok(Some(5))
            );
            assert_eq!(
                cpu.execute(Operation::ReadByte(VirtualAddress::new(4))),
                Ok(Some(5))
            );
            assert_eq!(cpu.page_faults(), 1);
            assert_eq!(cpu.steps(), 2);
        }

        #[test]
        fn values_survive_eviction() {
            let mut space = space(&[0; PAGE_SIZE], 1);
            let stack = VirtualAddress::new(PAGE_SIZE);
            let other = VirtualAddress::new(2 * PAGE_SIZE);

            let trace = [
                Operation::WriteWord(stack, 0x1234_5678),
                Operation::ReadByte(other),
                Operation::ReadByte(VirtualAddress::new(0)),
                Operation::ReadWord(stack),
            ];
            let reads = Processor::new(&mut space).run(&trace).unwrap();

            assert_eq!(reads.last().map(|read| read.value), Some(0x1234_5678));
            assert_eq!(space.stats().swap_write_backs, 1);
            assert_eq!(space.stats().swap_ins, 1);
        }

        #[test]
        fn stops_at_the_failing_step() {
            let mut space = space(&[0; 4], 1);
            let beyond = VirtualAddress::new(64 * PAGE_SIZE);
            let trace = [
                Operation::ReadByte(VirtualAddress::new(0)),
                Operation::ReadByte(beyond),
                Operation::ReadByte(VirtualAddress::new(1)),
            ];

            let error = Processor::new(&mut space).run(&trace).unwrap_err();
            assert_eq!(error.step, 1);
            assert_eq!(
                error.error,
                ExecError::Access(AccessError::AddressError(beyond))
            );
        }
    }
}
