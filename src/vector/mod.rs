//! ISSP command framing.
//!
//! Every command is 22 SCLK cycles, MSB first:
//! - write: `op(3) address(8) data(8) 111`
//! - read: `op(3) address(8)`, SDATA turned around for 2 cycles, 8 data
//!   bits driven by the target, one more cycle
//! - no-op: 22 zero bits
//!
//! Nothing outside this module deals with individual bits.

pub mod tables;

use std::time::Duration;

use crate::config::Voltage;
use crate::error::IsspError;
use crate::lines::{
	Hardware,
	Line,
	Transport,
};

pub const COMMAND_BITS: usize = 22;

const OP_WRITE_MEM: u8 = 0b100;
const OP_READ_MEM: u8 = 0b101;
const OP_WRITE_REG: u8 = 0b110;
const OP_READ_REG: u8 = 0b111;

pub const SRAM_STATUS: u8 = 0xF8;
pub const SRAM_ID_HIGH: u8 = 0xF8;
pub const SRAM_ID_LOW: u8 = 0xF9;
pub const SRAM_BLOCK_ID: u8 = 0xFA;
pub const SRAM_ROW_BUFFER: u8 = 0x80;

// zero clocks after the target released SDATA again
pub const POLL_TRAILER_BITS: usize = 40;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Command {
	Noop,
	WriteMem(u8, u8),
	WriteReg(u8, u8),
	ReadMem(u8),
	ReadReg(u8),
}

impl Command {
	fn push_bits(symbols: &mut Vec<Symbol>, value: u8, count: u32) {
		for bit in (0..count).rev() {
			symbols.push(Symbol::Bit(0 != (value >> bit) & 1));
		}
	}

	fn append_to(self, symbols: &mut Vec<Symbol>) {
		match self {
			Command::Noop => {
				symbols.extend((0..COMMAND_BITS).map(|_| Symbol::Bit(false)));
			},
			Command::WriteMem(address, value) | Command::WriteReg(address, value) => {
				let op = if let Command::WriteMem(..) = self { OP_WRITE_MEM } else { OP_WRITE_REG };
				Self::push_bits(symbols, op, 3);
				Self::push_bits(symbols, address, 8);
				Self::push_bits(symbols, value, 8);
				Self::push_bits(symbols, 0b111, 3);
			},
			Command::ReadMem(address) | Command::ReadReg(address) => {
				let op = if let Command::ReadMem(_) = self { OP_READ_MEM } else { OP_READ_REG };
				Self::push_bits(symbols, op, 3);
				Self::push_bits(symbols, address, 8);
				symbols.push(Symbol::Turnaround);
				symbols.push(Symbol::Turnaround);
				symbols.extend((0..8).map(|_| Symbol::Capture));
				symbols.push(Symbol::Turnaround);
			},
		}
	}
}

/// One SCLK cycle (or the wait-and-poll handshake) of a vector.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Symbol {
	// SDATA driven by us
	Bit(bool),
	// SDATA released, no sample
	Turnaround,
	// SDATA released, sampled before the clock pulse
	Capture,
	// release SDATA, one clock, wait for SDATA high then low
	Poll,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum InitPhase {
	First,
	Second,
	Third(Voltage),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Operation {
	ResetEntry,
	Initialize(InitPhase),
	SiliconIdSetup,
	SiliconIdRead,
	AddressSet {
		bank: u8,
		block: u8,
	},
	// offset into the row buffer
	ByteWrite {
		offset: u8,
		value: u8,
	},
	ByteRead {
		offset: u8,
	},
	EraseBlock,
	EraseAll,
	ProgramBlock,
	ReadBlock,
	ReadStatus,
	WaitAndPoll,
	ReadMemory(u8),
	WriteMemory(u8, u8),
	ReadRegister(u8),
	WriteRegister(u8, u8),
}

impl Operation {
	/// Part of erasing or programming flash.
	pub fn is_write(&self) -> bool {
		match self {
			Operation::ByteWrite { .. }
			| Operation::EraseBlock
			| Operation::EraseAll
			| Operation::ProgramBlock => true,
			_ => false,
		}
	}
}

/// Immutable bit pattern of one operation.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Vector {
	operation: Operation,
	symbols: Vec<Symbol>,
}

impl Vector {
	fn from_commands(operation: Operation, commands: &[Command]) -> Self {
		let mut symbols = Vec::with_capacity(commands.len() * COMMAND_BITS);
		for c in commands {
			c.append_to(&mut symbols);
		}
		Vector { operation, symbols }
	}

	pub fn operation(&self) -> Operation {
		self.operation
	}

	pub fn symbols(&self) -> &[Symbol] {
		&self.symbols
	}

	pub fn len(&self) -> usize {
		self.symbols.len()
	}

	pub fn is_empty(&self) -> bool {
		self.symbols.is_empty()
	}

	pub fn captures(&self) -> usize {
		self.symbols.iter().filter(|&&s| s == Symbol::Capture).count()
	}
}

pub fn encode(operation: Operation) -> Vector {
	use self::tables::*;

	match operation {
		Operation::ResetEntry => {
			let mut symbols: Vec<Symbol> = RESET_ENTRY_PREFIX.iter().map(|&b| Symbol::Bit(b)).collect();
			symbols.resize(COMMAND_BITS, Symbol::Bit(false));
			Vector { operation, symbols }
		},
		Operation::Initialize(InitPhase::First) => Vector::from_commands(operation, INITIALIZE_1),
		Operation::Initialize(InitPhase::Second) => Vector::from_commands(operation, INITIALIZE_2),
		Operation::Initialize(InitPhase::Third(Voltage::V3_3)) => Vector::from_commands(operation, INITIALIZE_3_3V3),
		Operation::Initialize(InitPhase::Third(Voltage::V5)) => Vector::from_commands(operation, INITIALIZE_3_5V),
		Operation::SiliconIdSetup => Vector::from_commands(operation, ID_SETUP),
		Operation::SiliconIdRead => Vector::from_commands(operation, &[
			Command::ReadMem(SRAM_ID_HIGH),
			Command::ReadMem(SRAM_ID_LOW),
		]),
		Operation::AddressSet { bank, block } => {
			let mut commands = select_bank(bank).to_vec();
			commands.push(Command::WriteMem(SRAM_BLOCK_ID, block));
			Vector::from_commands(operation, &commands)
		},
		Operation::ByteWrite { offset, value } => {
			debug_assert!(offset < 0x78);
			Vector::from_commands(operation, &[Command::WriteMem(SRAM_ROW_BUFFER | offset, value)])
		},
		Operation::ByteRead { offset } => {
			debug_assert!(offset < 0x78);
			Vector::from_commands(operation, &[Command::ReadMem(SRAM_ROW_BUFFER | offset)])
		},
		Operation::EraseBlock => Vector::from_commands(operation, ERASE_BLOCK),
		Operation::EraseAll => Vector::from_commands(operation, BULK_ERASE),
		Operation::ProgramBlock => Vector::from_commands(operation, PROGRAM_BLOCK),
		Operation::ReadBlock => Vector::from_commands(operation, VERIFY_SETUP),
		Operation::ReadStatus => Vector::from_commands(operation, &[Command::ReadMem(SRAM_STATUS)]),
		Operation::WaitAndPoll => {
			let mut symbols = vec![Symbol::Poll];
			symbols.resize(1 + POLL_TRAILER_BITS, Symbol::Bit(false));
			Vector { operation, symbols }
		},
		Operation::ReadMemory(address) => Vector::from_commands(operation, &[Command::ReadMem(address)]),
		Operation::WriteMemory(address, value) => Vector::from_commands(operation, &[Command::WriteMem(address, value)]),
		Operation::ReadRegister(address) => Vector::from_commands(operation, &[Command::ReadReg(address)]),
		Operation::WriteRegister(address, value) => Vector::from_commands(operation, &[Command::WriteReg(address, value)]),
	}
}

/// Clock out every symbol of `vector`, returning the captured bits.
///
/// A vector always runs to its end: if the wait-and-poll handshake times
/// out, the remaining symbols are still sent before the error is returned.
pub fn transmit<H: Hardware>(transport: &mut Transport<H>, vector: &Vector, poll_timeout: Duration) -> Result<Vec<bool>, IsspError> {
	let mut captured = Vec::with_capacity(vector.captures());
	let mut failure = None;

	for symbol in vector.symbols() {
		match *symbol {
			Symbol::Bit(bit) => transport.send_bit(bit),
			Symbol::Turnaround => {
				if transport.level(Line::Data).is_some() {
					transport.release(Line::Data);
				}
				transport.pulse_clock();
			},
			Symbol::Capture => {
				if transport.level(Line::Data).is_some() {
					transport.release(Line::Data);
				}
				captured.push(transport.sample(Line::Data));
				transport.pulse_clock();
			},
			Symbol::Poll => {
				transport.release(Line::Data);
				transport.pulse_clock();
				let res = transport.wait_for(Line::Data, true, poll_timeout)
					.and_then(|()| transport.wait_for(Line::Data, false, poll_timeout));
				if let Err(e) = res {
					warn!("{:?}: {}", vector.operation(), e);
					failure = Some(e);
				}
			},
		}
	}

	// a broken line explains a poll timeout, not the other way round
	transport.check()?;
	match failure {
		Some(e) => Err(e),
		None => Ok(captured),
	}
}

/// MSB first; trailing bits that don't fill a byte are dropped.
pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
	bits.chunks(8)
		.filter(|chunk| chunk.len() == 8)
		.map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
		.collect()
}
