//! Simulated PSoC1 on the other end of the ISSP lines.
//!
//! Decodes the SCLK/SDATA bit stream like the target's ISSP state machine
//! and runs SROM functions against in-memory flash, so a `Session` can be
//! driven without hardware. Faults can be injected into WriteBlock calls.

use std::time::Duration;

use crate::config::{
	ResetStrategy,
	DEFAULT_BLOCKS_PER_BANK,
	DEFAULT_BLOCK_SIZE,
};
use crate::lines::{
	Hardware,
	Line,
};
use crate::vector::tables::RESET_ENTRY_PREFIX;
use crate::vector::{
	COMMAND_BITS,
	POLL_TRAILER_BITS,
	SRAM_BLOCK_ID,
	SRAM_ID_HIGH,
	SRAM_ID_LOW,
	SRAM_ROW_BUFFER,
	SRAM_STATUS,
};

const REG_A: u8 = 0xF0;
const REG_IO_BANK: u8 = 0xF7;
const REG_FLS_PR1: u8 = 0xFA;
const REG_CPU_SCR0: u8 = 0xFF;
const XIO: u8 = 0x10;
const SSC_TRIGGER: u8 = 0x12;

const SSC_READ_BLOCK: u8 = 0x01;
const SSC_WRITE_BLOCK: u8 = 0x02;
const SSC_ERASE_BLOCK: u8 = 0x03;
const SSC_ERASE_ALL: u8 = 0x05;
const SSC_TABLE_READ: u8 = 0x06;

const STATUS_OK: u8 = 0x00;
const STATUS_FAILED: u8 = 0x01;
const STATUS_BAD_BLOCK: u8 = 0x03;

// reads of SDATA high before it drops again (busy pulse, power-on pulse)
const PULSE_READS: u32 = 2;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
	// firmware running, SCLK ignored
	Running,
	// XRES asserted or unpowered
	Held,
	PowerOn {
		high_reads: u32,
	},
	AwaitMagic {
		bits: u32,
		count: usize,
	},
	Command {
		bits: u32,
		count: usize,
	},
	ReadOut {
		value: u8,
		pulses: usize,
	},
	Poll {
		high_reads: u32,
		drained: usize,
	},
}

pub struct SimTarget {
	strategy: ResetStrategy,
	silicon_id: u16,
	block_size: usize,
	blocks_per_bank: usize,
	flash: Vec<u8>,
	sram: Vec<u8>,
	regs: Vec<u8>,
	flash_bank: u8,
	mode: Mode,
	clock: bool,
	host_data: Option<bool>,
	reset_or_power: bool,
	// SROM call in flight; `true` if it never completes
	busy: Option<bool>,
	responsive: bool,
	fail_polls: u32,
	fail_status: u32,
	row_writes: Vec<(usize, u8)>,
	blocks_written: Vec<usize>,
	ssc_log: Vec<u8>,
}

impl SimTarget {
	/// One bank of 128 blocks of 64 bytes, all erased.
	pub fn new(strategy: ResetStrategy, silicon_id: u16) -> Self {
		SimTarget {
			strategy,
			silicon_id,
			block_size: DEFAULT_BLOCK_SIZE,
			blocks_per_bank: DEFAULT_BLOCKS_PER_BANK,
			flash: vec![0; DEFAULT_BLOCK_SIZE * DEFAULT_BLOCKS_PER_BANK],
			sram: vec![0; 256],
			regs: vec![0; 256],
			flash_bank: 0,
			mode: Mode::Running,
			clock: false,
			host_data: None,
			// powered, XRES not asserted
			reset_or_power: strategy == ResetStrategy::PowerCycle,
			busy: None,
			responsive: true,
			fail_polls: 0,
			fail_status: 0,
			row_writes: Vec::new(),
			blocks_written: Vec::new(),
			ssc_log: Vec::new(),
		}
	}

	pub fn with_geometry(mut self, block_size: usize, blocks_per_bank: usize, banks: usize) -> Self {
		self.block_size = block_size;
		self.blocks_per_bank = blocks_per_bank;
		self.flash = vec![0; block_size * blocks_per_bank * banks];
		self
	}

	/// The next `count` WriteBlock calls never signal completion.
	pub fn failing_polls(mut self, count: u32) -> Self {
		self.fail_polls = count;
		self
	}

	/// The next `count` WriteBlock calls report a failure status.
	pub fn failing_status(mut self, count: u32) -> Self {
		self.fail_status = count;
		self
	}

	/// No SROM call ever completes, like a missing or dead target.
	pub fn unresponsive(mut self) -> Self {
		self.responsive = false;
		self
	}

	pub fn flash(&self) -> &[u8] {
		&self.flash
	}

	pub fn set_flash(&mut self, address: usize, data: &[u8]) {
		self.flash[address..address + data.len()].copy_from_slice(data);
	}

	/// (flash address, value) of every row buffer write, in order.
	pub fn row_writes(&self) -> &[(usize, u8)] {
		&self.row_writes
	}

	/// Global index of every block committed by WriteBlock.
	pub fn blocks_written(&self) -> &[usize] {
		&self.blocks_written
	}

	/// SROM function ids in call order.
	pub fn ssc_log(&self) -> &[u8] {
		&self.ssc_log
	}

	pub fn is_held(&self) -> bool {
		self.mode == Mode::Held
	}

	fn current_block(&self) -> usize {
		usize::from(self.flash_bank) * self.blocks_per_bank + usize::from(self.sram[usize::from(SRAM_BLOCK_ID)])
	}

	fn block_range(&self) -> Option<std::ops::Range<usize>> {
		let start = self.current_block() * self.block_size;
		if usize::from(self.sram[usize::from(SRAM_BLOCK_ID)]) >= self.blocks_per_bank || start + self.block_size > self.flash.len() {
			return None;
		}
		Some(start..start + self.block_size)
	}

	fn row_buffer(&self) -> std::ops::Range<usize> {
		let start = usize::from(SRAM_ROW_BUFFER);
		start..start + self.block_size
	}

	fn enter_reset(&mut self) {
		self.mode = Mode::Held;
		self.regs.iter_mut().for_each(|r| *r = 0);
		self.flash_bank = 0;
		self.busy = None;
	}

	fn write_mem(&mut self, address: u8, value: u8) {
		if self.row_buffer().contains(&usize::from(address)) {
			let flash_address = self.current_block() * self.block_size + usize::from(address - SRAM_ROW_BUFFER);
			self.row_writes.push((flash_address, value));
		}
		self.sram[usize::from(address)] = value;
	}

	fn write_reg(&mut self, address: u8, value: u8) {
		if address == REG_FLS_PR1 && self.regs[usize::from(REG_IO_BANK)] & XIO != 0 {
			self.flash_bank = value;
			return;
		}
		self.regs[usize::from(address)] = value;
		if address == REG_CPU_SCR0 && value == SSC_TRIGGER {
			self.supervisor_call();
		}
	}

	fn read_reg(&self, address: u8) -> u8 {
		if address == REG_FLS_PR1 && self.regs[usize::from(REG_IO_BANK)] & XIO != 0 {
			return self.flash_bank;
		}
		self.regs[usize::from(address)]
	}

	fn supervisor_call(&mut self) {
		let function = self.regs[usize::from(REG_A)];
		self.ssc_log.push(function);

		let mut hangs = !self.responsive;
		let status = match function {
			SSC_READ_BLOCK => match self.block_range() {
				Some(r) => {
					let buffer = self.row_buffer();
					self.sram[buffer].copy_from_slice(&self.flash[r]);
					Some(STATUS_OK)
				},
				None => Some(STATUS_BAD_BLOCK),
			},
			SSC_WRITE_BLOCK => {
				if self.fail_polls > 0 {
					self.fail_polls -= 1;
					hangs = true;
					None
				} else if self.fail_status > 0 {
					self.fail_status -= 1;
					Some(STATUS_FAILED)
				} else if hangs {
					None
				} else {
					match self.block_range() {
						Some(r) => {
							let buffer = self.row_buffer();
							self.flash[r].copy_from_slice(&self.sram[buffer]);
							let block = self.current_block();
							self.blocks_written.push(block);
							Some(STATUS_OK)
						},
						None => Some(STATUS_BAD_BLOCK),
					}
				}
			},
			SSC_ERASE_BLOCK => match self.block_range() {
				Some(r) => {
					self.flash[r].iter_mut().for_each(|b| *b = 0);
					Some(STATUS_OK)
				},
				None => Some(STATUS_BAD_BLOCK),
			},
			SSC_ERASE_ALL => {
				self.flash.iter_mut().for_each(|b| *b = 0);
				Some(STATUS_OK)
			},
			SSC_TABLE_READ => {
				// table 0 holds the silicon ID
				if self.sram[usize::from(SRAM_BLOCK_ID)] == 0 {
					self.sram[usize::from(SRAM_ID_HIGH)] = (self.silicon_id >> 8) as u8;
					self.sram[usize::from(SRAM_ID_LOW)] = self.silicon_id as u8;
				}
				None
			},
			_ => Some(STATUS_OK),
		};
		if let Some(status) = status {
			self.sram[usize::from(SRAM_STATUS)] = status;
		}
		self.busy = Some(hangs);
	}

	fn execute(&mut self, bits: u32) {
		let op = (bits >> 19) as u8;
		let address = (bits >> 11) as u8;
		let value = (bits >> 3) as u8;
		match op {
			0b100 => self.write_mem(address, value),
			0b110 => self.write_reg(address, value),
			_ => (),
		}
	}

	fn rising_edge(&mut self) {
		let bit = self.host_data.unwrap_or(false);
		let mode = self.mode;
		self.mode = match mode {
			Mode::Running | Mode::Held | Mode::PowerOn { .. } => mode,
			Mode::AwaitMagic { bits, count } => {
				let bits = (bits << 1) | bit as u32;
				if count + 1 < COMMAND_BITS {
					Mode::AwaitMagic { bits, count: count + 1 }
				} else if bits >> (COMMAND_BITS - RESET_ENTRY_PREFIX.len()) == magic() {
					trace!("sim: ISSP mode");
					Mode::Command { bits: 0, count: 0 }
				} else {
					Mode::AwaitMagic { bits: 0, count: 0 }
				}
			},
			Mode::Command { count: 0, .. } if self.busy.is_some() && self.host_data.is_none() => {
				let hangs = self.busy.take() == Some(true);
				Mode::Poll {
					high_reads: if hangs { 0 } else { PULSE_READS },
					drained: 0,
				}
			},
			Mode::Command { bits, count } => {
				self.busy = None;
				let bits = (bits << 1) | bit as u32;
				let count = count + 1;
				let op = bits >> 8;
				if count == 11 && (op == 0b101 || op == 0b111) {
					let address = bits as u8;
					let value = if op == 0b101 { self.sram[usize::from(address)] } else { self.read_reg(address) };
					Mode::ReadOut { value, pulses: 0 }
				} else if count == COMMAND_BITS {
					self.execute(bits);
					Mode::Command { bits: 0, count: 0 }
				} else {
					Mode::Command { bits, count }
				}
			},
			Mode::ReadOut { value, pulses } => {
				// 2 turnaround cycles, 8 data bits, 1 trailing cycle
				if pulses + 1 == 11 {
					Mode::Command { bits: 0, count: 0 }
				} else {
					Mode::ReadOut { value, pulses: pulses + 1 }
				}
			},
			Mode::Poll { high_reads, drained } => {
				if drained + 1 == POLL_TRAILER_BITS {
					Mode::Command { bits: 0, count: 0 }
				} else {
					Mode::Poll { high_reads, drained: drained + 1 }
				}
			},
		};
	}

	fn target_data(&mut self) -> bool {
		let mode = self.mode;
		match mode {
			Mode::PowerOn { high_reads } => {
				if high_reads > 0 {
					self.mode = Mode::PowerOn { high_reads: high_reads - 1 };
					true
				} else {
					self.mode = Mode::AwaitMagic { bits: 0, count: 0 };
					false
				}
			},
			Mode::ReadOut { value, pulses } if pulses >= 2 && pulses < 10 => {
				0 != (value >> (7 - (pulses - 2))) & 1
			},
			Mode::Poll { high_reads, drained } if high_reads > 0 => {
				self.mode = Mode::Poll { high_reads: high_reads - 1, drained };
				true
			},
			_ => false,
		}
	}
}

fn magic() -> u32 {
	RESET_ENTRY_PREFIX.iter().fold(0, |acc, &b| (acc << 1) | b as u32)
}

impl Hardware for SimTarget {
	fn set_line(&mut self, line: Line, level: bool) {
		match line {
			Line::Clock => {
				let rising = level && !self.clock;
				self.clock = level;
				if rising {
					self.rising_edge();
				}
			},
			Line::Data => self.host_data = Some(level),
			Line::ResetOrPower => {
				let was = self.reset_or_power;
				self.reset_or_power = level;
				match (self.strategy, was, level) {
					(ResetStrategy::HardReset, false, true) => self.enter_reset(),
					(ResetStrategy::HardReset, true, false) => self.mode = Mode::AwaitMagic { bits: 0, count: 0 },
					(ResetStrategy::PowerCycle, true, false) => self.enter_reset(),
					(ResetStrategy::PowerCycle, false, true) => self.mode = Mode::PowerOn { high_reads: PULSE_READS },
					_ => (),
				}
			},
		}
	}

	fn release_line(&mut self, line: Line) {
		match line {
			// pulled down
			Line::Clock => self.clock = false,
			Line::Data => self.host_data = None,
			Line::ResetOrPower => (),
		}
	}

	fn read_line(&mut self, line: Line) -> bool {
		match line {
			Line::Clock => self.clock,
			Line::Data => match self.host_data {
				Some(level) => level,
				None => self.target_data(),
			},
			Line::ResetOrPower => self.reset_or_power,
		}
	}

	fn delay(&mut self, _duration: Duration) {}
}
