// Vectors from "PSoC 1 ISSP Programming Specifications" (001-15239 Rev. *L).
//
// SROM calls: KEY1/KEY2 at SRAM 0xF8/0xF9, function id in A (reg 0xF0),
// writing 0x12 to CPU_SCR0 (reg 0xFF) starts the call.

use super::Command::{
	self,
	Noop,
	WriteMem,
	WriteReg,
};

/// Clocked in right after reset; replaces the first command of Initialize-1.
pub const RESET_ENTRY_PREFIX: [bool; 7] = [true, true, false, false, true, false, true];

pub const INITIALIZE_1: &[Command] = &[
	Noop, Noop, Noop, Noop, Noop,
	WriteReg(0xF7, 0x00), WriteReg(0xF6, 0x00), WriteMem(0xF8, 0x3A), WriteMem(0xF9, 0x03),
	WriteReg(0xF5, 0x00), WriteReg(0xF4, 0x03), WriteMem(0xFB, 0x80), WriteReg(0xF9, 0x30),
	WriteReg(0xFA, 0x40), WriteReg(0xF0, 0x09), WriteReg(0xF8, 0x00), WriteReg(0xFF, 0x12),
];

pub const INITIALIZE_2: &[Command] = &[
	WriteReg(0xF7, 0x00), WriteReg(0xF6, 0x00), WriteMem(0xF8, 0x3A), WriteMem(0xF9, 0x03),
	WriteReg(0xF5, 0x00), WriteReg(0xF4, 0x03), WriteMem(0xFB, 0x80), WriteReg(0xF9, 0x30),
	WriteReg(0xFA, 0x40), WriteMem(0xFA, 0x01), WriteReg(0xF0, 0x06), WriteReg(0xF8, 0x00),
	WriteReg(0xFF, 0x12),
];

// Initialize-3 only differs in the two trim values
macro_rules! initialize_3 {
	($trim_a:expr, $trim_b:expr) => {
		&[
			WriteReg(0xF7, 0x00), WriteReg(0xF4, 0x03), WriteReg(0xF5, 0x00), WriteReg(0xF6, 0x08),
			WriteReg(0xF8, 0x51), WriteReg(0xF9, $trim_a), WriteReg(0xFA, 0x30), WriteReg(0xFF, 0x12),
			Noop,
			WriteReg(0xF7, 0x00), WriteReg(0xF4, 0x03), WriteReg(0xF5, 0x00), WriteReg(0xF6, 0x08),
			WriteReg(0xF8, 0x60), WriteReg(0xF9, 0xEA), WriteReg(0xFA, 0x30), WriteReg(0xF7, 0x10),
			WriteReg(0xFF, 0x12),
			Noop,
			WriteReg(0xF7, 0x00), WriteReg(0xF4, 0x03), WriteReg(0xF5, 0x00), WriteReg(0xF6, 0x08),
			WriteReg(0xF8, 0x51), WriteReg(0xF9, $trim_b), WriteReg(0xFA, 0x30), WriteReg(0xFF, 0x12),
			Noop,
			WriteReg(0xF7, 0x00), WriteReg(0xF4, 0x03), WriteReg(0xF5, 0x00), WriteReg(0xF6, 0x08),
			WriteReg(0xF8, 0x60), WriteReg(0xF9, 0xE8), WriteReg(0xFA, 0x30), WriteReg(0xF7, 0x10),
			WriteReg(0xFF, 0x12),
			Noop,
		]
	};
}

pub const INITIALIZE_3_3V3: &[Command] = initialize_3!(0xF8, 0xF9);
pub const INITIALIZE_3_5V: &[Command] = initialize_3!(0xFC, 0xFD);

pub const ID_SETUP: &[Command] = &[
	WriteReg(0xF7, 0x10), WriteReg(0xE0, 0x02), WriteReg(0xF7, 0x00), WriteReg(0xF6, 0x00),
	WriteMem(0xF8, 0x3A), WriteMem(0xF9, 0x03), WriteReg(0xF5, 0x00), WriteReg(0xF4, 0x03),
	WriteMem(0xFB, 0x80), WriteReg(0xF9, 0x30), WriteReg(0xFA, 0x40), WriteMem(0xFA, 0x00),
	WriteReg(0xF0, 0x06), WriteReg(0xF8, 0x00), WriteReg(0xFF, 0x12),
];

pub const BULK_ERASE: &[Command] = &[
	WriteMem(0xFC, 0x15), WriteMem(0xFE, 0x56), WriteReg(0xF7, 0x00), WriteReg(0xF6, 0x00),
	WriteMem(0xF8, 0x3A), WriteMem(0xF9, 0x03), WriteReg(0xF5, 0x00), WriteReg(0xF4, 0x03),
	WriteMem(0xFB, 0x80), WriteReg(0xF9, 0x30), WriteReg(0xFA, 0x40), WriteReg(0xF0, 0x05),
	WriteReg(0xF8, 0x00), WriteReg(0xFF, 0x12),
];

pub const PROGRAM_BLOCK: &[Command] = &[
	WriteMem(0xFC, 0x54), WriteMem(0xFE, 0x56), WriteReg(0xF7, 0x00), WriteReg(0xF6, 0x00),
	WriteMem(0xF8, 0x3A), WriteMem(0xF9, 0x03), WriteReg(0xF5, 0x00), WriteReg(0xF4, 0x03),
	WriteMem(0xFB, 0x80), WriteReg(0xF9, 0x30), WriteReg(0xFA, 0x40), WriteReg(0xF0, 0x02),
	WriteReg(0xF8, 0x00), WriteReg(0xFF, 0x12),
];

// loads one flash block into the row buffer
pub const VERIFY_SETUP: &[Command] = &[
	WriteReg(0xF7, 0x00), WriteReg(0xF6, 0x00), WriteMem(0xF8, 0x3A), WriteMem(0xF9, 0x03),
	WriteReg(0xF5, 0x00), WriteReg(0xF4, 0x03), WriteMem(0xFB, 0x80), WriteReg(0xF9, 0x30),
	WriteReg(0xFA, 0x40), WriteReg(0xF0, 0x01), WriteReg(0xF8, 0x00), WriteReg(0xFF, 0x12),
];

pub const ERASE_BLOCK: &[Command] = &[
	WriteMem(0xFC, 0x54), WriteMem(0xFE, 0x56), WriteReg(0xF7, 0x00), WriteReg(0xF6, 0x00),
	WriteMem(0xF8, 0x3A), WriteMem(0xF9, 0x03), WriteReg(0xF5, 0x00), WriteReg(0xF4, 0x03),
	WriteReg(0xF9, 0x30), WriteReg(0xFA, 0x40), WriteReg(0xF0, 0x03), WriteReg(0xF8, 0x00),
	WriteReg(0xFF, 0x12),
];

pub fn select_bank(bank: u8) -> [Command; 3] {
	// FLS_PR1 (0xFA) is only reachable with the XIO bit set
	[WriteReg(0xF7, 0x10), WriteReg(0xFA, bank), WriteReg(0xF7, 0x00)]
}
