use std::ops::Range;

use crate::error::IsspError;
use crate::image::{
	Block,
	Image,
};
use crate::lines::Hardware;
use crate::session::{
	Session,
	TargetState,
};
use crate::vector::Operation;
use crate::AResult;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mismatch {
	pub address: usize,
	pub expected: u8,
	pub actual: u8,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct VerifyReport {
	pub blocks_checked: usize,
	pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
	pub fn is_clean(&self) -> bool {
		self.mismatches.is_empty()
	}

	/// Turn mismatches into `IsspError::VerifyMismatch`.
	pub fn into_result(self) -> Result<Self, IsspError> {
		match self.mismatches.first() {
			None => Ok(self),
			Some(m) => Err(IsspError::VerifyMismatch {
				count: self.mismatches.len(),
				first: m.address,
			}),
		}
	}
}

impl<H: Hardware> Session<H> {
	/// Read back every image byte in `blocks` and compare.
	///
	/// Differences are collected, not fatal; only communication failures
	/// abort (and fault the session). With `fail_fast` the first difference
	/// ends the check.
	pub fn verify<I: Image + ?Sized>(&mut self, image: &I, blocks: Range<usize>) -> AResult<VerifyReport> {
		if !self.state().is_identified() {
			return Err(IsspError::IllegalState {
				operation: Operation::ReadBlock,
				state: self.state(),
			}.into());
		}

		let mut report = VerifyReport::default();
		'blocks: for index in blocks {
			let (bank, in_bank) = match self.config.locate(index) {
				Ok(l) => l,
				Err(e) => return Err(self.fault(e)),
			};
			let block = Block::from_image(image, index, self.config.block_size);
			if !block.is_touched() {
				continue;
			}
			if let Err(e) = self.load_block(bank, in_bank) {
				return Err(self.fault(e));
			}
			report.blocks_checked += 1;

			for (offset, expected) in block.bytes.iter().enumerate().filter_map(|(o, b)| b.map(|v| (o, v))) {
				let actual = match self.read_byte(Operation::ByteRead { offset: offset as u8 }) {
					Ok(v) => v,
					Err(e) => return Err(self.fault(e)),
				};
				if actual != expected {
					let address = block.base + offset;
					debug!("0x{:04x}: expected 0x{:02x}, read 0x{:02x}", address, expected, actual);
					report.mismatches.push(Mismatch { address, expected, actual });
					if self.config.fail_fast {
						break 'blocks;
					}
				}
			}
		}

		if report.is_clean() {
			info!("verified {} block(s)", report.blocks_checked);
		} else {
			warn!("{} byte(s) differ in {} checked block(s)", report.mismatches.len(), report.blocks_checked);
		}
		self.set_state(TargetState::Verified);
		self.verify_report = Some(report.clone());
		Ok(report)
	}

	fn load_block(&mut self, bank: u8, in_bank: u8) -> Result<(), IsspError> {
		self.issue(Operation::AddressSet { bank, block: in_bank })?;
		self.srom_call(Operation::ReadBlock)
	}
}
