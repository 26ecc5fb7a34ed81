use std::ops::Range;

use crate::config::FillPolicy;
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
pub struct BlockResult {
	pub block: usize,
	// 0 if the block already held the requested bytes
	pub attempts: u32,
	pub success: bool,
	pub unchanged: bool,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ProgramReport {
	pub blocks: Vec<BlockResult>,
	pub cancelled: bool,
}

impl ProgramReport {
	pub fn failed<'a>(&'a self) -> impl Iterator<Item = &'a BlockResult> + 'a {
		self.blocks.iter().filter(|r| !r.success)
	}

	pub fn is_success(&self) -> bool {
		!self.cancelled && self.failed().next().is_none()
	}
}

enum Outcome {
	Written,
	Unchanged,
}

impl<H: Hardware> Session<H> {
	fn enter_programming(&mut self, operation: Operation) -> Result<(), IsspError> {
		if !self.state().is_identified() {
			return Err(IsspError::IllegalState {
				operation,
				state: self.state(),
			});
		}
		self.set_state(TargetState::Programming);
		Ok(())
	}

	/// Erase the whole flash with one SROM call.
	pub fn erase_all(&mut self) -> AResult<()> {
		self.enter_programming(Operation::EraseAll)?;
		info!("erasing all flash");
		if let Err(e) = self.srom_call(Operation::EraseAll) {
			return Err(self.fault(e));
		}
		Ok(())
	}

	/// Program the blocks in `blocks` from `image`, in ascending order.
	///
	/// Each block is written as erase, row buffer fill, program; a failed
	/// write-complete poll or a bad SROM status repeats the whole block up to
	/// `retry_limit` attempts. A block that still fails ends the run with
	/// `IsspError::BlockWrite` unless `continue_on_failure` is set.
	pub fn program<I: Image + ?Sized>(&mut self, image: &I, blocks: Range<usize>) -> AResult<ProgramReport> {
		self.enter_programming(Operation::ProgramBlock)?;

		let policy = self.config.effective_fill_policy();
		if self.config.patch_mode && self.config.fill_policy != policy {
			warn!("patch mode keeps flash content the image doesn't cover; ignoring zero fill");
		}

		let first = self.results.len();
		let mut report = ProgramReport::default();
		for index in blocks {
			if self.cancel_requested() {
				info!("cancelled before block {}", index);
				self.cancelled = true;
				report.cancelled = true;
				break;
			}

			// also for untouched blocks: nothing past bank 255 gets skipped silently
			let (bank, in_bank) = match self.config.locate(index) {
				Ok(l) => l,
				Err(e) => return Err(self.fault(e)),
			};
			let block = Block::from_image(image, index, self.config.block_size);
			if self.config.patch_mode && !block.is_touched() {
				continue;
			}

			let result = match self.program_block(&block, bank, in_bank, policy) {
				Ok(r) => r,
				Err(e) => return Err(self.fault(e)),
			};
			self.results.push(result);

			if result.success {
				if result.unchanged {
					debug!("block {}: unchanged", index);
				} else {
					debug!("block {}: written ({} attempt(s))", index, result.attempts);
				}
			} else if self.config.continue_on_failure {
				error!("block {}: giving up after {} attempt(s), continuing", index, result.attempts);
			} else {
				let e = IsspError::BlockWrite {
					block: index,
					attempts: result.attempts,
				};
				return Err(self.fault(e));
			}
		}

		report.blocks = self.results[first..].to_vec();
		let failed = report.failed().count();
		if failed > 0 {
			warn!("{} of {} block(s) failed", failed, report.blocks.len());
		} else {
			info!("programmed {} block(s)", report.blocks.len());
		}
		Ok(report)
	}

	fn program_block(&mut self, block: &Block, bank: u8, in_bank: u8, policy: FillPolicy) -> Result<BlockResult, IsspError> {
		let mut result = BlockResult {
			block: block.index,
			attempts: 0,
			success: false,
			unchanged: false,
		};
		let writes = block.writes(policy);
		// with zero fill every byte of the row buffer gets written anyway
		let mut loaded = policy == FillPolicy::Zero;

		for attempt in 1..=self.config.retry_limit {
			result.attempts = attempt;
			match self.write_block(bank, in_bank, &writes, &mut loaded) {
				Ok(Outcome::Written) => {
					result.success = true;
					return Ok(result);
				},
				Ok(Outcome::Unchanged) => {
					result.attempts = 0;
					result.success = true;
					result.unchanged = true;
					return Ok(result);
				},
				Err(e) if e.is_retryable() => {
					warn!("block {}: attempt {}/{} failed: {}", block.index, attempt, self.config.retry_limit, e);
				},
				Err(e) => return Err(e),
			}
		}

		Ok(result)
	}

	fn write_block(&mut self, bank: u8, in_bank: u8, writes: &[(u8, u8)], loaded: &mut bool) -> Result<Outcome, IsspError> {
		let address = Operation::AddressSet { bank, block: in_bank };

		if !*loaded {
			// row buffer keeps the device's bytes wherever `writes` has a hole;
			// it survives failed attempts, so this happens once per block
			self.issue(address)?;
			self.srom_call(Operation::ReadBlock)?;
			*loaded = true;
			if self.config.patch_mode && self.row_buffer_holds(writes)? {
				return Ok(Outcome::Unchanged);
			}
		}

		self.issue(address)?;
		self.srom_call(Operation::EraseBlock)?;
		for &(offset, value) in writes {
			self.issue(Operation::ByteWrite { offset, value })?;
		}
		// SROM calls may clobber the block number
		self.issue(address)?;
		self.srom_call(Operation::ProgramBlock)?;
		Ok(Outcome::Written)
	}

	fn row_buffer_holds(&mut self, writes: &[(u8, u8)]) -> Result<bool, IsspError> {
		for &(offset, value) in writes {
			if self.read_byte(Operation::ByteRead { offset })? != value {
				return Ok(false);
			}
		}
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn result(block: usize, success: bool) -> BlockResult {
		BlockResult {
			block,
			attempts: 1,
			success,
			unchanged: false,
		}
	}

	#[test]
	fn report_lists_failed_blocks() {
		let report = ProgramReport {
			blocks: vec![result(0, true), result(1, false), result(2, true)],
			cancelled: false,
		};
		assert_eq!(report.failed().map(|r| r.block).collect::<Vec<_>>(), vec![1]);
		assert!(!report.is_success());
	}

	#[test]
	fn cancelled_run_is_not_success() {
		let report = ProgramReport {
			blocks: vec![result(0, true)],
			cancelled: true,
		};
		assert!(!report.is_success());
	}
}
