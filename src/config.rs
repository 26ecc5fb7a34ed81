use std::fmt;
use std::str;
use std::time::Duration;

use crate::error::IsspError;

// row buffer lives at SRAM 0x80, SROM parameters start at 0xF8
pub const MAX_BLOCK_SIZE: usize = 64;
pub const DEFAULT_BLOCK_SIZE: usize = 64;
pub const DEFAULT_BLOCKS_PER_BANK: usize = 128;
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ResetStrategy {
	// pulse XRES
	HardReset,
	// third line switches target power
	PowerCycle,
}

impl fmt::Display for ResetStrategy {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ResetStrategy::HardReset => write!(f, "hard-reset"),
			ResetStrategy::PowerCycle => write!(f, "power-cycle"),
		}
	}
}

impl str::FromStr for ResetStrategy {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"hard-reset" | "xres" => Ok(ResetStrategy::HardReset),
			"power-cycle" | "power" => Ok(ResetStrategy::PowerCycle),
			_ => bail!("unknown reset strategy {:?} (expected hard-reset or power-cycle)", s),
		}
	}
}

/// Target supply voltage; selects the Initialize-3 vector.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Voltage {
	V3_3,
	V5,
}

impl str::FromStr for Voltage {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"3.3" | "3v3" | "3.3v" => Ok(Voltage::V3_3),
			"5" | "5v" => Ok(Voltage::V5),
			_ => bail!("unknown target voltage {:?} (expected 3v3 or 5v)", s),
		}
	}
}

/// What ends up in block positions the image doesn't supply.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum FillPolicy {
	Zero,
	// keep what the device currently holds
	Preserve,
}

impl str::FromStr for FillPolicy {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"zero" => Ok(FillPolicy::Zero),
			"preserve" => Ok(FillPolicy::Preserve),
			_ => bail!("unknown fill policy {:?} (expected zero or preserve)", s),
		}
	}
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Config {
	pub block_size: usize,
	pub blocks_per_bank: usize,
	/// attempts per block, including the first one
	pub retry_limit: u32,
	pub reset_strategy: ResetStrategy,
	/// minimum time a line holds a level before it is changed or sampled
	pub settle_delay: Duration,
	pub reset_pulse: Duration,
	pub power_off_time: Duration,
	pub poll_timeout: Duration,
	pub expected_id: Option<u16>,
	pub voltage: Voltage,
	pub patch_mode: bool,
	pub fill_policy: FillPolicy,
	pub continue_on_failure: bool,
	/// stop verifying at the first differing byte
	pub fail_fast: bool,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			block_size: DEFAULT_BLOCK_SIZE,
			blocks_per_bank: DEFAULT_BLOCKS_PER_BANK,
			retry_limit: DEFAULT_RETRY_LIMIT,
			reset_strategy: ResetStrategy::HardReset,
			settle_delay: Duration::from_micros(1),
			reset_pulse: Duration::from_micros(20),
			power_off_time: Duration::from_millis(100),
			poll_timeout: Duration::from_millis(100),
			expected_id: None,
			voltage: Voltage::V5,
			patch_mode: false,
			fill_policy: FillPolicy::Zero,
			continue_on_failure: false,
			fail_fast: false,
		}
	}
}

impl Config {
	pub fn validate(&self) -> Result<(), IsspError> {
		fn invalid(msg: String) -> Result<(), IsspError> {
			Err(IsspError::Configuration(msg))
		}

		if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
			return invalid(format!("block size {} not in 1..={}", self.block_size, MAX_BLOCK_SIZE));
		}
		if self.blocks_per_bank == 0 || self.blocks_per_bank > 256 {
			return invalid(format!("{} blocks per bank not in 1..=256", self.blocks_per_bank));
		}
		if self.retry_limit == 0 {
			return invalid("retry limit must allow at least one attempt".into());
		}
		if self.poll_timeout == Duration::from_secs(0) {
			return invalid("poll timeout must not be zero".into());
		}
		Ok(())
	}

	// patch mode never writes bytes the image doesn't supply
	pub fn effective_fill_policy(&self) -> FillPolicy {
		if self.patch_mode {
			FillPolicy::Preserve
		} else {
			self.fill_policy
		}
	}

	/// (bank, block in bank) of a global block index
	pub fn locate(&self, block: usize) -> Result<(u8, u8), IsspError> {
		let bank = block / self.blocks_per_bank;
		if bank > 0xff {
			return Err(IsspError::Configuration(format!("block {} lies beyond bank 255", block)));
		}
		Ok((bank as u8, (block % self.blocks_per_bank) as u8))
	}

	pub fn block_base(&self, block: usize) -> usize {
		block * self.block_size
	}
}
