use failure::Fail;

use crate::session::TargetState;
use crate::vector::Operation;

#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum IsspError {
	// raised before any line is touched
	#[fail(display = "invalid configuration: {}", _0)]
	Configuration(String),

	#[fail(display = "silicon ID 0x{:04x} does not match expected 0x{:04x}", actual, expected)]
	IdMismatch {
		expected: u16,
		actual: u16,
	},

	#[fail(display = "couldn't read silicon ID: {}", _0)]
	IdUnreadable(String),

	#[fail(display = "programming block {} failed after {} attempt(s)", block, attempts)]
	BlockWrite {
		block: usize,
		attempts: u32,
	},

	#[fail(display = "verify found {} differing byte(s), first at 0x{:04x}", count, first)]
	VerifyMismatch {
		count: usize,
		first: usize,
	},

	#[fail(display = "timed out waiting for SDATA to go {}", _0)]
	PollTimeout(&'static str),

	// the line driver failed; captured bits can't be trusted
	#[fail(display = "line access failed: {}", _0)]
	LineIo(String),

	#[fail(display = "SROM function returned status 0x{:02x}", _0)]
	Status(u8),

	#[fail(display = "{:?} not allowed while target is {:?}", operation, state)]
	IllegalState {
		operation: Operation,
		state: TargetState,
	},
}

impl IsspError {
	// timing and SROM failures are worth another attempt; everything else
	// means wiring, target or caller are wrong
	pub fn is_retryable(&self) -> bool {
		match self {
			IsspError::PollTimeout(_) | IsspError::Status(_) => true,
			_ => false,
		}
	}

	pub fn is_identification(&self) -> bool {
		match self {
			IsspError::IdMismatch { .. } | IsspError::IdUnreadable(_) => true,
			_ => false,
		}
	}
}

/// Find the `IsspError` behind a `failure::Error`, looking through contexts.
pub fn find_issp_error(e: &failure::Error) -> Option<&IsspError> {
	e.iter_chain().filter_map(|f| f.downcast_ref::<IsspError>()).next()
}
