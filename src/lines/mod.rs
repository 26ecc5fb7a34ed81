//! ISSP lines as seen from the programmer.
//!
//! - SCLK: always driven by us
//! - SDATA: driven by us, released (high-Z) while the target answers a read
//!   or signals SROM completion during wait-and-poll
//! - XRES or target power, depending on the reset strategy
//!
//! Nothing else may toggle these lines while a `Session` owns them.

pub mod gpio;
mod transport;

use std::thread;
use std::time::{
	Duration,
	Instant,
};

pub use self::transport::Transport;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Line {
	Clock,
	Data,
	ResetOrPower,
}

impl Line {
	pub const ALL: [Line; 3] = [Line::Clock, Line::Data, Line::ResetOrPower];

	pub(crate) fn index(self) -> usize {
		match self {
			Line::Clock => 0,
			Line::Data => 1,
			Line::ResetOrPower => 2,
		}
	}
}

// below this busy waiting beats the scheduler; XRES-to-magic has to stay
// well under 125µs
const SPIN_LIMIT: Duration = Duration::from_micros(500);

pub fn reliable_sleep(mut duration: Duration) {
	loop {
		let now = Instant::now();
		thread::sleep(duration);
		let elapsed = now.elapsed();
		if elapsed >= duration {
			return;
		}
		duration -= elapsed;
	}
}

pub fn spin_delay(duration: Duration) {
	let start = Instant::now();
	while start.elapsed() < duration {
		std::hint::spin_loop();
	}
}

pub fn precise_delay(duration: Duration) {
	if duration == Duration::from_secs(0) {
		return;
	}
	if duration < SPIN_LIMIT {
		spin_delay(duration);
	} else {
		reliable_sleep(duration);
	}
}

pub trait Hardware {
	// drive line as output
	fn set_line(&mut self, line: Line, level: bool);

	// stop driving line (high-Z input)
	fn release_line(&mut self, line: Line);

	fn read_line(&mut self, line: Line) -> bool;

	// wait for (at least) `duration`
	fn delay(&mut self, duration: Duration) {
		precise_delay(duration);
	}

	// first failure since the last call; line operations can't fail
	// individually, so errors are collected and fetched per vector
	fn take_error(&mut self) -> Option<String> {
		None
	}
}

impl<'a, H: ?Sized + Hardware> Hardware for &'a mut H {
	fn set_line(&mut self, line: Line, level: bool) {
		H::set_line(*self, line, level)
	}

	fn release_line(&mut self, line: Line) {
		H::release_line(*self, line)
	}

	fn read_line(&mut self, line: Line) -> bool {
		H::read_line(*self, line)
	}

	fn delay(&mut self, duration: Duration) {
		H::delay(*self, duration)
	}

	fn take_error(&mut self) -> Option<String> {
		H::take_error(*self)
	}
}
