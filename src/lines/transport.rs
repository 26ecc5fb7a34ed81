use std::time::{
	Duration,
	Instant,
};

use crate::error::IsspError;

use super::{
	Hardware,
	Line,
};

/// Single owner of the ISSP lines.
///
/// Every transition is followed by the settle delay, so two transitions are
/// never closer than that; sampling waits for the settle delay first.
pub struct Transport<H: Hardware> {
	hardware: H,
	settle: Duration,
	// `None` while released
	levels: [Option<bool>; 3],
}

impl<H: Hardware> Transport<H> {
	pub fn new(hardware: H, settle: Duration) -> Self {
		Transport {
			hardware,
			settle,
			levels: [None; 3],
		}
	}

	pub fn hardware(&self) -> &H {
		&self.hardware
	}

	pub fn hardware_mut(&mut self) -> &mut H {
		&mut self.hardware
	}

	pub fn into_inner(self) -> H {
		self.hardware
	}

	pub fn settle_delay(&self) -> Duration {
		self.settle
	}

	pub fn level(&self, line: Line) -> Option<bool> {
		self.levels[line.index()]
	}

	pub fn drive(&mut self, line: Line, level: bool) {
		trace!("drive {:?} {}", line, level as u8);
		self.hardware.set_line(line, level);
		self.levels[line.index()] = Some(level);
		self.hardware.delay(self.settle);
	}

	pub fn release(&mut self, line: Line) {
		trace!("release {:?}", line);
		self.hardware.release_line(line);
		self.levels[line.index()] = None;
		self.hardware.delay(self.settle);
	}

	pub fn release_all(&mut self) {
		for &line in Line::ALL.iter() {
			self.release(line);
		}
	}

	pub fn sample(&mut self, line: Line) -> bool {
		self.hardware.delay(self.settle);
		let level = self.hardware.read_line(line);
		trace!("sample {:?} {}", line, level as u8);
		level
	}

	pub fn hold(&mut self, duration: Duration) {
		self.hardware.delay(duration);
	}

	// one full SCLK cycle; the target latches SDATA on the rising edge
	pub fn pulse_clock(&mut self) {
		self.drive(Line::Clock, true);
		self.drive(Line::Clock, false);
	}

	pub fn send_bit(&mut self, bit: bool) {
		self.drive(Line::Data, bit);
		self.pulse_clock();
	}

	/// Fails if the hardware reported an error since the last check.
	pub fn check(&mut self) -> Result<(), IsspError> {
		match self.hardware.take_error() {
			Some(msg) => Err(IsspError::LineIo(msg)),
			None => Ok(()),
		}
	}

	/// Sample `line` until it reads `level`, giving up after `timeout`.
	pub fn wait_for(&mut self, line: Line, level: bool, timeout: Duration) -> Result<(), IsspError> {
		let start = Instant::now();
		loop {
			if self.sample(line) == level {
				return Ok(());
			}
			if start.elapsed() >= timeout {
				return Err(IsspError::PollTimeout(if level { "high" } else { "low" }));
			}
		}
	}
}
