//! ISSP lines on a Linux GPIO character device (`/dev/gpiochipN`).

use gpiocdev::line::{
	Offset,
	Value,
};
use gpiocdev::request::{
	Config,
	Request,
};

use crate::error::IsspError;

use super::{
	Hardware,
	Line,
};

/// Which GPIO line offsets carry SCLK, SDATA and XRES/power.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GpioLines {
	pub chip: String,
	pub clock: Offset,
	pub data: Offset,
	pub reset_or_power: Offset,
}

impl GpioLines {
	pub fn validate(&self) -> Result<(), IsspError> {
		if self.chip.is_empty() {
			return Err(IsspError::Configuration("no GPIO chip given".into()));
		}
		let offsets = [self.clock, self.data, self.reset_or_power];
		for (i, a) in offsets.iter().enumerate() {
			if offsets[i + 1..].contains(a) {
				return Err(IsspError::Configuration(format!("GPIO line {} mapped twice", a)));
			}
		}
		Ok(())
	}

	fn offset(&self, line: Line) -> Offset {
		match line {
			Line::Clock => self.clock,
			Line::Data => self.data,
			Line::ResetOrPower => self.reset_or_power,
		}
	}
}

fn value(level: bool) -> Value {
	if level { Value::Active } else { Value::Inactive }
}

pub struct GpioHardware {
	lines: GpioLines,
	request: Request,
	// `None`: configured as input
	outputs: [Option<bool>; 3],
	// first failure since the transport last asked
	error: Option<String>,
}

impl GpioHardware {
	/// Request all three lines as inputs; nothing is driven until the
	/// session starts a reset.
	pub fn open(lines: &GpioLines) -> crate::AResult<Self> {
		lines.validate()?;

		let request = with_context!(("couldn't request lines on {}", lines.chip), {
			let mut config = Config::default();
			for &line in Line::ALL.iter() {
				config.with_line(lines.offset(line)).as_input();
			}
			Ok(Request::from_config(config)
				.on_chip(&lines.chip)
				.with_consumer("psoc-issp-flash")
				.request()?)
		})?;

		info!("{}: SCLK={} SDATA={} XRES/power={}", lines.chip, lines.clock, lines.data, lines.reset_or_power);

		Ok(GpioHardware {
			lines: lines.clone(),
			request,
			outputs: [None; 3],
			error: None,
		})
	}

	fn record(&mut self, msg: String) {
		error!("{}", msg);
		if self.error.is_none() {
			self.error = Some(msg);
		}
	}

	// the request is reconfigured as a whole, so every line gets its
	// current direction again
	fn reconfigure(&mut self) {
		let mut config = Config::default();
		for &line in Line::ALL.iter() {
			let offset = self.lines.offset(line);
			match self.outputs[line.index()] {
				Some(level) => { config.with_line(offset).as_output(value(level)); },
				None => { config.with_line(offset).as_input(); },
			}
		}
		if let Err(e) = self.request.reconfigure(&config) {
			self.record(format!("couldn't reconfigure GPIO lines: {}", e));
		}
	}
}

impl Hardware for GpioHardware {
	fn set_line(&mut self, line: Line, level: bool) {
		let was_output = self.outputs[line.index()].is_some();
		self.outputs[line.index()] = Some(level);
		if !was_output {
			self.reconfigure();
			return;
		}
		if let Err(e) = self.request.set_value(self.lines.offset(line), value(level)) {
			self.record(format!("couldn't set {:?}: {}", line, e));
		}
	}

	fn release_line(&mut self, line: Line) {
		if self.outputs[line.index()].take().is_some() {
			self.reconfigure();
		}
	}

	fn read_line(&mut self, line: Line) -> bool {
		match self.request.value(self.lines.offset(line)) {
			Ok(Value::Active) => true,
			Ok(Value::Inactive) => false,
			Err(e) => {
				self.record(format!("couldn't read {:?}: {}", line, e));
				false
			},
		}
	}

	fn take_error(&mut self) -> Option<String> {
		self.error.take()
	}
}
