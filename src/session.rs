use std::ops::Range;
use std::sync::atomic::{
	AtomicBool,
	Ordering,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{
	Config,
	ResetStrategy,
};
use crate::error::IsspError;
use crate::image::Image;
use crate::lines::{
	Hardware,
	Line,
	Transport,
};
use crate::program::BlockResult;
use crate::vector::{
	self,
	InitPhase,
	Operation,
};
use crate::verify::VerifyReport;

// between switching target power on and looking for its SDATA pulse
const POWER_ON_SETTLE: Duration = Duration::from_micros(100);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum TargetState {
	Unknown,
	Reset,
	Initialized,
	IdVerified,
	Programming,
	Verified,
	Faulted,
}

impl TargetState {
	// past a successful silicon ID check
	pub fn is_identified(self) -> bool {
		match self {
			TargetState::IdVerified | TargetState::Programming | TargetState::Verified => true,
			_ => false,
		}
	}

	pub fn allows(self, operation: Operation) -> bool {
		use self::TargetState::*;

		match operation {
			Operation::ResetEntry | Operation::Initialize(_) => self == Reset,
			Operation::WaitAndPoll => self != Unknown && self != Faulted,
			Operation::SiliconIdSetup
			| Operation::SiliconIdRead
			| Operation::ReadMemory(_)
			| Operation::WriteMemory(..)
			| Operation::ReadRegister(_)
			| Operation::WriteRegister(..) => self == Initialized || self.is_identified(),
			Operation::AddressSet { .. }
			| Operation::ReadBlock
			| Operation::ByteRead { .. }
			| Operation::ReadStatus => self.is_identified(),
			Operation::ByteWrite { .. }
			| Operation::EraseBlock
			| Operation::EraseAll
			| Operation::ProgramBlock => self == Programming,
		}
	}
}

/// What a run left behind.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RunReport {
	pub state: TargetState,
	pub silicon_id: Option<u16>,
	pub blocks: Vec<BlockResult>,
	pub verify: Option<VerifyReport>,
	pub cancelled: bool,
}

/// A programming session with one target.
///
/// The session owns the line hardware for its whole lifetime; it is the
/// only thing toggling SCLK, SDATA and XRES/power. Every fatal error moves
/// it to `Faulted`, from where only `initialize` gets it going again.
pub struct Session<H: Hardware> {
	transport: Transport<H>,
	pub(crate) config: Config,
	state: TargetState,
	silicon_id: Option<u16>,
	pub(crate) results: Vec<BlockResult>,
	pub(crate) verify_report: Option<VerifyReport>,
	cancel: Option<Arc<AtomicBool>>,
	pub(crate) cancelled: bool,
}

impl<H: Hardware> Session<H> {
	/// Fails with `IsspError::Configuration` before touching any line.
	pub fn new(hardware: H, config: Config) -> Result<Self, IsspError> {
		config.validate()?;
		Ok(Session {
			transport: Transport::new(hardware, config.settle_delay),
			config,
			state: TargetState::Unknown,
			silicon_id: None,
			results: Vec::new(),
			verify_report: None,
			cancel: None,
			cancelled: false,
		})
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn state(&self) -> TargetState {
		self.state
	}

	pub fn silicon_id(&self) -> Option<u16> {
		self.silicon_id
	}

	pub fn results(&self) -> &[BlockResult] {
		&self.results
	}

	pub fn hardware(&self) -> &H {
		self.transport.hardware()
	}

	pub fn hardware_mut(&mut self) -> &mut H {
		self.transport.hardware_mut()
	}

	/// Checked between blocks; the block in flight always completes.
	pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
		self.cancel = Some(flag);
	}

	pub(crate) fn cancel_requested(&self) -> bool {
		self.cancel.as_ref().map_or(false, |c| c.load(Ordering::SeqCst))
	}

	pub fn report(&self) -> RunReport {
		RunReport {
			state: self.state,
			silicon_id: self.silicon_id,
			blocks: self.results.clone(),
			verify: self.verify_report.clone(),
			cancelled: self.cancelled,
		}
	}

	/// Blocks covering the whole image.
	pub fn block_range<I: Image + ?Sized>(&self, image: &I) -> Range<usize> {
		let (size, end) = (self.config.block_size, image.end());
		0..end / size + (end % size != 0) as usize
	}

	/// Put all lines into high-Z and hand the hardware back.
	pub fn release(mut self) -> H {
		self.transport.release_all();
		self.transport.into_inner()
	}

	pub(crate) fn set_state(&mut self, state: TargetState) {
		if self.state != state {
			debug!("target state {:?} -> {:?}", self.state, state);
			self.state = state;
		}
	}

	pub(crate) fn fault<E: Into<failure::Error>>(&mut self, e: E) -> failure::Error {
		self.set_state(TargetState::Faulted);
		e.into()
	}

	/// Encode and transmit one operation, refusing it in states where the
	/// protocol doesn't allow it.
	pub(crate) fn issue(&mut self, operation: Operation) -> Result<Vec<bool>, IsspError> {
		if !self.state.allows(operation) {
			return Err(IsspError::IllegalState {
				operation,
				state: self.state,
			});
		}
		let vector = vector::encode(operation);
		trace!("{:?}: {} symbols", operation, vector.len());
		vector::transmit(&mut self.transport, &vector, self.config.poll_timeout)
	}

	pub(crate) fn read_byte(&mut self, operation: Operation) -> Result<u8, IsspError> {
		let bits = self.issue(operation)?;
		Ok(bits.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
	}

	/// Run an SROM function and check its return code.
	pub(crate) fn srom_call(&mut self, operation: Operation) -> Result<(), IsspError> {
		self.issue(operation)?;
		self.issue(Operation::WaitAndPoll)?;
		let status = self.read_byte(Operation::ReadStatus)?;
		debug!("{:?}: status 0x{:02x}", operation, status);
		if status != 0 {
			return Err(IsspError::Status(status));
		}
		Ok(())
	}

	pub fn read_memory(&mut self, address: u8) -> crate::AResult<u8> {
		Ok(self.read_byte(Operation::ReadMemory(address))?)
	}

	pub fn write_memory(&mut self, address: u8, value: u8) -> crate::AResult<()> {
		self.issue(Operation::WriteMemory(address, value))?;
		Ok(())
	}

	pub fn read_register(&mut self, address: u8) -> crate::AResult<u8> {
		Ok(self.read_byte(Operation::ReadRegister(address))?)
	}

	pub fn write_register(&mut self, address: u8, value: u8) -> crate::AResult<()> {
		self.issue(Operation::WriteRegister(address, value))?;
		Ok(())
	}

	/// Reset the target into ISSP mode and check its silicon ID.
	///
	/// Works from any state, including `Faulted`. Without an expected ID
	/// any readable ID is accepted.
	pub fn initialize(&mut self) -> crate::AResult<u16> {
		self.silicon_id = None;
		self.results.clear();
		self.verify_report = None;
		self.cancelled = false;
		self.set_state(TargetState::Unknown);

		if let Err(e) = self.reset().and_then(|()| self.send_initialization()) {
			let e = match e {
				IsspError::PollTimeout(_) => IsspError::IdUnreadable(format!("target not responding ({})", e)),
				e => e,
			};
			return Err(self.fault(e));
		}

		self.identify()
	}

	fn reset(&mut self) -> Result<(), IsspError> {
		match self.config.reset_strategy {
			ResetStrategy::HardReset => self.hard_reset(),
			ResetStrategy::PowerCycle => self.power_cycle()?,
		}
		self.set_state(TargetState::Reset);
		// has to follow the reset without delay
		self.issue(Operation::ResetEntry)?;
		Ok(())
	}

	fn hard_reset(&mut self) {
		debug!("resetting target via XRES");
		let pulse = self.config.reset_pulse;
		let t = &mut self.transport;
		t.drive(Line::Data, false);
		t.drive(Line::Clock, false);
		t.drive(Line::ResetOrPower, false);
		t.hold(pulse);
		t.drive(Line::ResetOrPower, true);
		t.hold(pulse);
		t.drive(Line::ResetOrPower, false);
	}

	fn power_cycle(&mut self) -> Result<(), IsspError> {
		debug!("power cycling target");
		let off_time = self.config.power_off_time;
		let timeout = self.config.poll_timeout;
		let t = &mut self.transport;
		// no back feeding through the signal lines while unpowered
		t.release(Line::Data);
		t.release(Line::Clock);
		t.drive(Line::ResetOrPower, false);
		t.hold(off_time);
		t.drive(Line::ResetOrPower, true);
		t.hold(POWER_ON_SETTLE);
		// target pulses SDATA once it is out of power-on reset
		t.wait_for(Line::Data, true, timeout)?;
		t.wait_for(Line::Data, false, timeout)?;
		t.drive(Line::Clock, false);
		Ok(())
	}

	fn send_initialization(&mut self) -> Result<(), IsspError> {
		self.issue(Operation::Initialize(InitPhase::First))?;
		self.issue(Operation::WaitAndPoll)?;
		self.issue(Operation::Initialize(InitPhase::Second))?;
		self.issue(Operation::WaitAndPoll)?;
		self.issue(Operation::Initialize(InitPhase::Third(self.config.voltage)))?;
		self.set_state(TargetState::Initialized);
		Ok(())
	}

	fn read_silicon_id(&mut self) -> Result<u16, IsspError> {
		self.issue(Operation::SiliconIdSetup)?;
		self.issue(Operation::WaitAndPoll)?;
		let bits = self.issue(Operation::SiliconIdRead)?;
		match *vector::bits_to_bytes(&bits).as_slice() {
			[high, low] => Ok(u16::from(high) << 8 | u16::from(low)),
			_ => Err(IsspError::IdUnreadable(format!("got {} bits", bits.len()))),
		}
	}

	fn identify(&mut self) -> crate::AResult<u16> {
		let id = match self.read_silicon_id() {
			Ok(id) => id,
			Err(IsspError::PollTimeout(what)) => {
				let e = IsspError::IdUnreadable(format!("ID setup timed out waiting for SDATA to go {}", what));
				return Err(self.fault(e));
			},
			Err(e) => return Err(self.fault(e)),
		};
		self.silicon_id = Some(id);

		if let Some(expected) = self.config.expected_id {
			if id != expected {
				error!("silicon ID 0x{:04x}, expected 0x{:04x}", id, expected);
				return Err(self.fault(IsspError::IdMismatch { expected, actual: id }));
			}
		}

		info!("silicon ID 0x{:04x}", id);
		self.set_state(TargetState::IdVerified);
		Ok(id)
	}
}
