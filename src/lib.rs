#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

macro_rules! with_context {
	(( $fmt:tt $($t:tt)* ), $e:expr) => {{
		use failure::Error;

		match (|| { $e })() {
			Ok(v) => Ok(v),
			Err(e) => {
				let e: Error = e;
				let msg = format!(concat!($fmt, ": {}") $($t)*, e);
				Err(Error::from(e.context(msg)))
			}
		}
	}};

	($msg:expr, $e:expr) => {
		with_context!(("{}", $msg), $e)
	};
}

pub type AResult<T> = Result<T, failure::Error>;

pub mod config;
pub mod error;
pub mod image;
pub mod lines;
pub mod program;
pub mod session;
pub mod sim;
pub mod vector;
pub mod verify;

pub use self::config::{
	Config,
	FillPolicy,
	ResetStrategy,
	Voltage,
};
pub use self::error::IsspError;
pub use self::image::{
	FlatImage,
	Image,
	PatchImage,
};
pub use self::program::{
	BlockResult,
	ProgramReport,
};
pub use self::session::{
	RunReport,
	Session,
	TargetState,
};
pub use self::verify::{
	Mismatch,
	VerifyReport,
};

/// Initialize, program and verify in one go.
///
/// On a fatal error the session keeps the per-block results collected so
/// far; `Session::report` returns them together with the final state.
pub fn run<H, I>(session: &mut Session<H>, image: &I, verify: bool) -> AResult<RunReport>
where
	H: lines::Hardware,
	I: Image + ?Sized,
{
	session.initialize()?;
	let blocks = session.block_range(image);
	session.program(image, blocks.clone())?;
	if verify {
		session.verify(image, blocks)?;
	}
	Ok(session.report())
}
