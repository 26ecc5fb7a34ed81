#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

use std::process::exit;
use std::time::Duration;

use psoc_issp_flash::error::{
	find_issp_error,
	IsspError,
};
use psoc_issp_flash::lines::gpio::{
	GpioHardware,
	GpioLines,
};
use psoc_issp_flash::lines::Hardware;
use psoc_issp_flash::sim::SimTarget;
use psoc_issp_flash::*;

// exit code if the device doesn't hold the image
const EXIT_DIFFERS: i32 = 11;

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<Option<T>>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => return Ok(None),
	};
	param.parse::<T>().map(Some).map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid parameter {}: {}", name, e);
		e.context(msg).into()
	})
}

fn parse_hex(name: &str, value: &str) -> AResult<u32> {
	let digits = value.trim_start_matches("0x").trim_start_matches("0X");
	u32::from_str_radix(digits, 16).map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid parameter {}: {}", name, e);
		e.context(msg).into()
	})
}

fn get_hex(matches: &clap::ArgMatches, name: &str) -> AResult<Option<u32>> {
	match matches.value_of(name) {
		None => Ok(None),
		Some(v) => Ok(Some(parse_hex(name, v)?)),
	}
}

fn build_config(matches: &clap::ArgMatches) -> AResult<Config> {
	let mut config = Config::default();
	if let Some(v) = get_param(matches, "reset")? {
		config.reset_strategy = v;
	}
	if let Some(v) = get_param(matches, "voltage")? {
		config.voltage = v;
	}
	if let Some(v) = get_param(matches, "block_size")? {
		config.block_size = v;
	}
	if let Some(v) = get_param(matches, "blocks_per_bank")? {
		config.blocks_per_bank = v;
	}
	if let Some(v) = get_param(matches, "retries")? {
		config.retry_limit = v;
	}
	if let Some(v) = get_param(matches, "settle_us")? {
		config.settle_delay = Duration::from_micros(v);
	}
	if let Some(id) = get_hex(matches, "expected_id")? {
		ensure!(id <= 0xffff, "silicon ID 0x{:x} doesn't fit 16 bits", id);
		config.expected_id = Some(id as u16);
	}
	Ok(config)
}

// options that only exist on some subcommands
fn apply_task_options(config: &mut Config, sub_m: &clap::ArgMatches) -> AResult<()> {
	if let Some(v) = get_param(sub_m, "fill")? {
		config.fill_policy = v;
	}
	config.patch_mode = sub_m.is_present("patch");
	config.continue_on_failure = sub_m.is_present("keep_going");
	config.fail_fast = sub_m.is_present("fail_fast");
	Ok(())
}

enum Task {
	Id,
	Erase,
	Program {
		image: Box<dyn Image>,
		verify: bool,
	},
	Verify {
		image: Box<dyn Image>,
	},
}

fn load_image(matches: &clap::ArgMatches, patch: bool) -> AResult<Box<dyn Image>> {
	let path = match matches.value_of("FILE") {
		Some(p) => p,
		None => bail!("missing parameter FILE"),
	};
	let data = std::fs::read(path).map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("couldn't read image {}: {}", path, e);
		e.context(msg)
	})?;
	let base = get_hex(matches, "base")?.unwrap_or(0) as usize;
	info!("{}: {} byte(s) at 0x{:04x}", path, data.len(), base);

	if patch {
		Ok(Box::new(PatchImage::from_slice(base, &data)))
	} else {
		ensure!(base == 0, "--base needs --patch");
		Ok(Box::new(FlatImage(data)))
	}
}

fn execute<H: Hardware>(hardware: H, config: Config, task: &Task) -> AResult<()> {
	let mut session = Session::new(hardware, config)?;
	let res = run_task(&mut session, task);
	let report = session.report();
	for r in report.blocks.iter().filter(|r| !r.success) {
		error!("block {} failed after {} attempt(s)", r.block, r.attempts);
	}
	session.release();
	res
}

fn run_task<H: Hardware>(session: &mut Session<H>, task: &Task) -> AResult<()> {
	session.initialize()?;
	match task {
		Task::Id => {
			if let Some(id) = session.silicon_id() {
				println!("0x{:04x}", id);
			}
			Ok(())
		},
		Task::Erase => {
			session.erase_all()?;
			Ok(())
		},
		Task::Program { image, verify } => {
			let blocks = session.block_range(&**image);
			let report = session.program(&**image, blocks.clone())?;
			if report.cancelled {
				bail!("cancelled");
			}
			let failed = report.failed().count();
			if failed > 0 {
				bail!("{} block(s) failed", failed);
			}
			if *verify {
				session.verify(&**image, blocks)?.into_result()?;
			}
			Ok(())
		},
		Task::Verify { image } => {
			let blocks = session.block_range(&**image);
			let v = session.verify(&**image, blocks)?;
			for m in &v.mismatches {
				info!("0x{:04x}: expected 0x{:02x}, device has 0x{:02x}", m.address, m.expected, m.actual);
			}
			v.into_result()?;
			Ok(())
		},
	}
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@arg chip: --chip +takes_value "GPIO chip device (default /dev/gpiochip0)")
		(@arg clock: --clock +takes_value "GPIO line offset of SCLK")
		(@arg data: --data +takes_value "GPIO line offset of SDATA")
		(@arg reset_line: --("reset-line") +takes_value "GPIO line offset of XRES or target power")
		(@arg reset: --reset +takes_value "reset strategy: hard-reset or power-cycle")
		(@arg voltage: --voltage +takes_value "target supply: 3v3 or 5v")
		(@arg block_size: --("block-size") +takes_value "flash block size in bytes")
		(@arg blocks_per_bank: --("blocks-per-bank") +takes_value "flash blocks per bank")
		(@arg retries: --retries +takes_value "attempts per block")
		(@arg settle_us: --("settle-us") +takes_value "delay after each line transition in microseconds")
		(@arg expected_id: --id +takes_value "expected silicon ID (hex)")
		(@arg simulate: --simulate +takes_value "talk to a simulated target with the given silicon ID (hex)")
		(@subcommand id =>
			(about: "read the silicon ID")
		)
		(@subcommand erase =>
			(about: "erase the whole flash")
		)
		(@subcommand program =>
			(about: "program a binary image")
			(@arg fill: --fill +takes_value "bytes the image doesn't cover: zero or preserve")
			(@arg patch: --patch "only write the bytes in FILE, keeping the rest of the device")
			(@arg base: --base +takes_value "address of FILE's first byte (hex, needs --patch)")
			(@arg keep_going: --("continue") "keep going after a block failed")
			(@arg no_verify: --("no-verify") "don't read back after programming")
			(@arg FILE: +required "binary image")
		)
		(@subcommand verify =>
			(about: "compare the device with a binary image")
			(@arg patch: --patch "only compare the bytes in FILE")
			(@arg base: --base +takes_value "address of FILE's first byte (hex, needs --patch)")
			(@arg fail_fast: --("fail-fast") "stop at the first difference")
			(@arg FILE: +required "binary image")
		)
	).get_matches();

	let (task, sub_m) = match matches.subcommand() {
		("id", Some(sub_m)) => (Task::Id, sub_m),
		("erase", Some(sub_m)) => (Task::Erase, sub_m),
		("program", Some(sub_m)) => (Task::Program {
			image: load_image(sub_m, sub_m.is_present("patch"))?,
			verify: !sub_m.is_present("no_verify"),
		}, sub_m),
		("verify", Some(sub_m)) => (Task::Verify {
			image: load_image(sub_m, sub_m.is_present("patch"))?,
		}, sub_m),
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	};

	let mut config = build_config(&matches)?;
	apply_task_options(&mut config, sub_m)?;

	if let Some(id) = get_hex(&matches, "simulate")? {
		ensure!(id <= 0xffff, "silicon ID 0x{:x} doesn't fit 16 bits", id);
		warn!("using simulated target");
		let target = SimTarget::new(config.reset_strategy, id as u16)
			.with_geometry(config.block_size, config.blocks_per_bank, 1);
		return execute(target, config, &task);
	}

	let lines = GpioLines {
		chip: matches.value_of("chip").unwrap_or("/dev/gpiochip0").to_string(),
		clock: get_param(&matches, "clock")?.ok_or_else(|| format_err!("missing parameter --clock"))?,
		data: get_param(&matches, "data")?.ok_or_else(|| format_err!("missing parameter --data"))?,
		reset_or_power: get_param(&matches, "reset_line")?.ok_or_else(|| format_err!("missing parameter --reset-line"))?,
	};
	// the session rejects a bad configuration before any line is requested
	config.validate()?;
	let hardware = GpioHardware::open(&lines)?;
	execute(hardware, config, &task)
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		if let Some(IsspError::VerifyMismatch { .. }) = find_issp_error(&e) {
			error!("{}", e);
			exit(EXIT_DIFFERS);
		}
		error!("Error: {}", e);
		exit(1);
	}
}
