use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use psoc_issp_flash::error::find_issp_error;
use psoc_issp_flash::lines::{
	Hardware,
	Line,
};
use psoc_issp_flash::sim::SimTarget;
use psoc_issp_flash::*;

const ID: u16 = 0x1234;

fn config() -> Config {
	Config {
		expected_id: Some(ID),
		settle_delay: Duration::from_secs(0),
		poll_timeout: Duration::from_millis(20),
		..Config::default()
	}
}

fn target() -> SimTarget {
	SimTarget::new(ResetStrategy::HardReset, ID)
}

fn pattern(len: usize) -> Vec<u8> {
	(0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn issp_error(e: &failure::Error) -> IsspError {
	match find_issp_error(e) {
		Some(e) => e.clone(),
		None => panic!("not an ISSP error: {}", e),
	}
}

fn ok_block(block: usize, attempts: u32) -> BlockResult {
	BlockResult {
		block,
		attempts,
		success: true,
		unchanged: false,
	}
}

#[test]
fn programs_and_verifies_one_block() {
	let image = FlatImage(pattern(64));
	let mut session = Session::new(target(), config()).unwrap();

	let report = run(&mut session, &image, true).unwrap();

	assert_eq!(report.state, TargetState::Verified);
	assert_eq!(report.silicon_id, Some(ID));
	assert_eq!(report.blocks, vec![ok_block(0, 1)]);
	assert_eq!(report.verify, Some(VerifyReport { blocks_checked: 1, mismatches: vec![] }));
	assert_eq!(&session.hardware().flash()[..64], &image.0[..]);
	assert_eq!(session.hardware().blocks_written().to_vec(), vec![0]);
}

#[test]
fn all_zero_image() {
	let image = FlatImage(vec![0; 64]);
	let mut session = Session::new(target(), config()).unwrap();
	let report = run(&mut session, &image, true).unwrap();
	assert_eq!(report.blocks, vec![ok_block(0, 1)]);
	assert!(report.verify.unwrap().is_clean());
}

#[test]
fn wrong_silicon_id_writes_nothing() {
	let sim = SimTarget::new(ResetStrategy::HardReset, 0x0000);
	let mut session = Session::new(sim, config()).unwrap();

	let e = session.initialize().unwrap_err();
	assert_eq!(issp_error(&e), IsspError::IdMismatch { expected: ID, actual: 0x0000 });
	assert_eq!(session.state(), TargetState::Faulted);

	let e = session.program(&FlatImage(pattern(64)), 0..1).unwrap_err();
	assert_eq!(issp_error(&e), IsspError::IllegalState {
		operation: vector::Operation::ProgramBlock,
		state: TargetState::Faulted,
	});
	assert!(session.hardware().row_writes().is_empty());
	assert!(session.hardware().blocks_written().is_empty());
}

#[test]
fn unresponsive_target_is_unreadable() {
	let mut session = Session::new(target().unresponsive(), config()).unwrap();
	let e = session.initialize().unwrap_err();
	match issp_error(&e) {
		IsspError::IdUnreadable(_) => (),
		e => panic!("unexpected {:?}", e),
	}
	assert_eq!(session.state(), TargetState::Faulted);
	assert_eq!(session.silicon_id(), None);
}

#[test]
fn any_id_accepted_without_expectation() {
	let sim = SimTarget::new(ResetStrategy::HardReset, 0x0b0c);
	let mut session = Session::new(sim, Config { expected_id: None, ..config() }).unwrap();
	assert_eq!(session.initialize().unwrap(), 0x0b0c);
	assert_eq!(session.state(), TargetState::IdVerified);
}

#[test]
fn power_cycle_entry() {
	let sim = SimTarget::new(ResetStrategy::PowerCycle, ID);
	let config = Config { reset_strategy: ResetStrategy::PowerCycle, ..config() };
	let mut session = Session::new(sim, config).unwrap();
	assert_eq!(session.initialize().unwrap(), ID);

	let image = FlatImage(pattern(100));
	let report = run(&mut session, &image, true).unwrap();
	assert_eq!(report.state, TargetState::Verified);
	assert_eq!(&session.hardware().flash()[..100], &image.0[..]);
}

#[test]
fn retries_until_poll_succeeds() {
	let image = FlatImage(pattern(64));
	let mut session = Session::new(target().failing_polls(2), config()).unwrap();

	let report = run(&mut session, &image, true).unwrap();

	assert_eq!(report.blocks, vec![ok_block(0, 3)]);
	assert!(report.verify.unwrap().is_clean());
	assert_eq!(&session.hardware().flash()[..64], &image.0[..]);
}

#[test]
fn retries_exhausted() {
	let image = FlatImage(pattern(64));
	let config = Config { retry_limit: 2, ..config() };
	let mut session = Session::new(target().failing_polls(2), config).unwrap();

	let e = run(&mut session, &image, true).unwrap_err();

	assert_eq!(issp_error(&e), IsspError::BlockWrite { block: 0, attempts: 2 });
	assert_eq!(session.state(), TargetState::Faulted);
	assert_eq!(session.results().to_vec(), vec![BlockResult {
		block: 0,
		attempts: 2,
		success: false,
		unchanged: false,
	}]);
	assert!(session.hardware().blocks_written().is_empty());
}

#[test]
fn bad_status_is_retried() {
	let image = FlatImage(pattern(64));
	let mut session = Session::new(target().failing_status(1), config()).unwrap();
	let report = run(&mut session, &image, false).unwrap();
	assert_eq!(report.blocks, vec![ok_block(0, 2)]);
	assert_eq!(report.verify, None);
}

#[test]
fn continue_on_failure_reports_all_blocks() {
	let image = FlatImage(pattern(3 * 64));
	let config = Config {
		retry_limit: 1,
		continue_on_failure: true,
		..config()
	};
	let mut session = Session::new(target().failing_polls(2), config).unwrap();
	session.initialize().unwrap();

	let report = session.program(&image, 0..3).unwrap();

	assert_eq!(report.failed().map(|r| r.block).collect::<Vec<_>>(), vec![0, 1]);
	assert_eq!(report.blocks[2], ok_block(2, 1));
	assert_eq!(session.state(), TargetState::Programming);
	assert_eq!(session.hardware().blocks_written().to_vec(), vec![2]);
}

#[test]
fn blocks_written_in_ascending_order() {
	let image = FlatImage(pattern(4 * 64 + 10));
	let mut session = Session::new(target(), config()).unwrap();
	let report = run(&mut session, &image, true).unwrap();
	assert_eq!(report.blocks.iter().map(|r| r.block).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
	assert_eq!(session.hardware().blocks_written().to_vec(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn programming_twice_is_idempotent() {
	let image = FlatImage(pattern(128));
	let mut session = Session::new(target(), config()).unwrap();
	run(&mut session, &image, false).unwrap();
	let first = session.hardware().flash().to_vec();

	let report = run(&mut session, &image, true).unwrap();

	assert_eq!(session.hardware().flash().to_vec(), first);
	assert!(report.verify.unwrap().is_clean());
}

#[test]
fn patch_writes_only_supplied_bytes() {
	let mut sim = target();
	sim.set_flash(0, &[0x55; 3 * 64]);
	let mut image = PatchImage::from_slice(0x10, &[0xa0, 0xa1]);
	image.insert(0x90, 0xb0);
	let config = Config { patch_mode: true, ..config() };
	let mut session = Session::new(sim, config).unwrap();

	let report = run(&mut session, &image, true).unwrap();

	assert_eq!(report.blocks, vec![ok_block(0, 1), ok_block(2, 1)]);
	assert!(report.verify.unwrap().is_clean());
	let sim = session.release();
	assert_eq!(sim.row_writes().to_vec(), vec![(0x10, 0xa0), (0x11, 0xa1), (0x90, 0xb0)]);
	assert_eq!(sim.blocks_written().to_vec(), vec![0, 2]);

	let mut expected = vec![0x55u8; 3 * 64];
	expected[0x10] = 0xa0;
	expected[0x11] = 0xa1;
	expected[0x90] = 0xb0;
	assert_eq!(&sim.flash()[..3 * 64], &expected[..]);
}

#[test]
fn patch_skips_unchanged_blocks() {
	let image = PatchImage::from_slice(0x45, &[1, 2, 3]);
	let config = Config { patch_mode: true, ..config() };
	let mut session = Session::new(target(), config).unwrap();
	run(&mut session, &image, false).unwrap();

	let blocks = session.block_range(&image);
	let report = session.program(&image, blocks).unwrap();

	assert_eq!(report.blocks, vec![BlockResult {
		block: 1,
		attempts: 0,
		success: true,
		unchanged: true,
	}]);
	assert_eq!(session.hardware().blocks_written().to_vec(), vec![1]);
}

#[test]
fn patch_retry_keeps_loaded_row_buffer() {
	let mut sim = target().failing_polls(1);
	sim.set_flash(0, &[0x55; 64]);
	let image = PatchImage::from_slice(0x10, &[0xa0, 0xa1]);
	let config = Config { patch_mode: true, ..config() };
	let mut session = Session::new(sim, config).unwrap();
	session.initialize().unwrap();

	let report = session.program(&image, 0..1).unwrap();

	assert_eq!(report.blocks, vec![ok_block(0, 2)]);
	// the first attempt erased the block; the retry must not reload it
	let reads = session.hardware().ssc_log().iter().filter(|&&f| f == 0x01).count();
	assert_eq!(reads, 1);

	let mut expected = vec![0x55u8; 64];
	expected[0x10] = 0xa0;
	expected[0x11] = 0xa1;
	assert_eq!(&session.hardware().flash()[..64], &expected[..]);
	assert!(session.verify(&image, 0..1).unwrap().is_clean());
}

#[test]
fn patch_beyond_device_is_rejected() {
	let mut image = PatchImage::from_slice(0x20, &[1]);
	image.insert(usize::MAX, 2);
	let config = Config { patch_mode: true, ..config() };
	let mut session = Session::new(target(), config).unwrap();
	session.initialize().unwrap();

	let blocks = session.block_range(&image);
	assert_eq!(blocks, 0..usize::MAX / 64 + 1);

	let e = session.program(&image, blocks).unwrap_err();
	match issp_error(&e) {
		IsspError::Configuration(msg) => assert!(msg.contains("bank 255"), "{}", msg),
		e => panic!("unexpected {:?}", e),
	}
	assert_eq!(session.results().to_vec(), vec![ok_block(0, 1)]);
	assert_eq!(session.state(), TargetState::Faulted);
}

#[test]
fn fill_policy_for_short_image() {
	let image = FlatImage(pattern(70));

	let mut sim = target();
	sim.set_flash(0, &[0x55; 128]);
	let mut session = Session::new(sim, config()).unwrap();
	run(&mut session, &image, true).unwrap();
	assert_eq!(&session.hardware().flash()[70..128], &[0u8; 58][..]);

	let mut sim = target();
	sim.set_flash(0, &[0x55; 128]);
	let config = Config { fill_policy: FillPolicy::Preserve, ..config() };
	let mut session = Session::new(sim, config).unwrap();
	run(&mut session, &image, true).unwrap();
	assert_eq!(&session.hardware().flash()[..70], &image.0[..]);
	assert_eq!(&session.hardware().flash()[70..128], &[0x55u8; 58][..]);
}

#[test]
fn verify_only_reports_mismatches() {
	let image = FlatImage(pattern(64));
	let mut sim = target();
	let mut device = image.0.clone();
	device[5] ^= 0xff;
	device[40] = 0;
	sim.set_flash(0, &device);
	let mut session = Session::new(sim, config()).unwrap();
	session.initialize().unwrap();

	let report = session.verify(&image, 0..1).unwrap();

	assert_eq!(report.blocks_checked, 1);
	assert_eq!(report.mismatches, vec![
		Mismatch { address: 5, expected: image.0[5], actual: device[5] },
		Mismatch { address: 40, expected: image.0[40], actual: 0 },
	]);
	assert_eq!(session.state(), TargetState::Verified);
	assert_eq!(report.into_result(), Err(IsspError::VerifyMismatch { count: 2, first: 5 }));
	assert!(session.hardware().blocks_written().is_empty());
	// no erase or write SROM calls
	assert!(session.hardware().ssc_log().iter().all(|&f| f != 0x02 && f != 0x03));
}

#[test]
fn verify_fail_fast_stops_early() {
	let image = FlatImage(pattern(128));
	let mut sim = target();
	sim.set_flash(0, &[0; 128]);
	let config = Config { fail_fast: true, ..config() };
	let mut session = Session::new(sim, config).unwrap();
	session.initialize().unwrap();

	let report = session.verify(&image, 0..2).unwrap();
	assert_eq!(report.mismatches.len(), 1);
	assert_eq!(report.blocks_checked, 1);
}

#[test]
fn second_bank() {
	let sim = target().with_geometry(16, 4, 2);
	let config = Config {
		block_size: 16,
		blocks_per_bank: 4,
		..config()
	};
	let image = FlatImage(pattern(6 * 16));
	let mut session = Session::new(sim, config).unwrap();

	let report = run(&mut session, &image, true).unwrap();

	assert!(report.verify.unwrap().is_clean());
	assert_eq!(session.hardware().flash().to_vec(), {
		let mut v = image.0.clone();
		v.resize(8 * 16, 0);
		v
	});
}

#[test]
fn erase_all_clears_flash() {
	let mut sim = target();
	sim.set_flash(0, &[0xff; 256]);
	let mut session = Session::new(sim, config()).unwrap();
	session.initialize().unwrap();

	session.erase_all().unwrap();

	assert_eq!(session.state(), TargetState::Programming);
	assert!(session.hardware().flash().iter().all(|&b| b == 0));
	assert!(session.hardware().ssc_log().contains(&0x05));
}

#[test]
fn refuses_work_before_initialization() {
	let mut session = Session::new(target(), config()).unwrap();
	let image = FlatImage(pattern(64));

	let e = session.program(&image, 0..1).unwrap_err();
	assert_eq!(issp_error(&e), IsspError::IllegalState {
		operation: vector::Operation::ProgramBlock,
		state: TargetState::Unknown,
	});
	assert!(session.verify(&image, 0..1).is_err());
	assert!(session.erase_all().is_err());
	assert!(session.read_memory(0xF8).is_err());
	assert_eq!(session.state(), TargetState::Unknown);
}

#[test]
fn faulted_session_recovers_by_initializing() {
	let image = FlatImage(pattern(64));
	let config = Config { retry_limit: 1, ..config() };
	let mut session = Session::new(target().failing_polls(1), config).unwrap();
	assert!(run(&mut session, &image, false).is_err());
	assert_eq!(session.state(), TargetState::Faulted);
	assert!(session.verify(&image, 0..1).is_err());

	assert_eq!(session.initialize().unwrap(), ID);
	assert_eq!(session.state(), TargetState::IdVerified);
	assert!(session.results().is_empty());
	let report = session.program(&image, 0..1).unwrap();
	assert_eq!(report.blocks, vec![ok_block(0, 1)]);
}

#[test]
fn invalid_config_touches_no_line() {
	let mut sim = target();
	let config = Config { block_size: 0, ..config() };
	match Session::new(&mut sim, config) {
		Err(IsspError::Configuration(_)) => (),
		Err(e) => panic!("unexpected {:?}", e),
		Ok(_) => panic!("block size 0 accepted"),
	}
	assert!(!sim.is_held());
	assert!(sim.ssc_log().is_empty());
}

#[test]
fn cancel_before_first_block() {
	let image = FlatImage(pattern(3 * 64));
	let mut session = Session::new(target(), config()).unwrap();
	let cancel = Arc::new(AtomicBool::new(true));
	session.set_cancel_flag(cancel);
	session.initialize().unwrap();

	let report = session.program(&image, 0..3).unwrap();

	assert!(report.cancelled);
	assert!(report.blocks.is_empty());
	assert!(session.report().cancelled);
	assert!(session.hardware().blocks_written().is_empty());
}

#[test]
fn raw_memory_access() {
	let mut session = Session::new(target(), config()).unwrap();
	session.initialize().unwrap();
	session.write_memory(0x80, 0x42).unwrap();
	assert_eq!(session.read_memory(0x80).unwrap(), 0x42);
	session.write_register(0xF7, 0x10).unwrap();
	assert_eq!(session.read_register(0xF7).unwrap(), 0x10);
	session.write_register(0xF7, 0x00).unwrap();
}

// SimTarget behind a driver whose n-th read fails
struct BrokenRead {
	sim: SimTarget,
	reads_left: usize,
	error: Option<String>,
}

impl Hardware for BrokenRead {
	fn set_line(&mut self, line: Line, level: bool) {
		self.sim.set_line(line, level)
	}

	fn release_line(&mut self, line: Line) {
		self.sim.release_line(line)
	}

	fn read_line(&mut self, line: Line) -> bool {
		let level = self.sim.read_line(line);
		match self.reads_left {
			0 => level,
			1 => {
				self.reads_left = 0;
				self.error = Some("EIO".into());
				false
			},
			_ => {
				self.reads_left -= 1;
				level
			},
		}
	}

	fn take_error(&mut self) -> Option<String> {
		self.error.take()
	}
}

#[test]
fn line_failure_during_identification_faults() {
	let hw = BrokenRead {
		sim: target(),
		reads_left: 1,
		error: None,
	};
	let mut session = Session::new(hw, config()).unwrap();

	let e = session.initialize().unwrap_err();

	assert_eq!(issp_error(&e), IsspError::LineIo("EIO".into()));
	assert_eq!(session.state(), TargetState::Faulted);
	assert_eq!(session.silicon_id(), None);
}

#[test]
fn line_failure_while_verifying_is_not_a_mismatch() {
	let mut sim = target();
	sim.set_flash(0, &pattern(64));
	let mut session = Session::new(BrokenRead { sim, reads_left: 0, error: None }, config()).unwrap();
	session.initialize().unwrap();
	session.hardware_mut().reads_left = 20;

	let e = session.verify(&FlatImage(pattern(64)), 0..1).unwrap_err();

	assert_eq!(issp_error(&e), IsspError::LineIo("EIO".into()));
	assert_eq!(session.state(), TargetState::Faulted);
}
