use std::sync::Arc;
use parking_lot::Mutex;

/// Run state of a hart as reported by the simulation that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HartRunState {
	Running,
	Halted,
	Unavailable,
}

/// Control surface a debug module uses to reach the harts of a simulation.
///
/// Requests are synchronous; their effect is observed on a later step of the
/// hart, when the owning simulation runs it.
pub trait HartControl: Send {
	/// `None` if no hart with this id exists.
	fn hart_state(&self, hart_id: u32) -> Option<HartRunState>;
	fn request_halt(&mut self, hart_id: u32);
	fn request_resume(&mut self, hart_id: u32);
	fn request_reset(&mut self, hart_id: u32);
}

#[derive(Debug, Clone, Copy)]
struct HartSignal {
	state: HartRunState,
	halt_request: bool,
	reset_request: bool,
}

impl HartSignal {
	fn new() -> Self {
		HartSignal {
			state: HartRunState::Running,
			halt_request: false,
			reset_request: false,
		}
	}
}

/// Shared per-hart signal board.
///
/// One clone is handed to each `Cpu`, one to the debug module as its
/// `HartControl`. Harts publish their run state here and poll it for
/// halt and reset requests.
#[derive(Debug, Clone)]
pub struct HartSignals {
	lock: Arc<Mutex<Vec<HartSignal>>>
}

impl HartSignals {
	pub fn new(hart_count: u32) -> Self {
		Self {
			lock: Arc::new(Mutex::new(vec![HartSignal::new(); hart_count as usize]))
		}
	}
	
	pub fn halt_requested(&self, hart_id: u32) -> bool {
		let gaurd = self.lock.lock();
		gaurd.get(hart_id as usize).map_or(false, |signal| signal.halt_request)
	}
	
	/// Returns true once per reset request.
	pub fn take_reset(&self, hart_id: u32) -> bool {
		let mut gaurd = self.lock.lock();
		match gaurd.get_mut(hart_id as usize) {
			Some(signal) => std::mem::replace(&mut signal.reset_request, false),
			None => false
		}
	}
	
	pub fn set_state(&self, hart_id: u32, state: HartRunState) {
		let mut gaurd = self.lock.lock();
		if let Some(signal) = gaurd.get_mut(hart_id as usize) {
			signal.state = state;
		}
	}
}

impl HartControl for HartSignals {
	fn hart_state(&self, hart_id: u32) -> Option<HartRunState> {
		let gaurd = self.lock.lock();
		gaurd.get(hart_id as usize).map(|signal| signal.state)
	}
	
	fn request_halt(&mut self, hart_id: u32) {
		let mut gaurd = self.lock.lock();
		if let Some(signal) = gaurd.get_mut(hart_id as usize) {
			signal.halt_request = true;
		}
	}
	
	fn request_resume(&mut self, hart_id: u32) {
		let mut gaurd = self.lock.lock();
		if let Some(signal) = gaurd.get_mut(hart_id as usize) {
			signal.halt_request = false;
		}
	}
	
	fn request_reset(&mut self, hart_id: u32) {
		let mut gaurd = self.lock.lock();
		if let Some(signal) = gaurd.get_mut(hart_id as usize) {
			signal.halt_request = false;
			signal.reset_request = true;
		}
	}
}
