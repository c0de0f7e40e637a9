use rv_vsys::{Cpu, HartControl, HartRunState, HartSignals, MemWriteResult};

use crate::debug_module::DebugModule;
use crate::dm_config::DebugModuleConfig;
use crate::dm_rom::DEBUG_VECTORS;
use crate::error::DmError;
use crate::sim_bus::SimBus;

/// Owns a set of harts sharing one bus and one debug module, and steps them
/// round-robin on the calling thread.
pub struct Sim {
	harts: Vec<Cpu<SimBus>>,
	signals: HartSignals,
	bus: SimBus,
}

impl Sim {
	pub fn new(hart_count: u32, config: DebugModuleConfig) -> Result<Sim, DmError> {
		config.validate()?;
		if hart_count == 0 || hart_count > config.hart_limit {
			return Err(DmError::HartOutOfRange { hart: hart_count, limit: config.hart_limit });
		}
		let signals = HartSignals::new(hart_count);
		let debug_module = DebugModule::new(config, Box::new(signals.clone()))?;
		let bus = SimBus::new(debug_module);
		let harts = (0 .. hart_count)
			.map(|id| Cpu::new(bus.clone(), signals.clone(), DEBUG_VECTORS, id))
			.collect();
		log::info!("sim created with {} harts", hart_count);
		Ok(Sim {
			harts: harts,
			signals: signals,
			bus: bus,
		})
	}

	pub fn debug_module(&self) -> &DebugModule {
		self.bus.debug_module()
	}

	pub fn bus(&self) -> &SimBus {
		&self.bus
	}

	pub fn hart_count(&self) -> u32 {
		self.harts.len() as u32
	}

	pub fn load_program(&self, addr: u32, program: &[u32]) -> MemWriteResult {
		self.bus.load_program(addr, program)
	}

	/// Resets every hart to `pc` and the debug module to power-on state.
	pub fn reset(&mut self, pc: u32) {
		for hart in self.harts.iter_mut() {
			hart.reset(pc);
			self.signals.request_resume(hart.hart_id());
		}
		self.debug_module().reset();
	}

	pub fn hart(&self, hart_id: u32) -> Option<&Cpu<SimBus>> {
		self.harts.get(hart_id as usize)
	}

	pub fn hart_mut(&mut self, hart_id: u32) -> Option<&mut Cpu<SimBus>> {
		self.harts.get_mut(hart_id as usize)
	}

	/// Marks a hart as unavailable (powered down); it is not stepped until
	/// brought back with `HartRunState::Running`.
	pub fn set_available(&mut self, hart_id: u32, available: bool) {
		let state = if available { HartRunState::Running } else { HartRunState::Unavailable };
		self.signals.set_state(hart_id, state);
	}

	fn is_available(&self, hart_id: u32) -> bool {
		self.signals.hart_state(hart_id) != Some(HartRunState::Unavailable)
	}

	/// One instruction on one hart. Returns false if the hart does not exist,
	/// is unavailable, or trapped.
	pub fn step_hart(&mut self, hart_id: u32) -> bool {
		if ! self.is_available(hart_id) {
			return false;
		}
		match self.harts.get_mut(hart_id as usize) {
			Some(hart) => hart.step(),
			None => false,
		}
	}

	/// One instruction on every hart, in id order.
	pub fn step_all(&mut self) {
		for hart_id in 0 .. self.hart_count() {
			self.step_hart(hart_id);
		}
	}

	pub fn run(&mut self, rounds: usize) {
		for _ in 0 .. rounds {
			self.step_all();
		}
	}

	pub fn dmi_read(&self, address: u32) -> Option<u32> {
		self.debug_module().dmi_read(address)
	}

	pub fn dmi_write(&self, address: u32, value: u32) -> bool {
		self.debug_module().dmi_write(address, value)
	}
}
