//! Debugger-side helpers: the DMI sequences a debug probe issues, driven
//! against a `Sim` that is stepped while the helpers wait.

use rv_vsys::opcode;

use crate::dm_registers::{
	AbstractCommand, AbstractCs, AccessRegister, CmdErr, DmControl, DmcontrolReg, HartStatus, ACCESS_SIZE_32,
	DMI_ABSTRACTCS, DMI_COMMAND, DMI_DATA0, DMI_DMCONTROL, DMI_PROGBUF0, REGNO_GPR_BASE,
};
use crate::dm_rom::PROGSIZE;
use crate::error::DmError;
use crate::sim::Sim;

/// Sim rounds to wait for a halt, resume or command before giving up.
pub const MAX_POLL_ROUNDS: usize = 64;

/// Scratch register saved and restored around program buffer CSR accesses.
const S0: u32 = 8;

pub struct Debugger<'a> {
	sim: &'a mut Sim,
}

impl<'a> Debugger<'a> {
	/// Activates the debug module.
	pub fn attach(sim: &'a mut Sim) -> Self {
		let mut dmcontrol = DmcontrolReg(0);
		dmcontrol.set_dmactive(true);
		sim.dmi_write(DMI_DMCONTROL, dmcontrol.0);
		Debugger { sim: sim }
	}

	pub fn sim(&mut self) -> &mut Sim {
		&mut *self.sim
	}

	fn write_dmcontrol(&mut self, hart_id: u32, haltreq: bool, resumereq: bool, reset: bool) {
		let mut dmcontrol = DmcontrolReg(0);
		dmcontrol.set_dmactive(true);
		dmcontrol.set_hartsel(hart_id);
		dmcontrol.set_haltreq(haltreq);
		dmcontrol.set_resumereq(resumereq);
		dmcontrol.set_reset(reset);
		self.sim.dmi_write(DMI_DMCONTROL, dmcontrol.0);
	}

	pub fn select(&mut self, hart_id: u32) {
		self.write_dmcontrol(hart_id, false, false, false);
	}

	pub fn hart_status(&mut self, hart_id: u32) -> HartStatus {
		self.select(hart_id);
		self.sim.dmi_read(DMI_DMCONTROL).map_or(HartStatus::NotExist, |value| DmControl::from(value).hartstatus)
	}

	pub fn abstractcs(&self) -> AbstractCs {
		AbstractCs::from(self.sim.dmi_read(DMI_ABSTRACTCS).unwrap_or(0))
	}

	fn poll<F: FnMut(&mut Self) -> bool>(&mut self, what: &'static str, mut done: F) -> Result<(), DmError> {
		for _ in 0 .. MAX_POLL_ROUNDS {
			if done(self) {
				return Ok(());
			}
			self.sim.step_all();
		}
		if done(self) {
			Ok(())
		} else {
			log::warn!("timed out waiting for {}", what);
			Err(DmError::Timeout(what))
		}
	}

	pub fn halt(&mut self, hart_id: u32) -> Result<(), DmError> {
		log::debug!("halting hart {}", hart_id);
		self.write_dmcontrol(hart_id, true, false, false);
		let result = self.poll("halt", |debugger| {
			let status = debugger.sim.dmi_read(DMI_DMCONTROL).map(|value| DmControl::from(value).hartstatus);
			status == Some(HartStatus::Halted)
		});
		// clearing haltreq acknowledges the halt, or withdraws it on timeout
		self.select(hart_id);
		result
	}

	pub fn resume(&mut self, hart_id: u32) -> Result<(), DmError> {
		log::debug!("resuming hart {}", hart_id);
		self.write_dmcontrol(hart_id, false, true, false);
		self.wait_idle()?;
		match self.hart_status(hart_id) {
			HartStatus::Running => Ok(()),
			_ => Err(DmError::Timeout("resume")),
		}
	}

	pub fn reset_hart(&mut self, hart_id: u32) {
		log::debug!("resetting hart {}", hart_id);
		self.write_dmcontrol(hart_id, false, false, true);
	}

	/// Steps the sim until no command is in flight.
	pub fn wait_idle(&mut self) -> Result<(), DmError> {
		self.poll("abstract command", |debugger| !debugger.abstractcs().busy)
	}

	/// Clears a sticky `cmderr`, returning what it was.
	pub fn clear_cmderr(&mut self) -> CmdErr {
		let abstractcs = self.abstractcs();
		let mut cleared = abstractcs;
		cleared.cmderr = CmdErr::None;
		self.sim.dmi_write(DMI_ABSTRACTCS, cleared.to_bits());
		abstractcs.cmderr
	}

	/// Issues `command` against the selected hart and waits for it to finish.
	pub fn execute(&mut self, command: u32) -> Result<(), DmError> {
		self.sim.dmi_write(DMI_COMMAND, command);
		self.wait_idle()?;
		match self.clear_cmderr() {
			CmdErr::None => Ok(()),
			cmderr => {
				log::warn!("abstract command {:#010x} failed: {:?}", command, cmderr);
				Err(DmError::CommandFailed(cmderr))
			}
		}
	}

	pub fn read_gpr(&mut self, hart_id: u32, reg: u32) -> Result<u32, DmError> {
		self.select(hart_id);
		self.execute(gpr_access(reg, false))?;
		self.sim.dmi_read(DMI_DATA0).ok_or(DmError::CommandFailed(CmdErr::Other))
	}

	pub fn write_gpr(&mut self, hart_id: u32, reg: u32, value: u32) -> Result<(), DmError> {
		self.select(hart_id);
		self.sim.dmi_write(DMI_DATA0, value);
		self.execute(gpr_access(reg, true))
	}

	/// Loads `program` into the program buffer, followed by an `ebreak` if
	/// there is room for one. Words beyond the buffer are dropped.
	pub fn write_program_buffer(&mut self, program: &[u32]) {
		if program.len() > PROGSIZE {
			log::warn!("program of {} words truncated to {}", program.len(), PROGSIZE);
		}
		let words = program.iter().copied().chain(std::iter::once(opcode::EBREAK));
		for (index, word) in words.take(PROGSIZE).enumerate() {
			self.sim.dmi_write(DMI_PROGBUF0 + index as u32, word);
		}
	}

	/// Runs the program buffer on a halted hart.
	pub fn exec_program_buffer(&mut self, hart_id: u32) -> Result<(), DmError> {
		self.select(hart_id);
		let command = AccessRegister { size: ACCESS_SIZE_32, postexec: true, transfer: false, write: false, regno: 0 };
		self.execute(command.to_bits())
	}

	/// CSR read through the program buffer, using s0 as scratch.
	pub fn read_csr(&mut self, hart_id: u32, csr: u32) -> Result<u32, DmError> {
		let s0 = self.read_gpr(hart_id, S0)?;
		self.write_program_buffer(&[opcode::csrr(S0, csr)]);
		self.exec_program_buffer(hart_id)?;
		let value = self.read_gpr(hart_id, S0)?;
		self.write_gpr(hart_id, S0, s0)?;
		Ok(value)
	}

	pub fn write_csr(&mut self, hart_id: u32, csr: u32, value: u32) -> Result<(), DmError> {
		let s0 = self.read_gpr(hart_id, S0)?;
		self.write_gpr(hart_id, S0, value)?;
		self.write_program_buffer(&[opcode::csrw(csr, S0)]);
		self.exec_program_buffer(hart_id)?;
		self.write_gpr(hart_id, S0, s0)
	}

	/// Runs the program buffer on a running hart without reporting a halt.
	pub fn quick_access(&mut self, hart_id: u32, program: &[u32]) -> Result<(), DmError> {
		self.write_program_buffer(program);
		self.select(hart_id);
		self.execute(AbstractCommand::QUICK_ACCESS)
	}
}

fn gpr_access(reg: u32, write: bool) -> u32 {
	AccessRegister {
		size: ACCESS_SIZE_32,
		postexec: false,
		transfer: true,
		write: write,
		regno: REGNO_GPR_BASE + reg,
	}.to_bits()
}
