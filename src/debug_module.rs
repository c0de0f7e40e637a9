/* Debug Module
base address: DEBUG_START (0x0100), see dm_rom for the address map

The debugger talks to the module through `dmi_read` / `dmi_write`. Harts see
the exchange buffer, program buffer and debug ROM through `load` / `store`.
Abstract commands are staged as instructions in the debug ROM and complete
when the selected hart runs them on a later step of the simulation.
*/

use std::sync::Arc;

use byteorder::{LE, ByteOrder};
use parking_lot::Mutex;
use rv_vsys::{opcode, HartControl, HartRunState, MemReadResult, MemWriteResult};

use crate::dm_config::DebugModuleConfig;
use crate::dm_exchange::ExchangeBuffer;
use crate::dm_registers::{
	accesscs_value, autoexec_from_bits, AbstractCommand, AbstractCs, AbstractcsReg, AccessRegister, CmdErr,
	DmControl, DmcontrolReg, HartStatus, ACCESS_SIZE_32, DMI_ABSTRACTCS, DMI_ACCESSCS, DMI_COMMAND, DMI_DATA0,
	DMI_DMCONTROL, DMI_PROGBUF0,
};
use crate::dm_rom::{
	self, entry_address, jump, DebugRom, Region, DATACOUNT, DEBUG_EXCHANGE, DEBUG_PROGBUF_SIZE,
	DEBUG_PROGBUF_START, DEBUG_ROM_CODE, DEBUG_START, PARK, PROGSIZE,
};
use crate::error::DmError;
use crate::hart_table::{HaltTable, HartId, HartSet};

/// What a staged action does once the hart runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
	AccessRegister,
	QuickAccess,
	Resume,
}

/// The one action staged in the debug ROM, if any.
///
/// `executed` is set once the hart has fetched the staged entry word;
/// `faulted` once it has landed in its exception word while running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAction {
	pub hart: HartId,
	pub kind: ActionKind,
	/// Word patched into the hart's entry slot.
	pub staged: u32,
	/// Word the entry slot goes back to after the hart has taken `staged`.
	pub next_action: u32,
	pub executed: bool,
	pub faulted: bool,
}

struct DebugModuleData {
	config: DebugModuleConfig,
	control: Box<dyn HartControl>,
	dmcontrol: DmControl,
	abstractcs: AbstractCs,
	// Harts the module has asked to halt.
	interrupt: HartSet,
	// Harts that have reported entering debug mode and not been acknowledged.
	halt_notification: HartSet,
	halted: HaltTable,
	rom: DebugRom,
	program_buffer: [u8; DEBUG_PROGBUF_SIZE],
	dmdata: ExchangeBuffer,
	pending: Option<PendingAction>,
	last_command: Option<u32>,
}

impl DebugModuleData {
	fn reset(&mut self) {
		for hart_id in self.interrupt.iter().collect::<Vec<_>>() {
			self.control.request_resume(hart_id);
		}
		self.dmcontrol = DmControl::power_on(self.config.auth_type);
		self.abstractcs = AbstractCs::power_on();
		self.interrupt.clear();
		self.halt_notification.clear();
		self.halted.clear();
		self.rom.reset();
		self.program_buffer = [0; DEBUG_PROGBUF_SIZE];
		dm_rom::write32(&mut self.program_buffer, PROGSIZE, opcode::EBREAK);
		self.pending = None;
		self.last_command = None;
	}

	fn existing_hart(&self, hart_id: u32) -> Option<HartId> {
		match self.halted.hart(hart_id) {
			Ok(hart) => self.control.hart_state(hart_id).map(|_| hart),
			Err(error) => {
				log::debug!("{}", error);
				None
			}
		}
	}

	fn pending_for(&self, hart: HartId) -> Option<ActionKind> {
		self.pending.filter(|action| action.hart == hart).map(|action| action.kind)
	}

	fn hart_status(&self, hart_id: u32) -> HartStatus {
		let hart = match self.halted.hart(hart_id) {
			Ok(hart) => hart,
			Err(_) => return HartStatus::NotExist,
		};
		let state = match self.control.hart_state(hart_id) {
			Some(state) => state,
			None => return HartStatus::NotExist,
		};
		if self.halted.is_halted(hart) {
			return HartStatus::Halted;
		}
		match (state, self.pending_for(hart)) {
			(HartRunState::Unavailable, _) => HartStatus::Unavailable,
			// parked only to run a quick access or on its way out of a resume
			(HartRunState::Halted, Some(ActionKind::QuickAccess)) |
			(HartRunState::Halted, Some(ActionKind::Resume)) => HartStatus::Running,
			(HartRunState::Halted, _) => HartStatus::Halted,
			(HartRunState::Running, _) => HartStatus::Running,
		}
	}

	fn set_cmderr(&mut self, cmderr: CmdErr) {
		if self.abstractcs.cmderr == CmdErr::None {
			log::info!("abstract command error: {:?}", cmderr);
			self.abstractcs.cmderr = cmderr;
		}
	}

	fn stage(&mut self, hart: HartId, kind: ActionKind, code: &[u32]) {
		for (index, word) in code.iter().enumerate() {
			self.rom.set_code_word(index, *word);
		}
		let staged = jump(entry_address(hart), DEBUG_ROM_CODE);
		self.rom.set_entry_word(hart, staged);
		self.pending = Some(PendingAction {
			hart: hart,
			kind: kind,
			staged: staged,
			next_action: PARK,
			executed: false,
			faulted: false,
		});
		self.abstractcs.busy = true;
		log::debug!("staged {:?} for hart {}: {:08x?}", kind, hart.get(), code);
	}

	fn stage_resume(&mut self, hart: HartId) {
		self.stage(hart, ActionKind::Resume, &[opcode::DRET]);
		self.control.request_resume(hart.get());
	}

	/// Retires the pending action: the hart has come back to its entry word
	/// (or run `dret` for a resume).
	fn finish_action(&mut self) {
		let action = match self.pending.take() {
			Some(action) => action,
			None => return,
		};
		self.rom.set_entry_word(action.hart, action.next_action);
		self.abstractcs.busy = false;
		if action.faulted {
			log::info!("{:?} on hart {} faulted", action.kind, action.hart.get());
			self.set_cmderr(CmdErr::Exception);
			if action.kind == ActionKind::QuickAccess {
				// left in debug mode
				self.halted.set_halted(action.hart, true);
				self.halt_notification.insert(action.hart.get());
			}
			return;
		}
		log::debug!("{:?} on hart {} complete", action.kind, action.hart.get());
		match action.kind {
			ActionKind::AccessRegister => {},
			ActionKind::QuickAccess => self.stage_resume(action.hart),
			ActionKind::Resume => self.halted.set_halted(action.hart, false),
		}
	}

	fn complete_action(&mut self) {
		if let Some(action) = self.pending.as_mut() {
			action.executed = true;
		}
		self.finish_action();
	}

	fn fault_action(&mut self) {
		if let Some(action) = self.pending.as_mut() {
			action.executed = true;
			action.faulted = true;
		}
		self.finish_action();
	}

	fn entry_fetch(&mut self, offset: usize, bytes: &mut [u8]) {
		if let Ok(hart) = self.halted.hart((offset / 4) as u32) {
			match self.pending.filter(|action| action.hart == hart).map(|action| action.executed) {
				Some(false) => {
					if let Some(action) = self.pending.as_mut() {
						action.executed = true;
					}
				},
				Some(true) => {
					self.finish_action();
					// a quick access chains straight into its resume
					if let Some(next) = self.pending.as_mut() {
						if next.hart == hart {
							next.executed = true;
						}
					}
				},
				None => {}
			}
			self.interrupt.remove(hart.get());
			let reports_halt = match self.pending_for(hart) {
				Some(ActionKind::QuickAccess) | Some(ActionKind::Resume) => false,
				_ => true,
			};
			if reports_halt && ! self.halted.is_halted(hart) {
				log::info!("hart {} halted", hart.get());
				self.halted.set_halted(hart, true);
				self.halt_notification.insert(hart.get());
			}
		} else {
			log::warn!("debug ROM entry fetch for hart {} beyond hart limit", offset / 4);
		}
		bytes.copy_from_slice(&self.rom.entry_bytes()[offset .. offset + bytes.len()]);
	}

	fn code_fetch(&mut self, offset: usize, bytes: &mut [u8]) {
		if let Some(action) = self.pending {
			if action.executed && self.rom.entry_word(action.hart) == action.staged {
				self.rom.set_entry_word(action.hart, action.next_action);
			}
			if action.executed && action.kind == ActionKind::Resume && offset == 0 {
				self.finish_action();
			}
		}
		bytes.copy_from_slice(&self.rom.code_bytes()[offset .. offset + bytes.len()]);
	}

	fn exception_fetch(&mut self, offset: usize, bytes: &mut [u8]) {
		if let Some(ref mut action) = self.pending {
			if action.executed && action.hart.index() == offset / 4 {
				log::debug!("hart {} reached the exception vector", action.hart.get());
				action.faulted = true;
			}
		}
		bytes.copy_from_slice(&self.rom.exception_bytes()[offset .. offset + bytes.len()]);
	}

	fn load(&mut self, offset: u32, bytes: &mut [u8]) -> MemReadResult<()> {
		let region = DEBUG_START.checked_add(offset).and_then(|addr| Region::decode(addr, bytes.len()));
		log::trace!("debug module load {:#06x} ({} bytes): {:?}", offset, bytes.len(), region);
		match region {
			Some(Region::Exchange(offset)) => return self.dmdata.load(offset, bytes),
			Some(Region::ProgramBuffer(offset)) => bytes.copy_from_slice(&self.program_buffer[offset .. offset + bytes.len()]),
			Some(Region::RomEntry(offset)) => self.entry_fetch(offset, bytes),
			Some(Region::RomCode(offset)) => self.code_fetch(offset, bytes),
			Some(Region::RomException(offset)) => self.exception_fetch(offset, bytes),
			None => {
				log::warn!("invalid load from debug module: {} bytes at offset {:#x}", bytes.len(), offset);
				return MemReadResult::ErrUnmapped;
			}
		}
		MemReadResult::Ok(())
	}

	fn store(&mut self, offset: u32, bytes: &[u8]) -> MemWriteResult {
		let region = DEBUG_START.checked_add(offset).and_then(|addr| Region::decode(addr, bytes.len()));
		log::trace!("debug module store {:#06x} ({} bytes): {:?}", offset, bytes.len(), region);
		match region {
			Some(Region::Exchange(offset)) => self.dmdata.store(offset, bytes),
			Some(Region::ProgramBuffer(offset)) if offset + bytes.len() <= PROGSIZE * 4 => {
				self.program_buffer[offset .. offset + bytes.len()].copy_from_slice(bytes);
				MemWriteResult::Ok
			},
			Some(_) => {
				log::warn!("store to read-only debug module region at offset {:#x}", offset);
				MemWriteResult::ErrReadOnly
			},
			None => {
				log::warn!("invalid store to debug module: {} bytes at offset {:#x}", bytes.len(), offset);
				MemWriteResult::ErrUnmapped
			}
		}
	}

	fn data_index(address: u32) -> Option<usize> {
		address.checked_sub(DMI_DATA0).map(|index| index as usize).filter(|index| *index < DATACOUNT)
	}

	fn progbuf_index(address: u32) -> Option<usize> {
		address.checked_sub(DMI_PROGBUF0).map(|index| index as usize).filter(|index| *index < PROGSIZE)
	}

	/// Data register access while a command is in flight.
	fn data_access_busy(&mut self) -> bool {
		if self.abstractcs.busy {
			self.set_cmderr(CmdErr::Busy);
			true
		} else {
			false
		}
	}

	fn autoexec(&mut self, index: usize) {
		if ! self.abstractcs.autoexec[index] {
			return;
		}
		match self.last_command {
			Some(command) => {
				log::debug!("autoexec from data{}", index);
				self.perform_abstract_command(command);
			},
			None => log::debug!("autoexec from data{} with no previous command", index),
		}
	}

	fn dmi_read(&mut self, address: u32) -> Option<u32> {
		let value = if let Some(index) = Self::data_index(address) {
			let value = self.dmdata.read32(index * 4).ok().unwrap_or(0);
			if ! self.data_access_busy() {
				self.autoexec(index);
			}
			value
		} else if let Some(index) = Self::progbuf_index(address) {
			dm_rom::read32(&self.program_buffer, index)
		} else {
			match address {
				DMI_DMCONTROL => {
					self.dmcontrol.hartstatus = self.hart_status(self.dmcontrol.hartsel);
					self.dmcontrol.to_bits()
				},
				DMI_ABSTRACTCS => self.abstractcs.to_bits(),
				DMI_COMMAND => 0,
				DMI_ACCESSCS => accesscs_value(),
				_ => {
					log::debug!("dmi_read({:#04x}) -> unmapped", address);
					return None;
				}
			}
		};
		log::debug!("dmi_read({:#04x}) -> {:#010x}", address, value);
		Some(value)
	}

	fn dmi_write(&mut self, address: u32, value: u32) -> bool {
		log::debug!("dmi_write({:#04x}, {:#010x})", address, value);
		if let Some(index) = Self::data_index(address) {
			if ! self.data_access_busy() {
				self.dmdata.write32(index * 4, value);
				self.autoexec(index);
			}
			return true;
		}
		if let Some(index) = Self::progbuf_index(address) {
			if self.abstractcs.busy {
				self.set_cmderr(CmdErr::Busy);
			} else {
				dm_rom::write32(&mut self.program_buffer, index, value);
			}
			return true;
		}
		match address {
			DMI_DMCONTROL => self.write_dmcontrol(value),
			DMI_ABSTRACTCS => self.write_abstractcs(value),
			DMI_COMMAND => {
				if self.perform_abstract_command(value) {
					self.last_command = Some(value);
				}
			},
			DMI_ACCESSCS => {},
			_ => {
				log::debug!("dmi_write({:#04x}) unmapped", address);
				return false;
			}
		}
		true
	}

	fn write_dmcontrol(&mut self, value: u32) {
		let reg = DmcontrolReg(value);
		if ! reg.dmactive() {
			if self.dmcontrol.dmactive {
				log::info!("debug module deactivated");
			}
			self.reset();
			return;
		}
		self.dmcontrol.dmactive = true;
		self.dmcontrol.haltreq = reg.haltreq();
		self.dmcontrol.hartsel = reg.hartsel();
		let hart = match self.existing_hart(reg.hartsel()) {
			Some(hart) => hart,
			None => {
				log::debug!("hartsel {} selects no hart", reg.hartsel());
				return;
			}
		};
		if reg.reset() {
			self.reset_hart(hart);
		}
		if reg.haltreq() {
			self.halt_hart(hart);
		} else {
			self.release_halt(hart);
			if reg.resumereq() {
				self.resume_hart(hart);
			}
		}
	}

	fn reset_hart(&mut self, hart: HartId) {
		log::info!("resetting hart {}", hart.get());
		self.control.request_reset(hart.get());
		self.halted.set_halted(hart, false);
		self.interrupt.remove(hart.get());
		self.halt_notification.remove(hart.get());
	}

	fn halt_hart(&mut self, hart: HartId) {
		match self.hart_status(hart.get()) {
			HartStatus::Running => {
				if ! self.interrupt.contains(hart.get()) {
					log::info!("halt requested for hart {}", hart.get());
					self.interrupt.insert(hart.get());
					self.control.request_halt(hart.get());
				}
			},
			// halting a halted hart is a no-op
			status => log::debug!("halt request for hart {} ignored, hart is {:?}", hart.get(), status),
		}
	}

	/// `haltreq` written as 0: withdraws a halt that has not happened yet and
	/// acknowledges one that has.
	fn release_halt(&mut self, hart: HartId) {
		if self.interrupt.contains(hart.get()) && self.pending_for(hart) != Some(ActionKind::QuickAccess) {
			self.interrupt.remove(hart.get());
			self.control.request_resume(hart.get());
		}
		self.halt_notification.remove(hart.get());
	}

	fn resume_hart(&mut self, hart: HartId) {
		if self.hart_status(hart.get()) != HartStatus::Halted {
			log::debug!("resume request for hart {} ignored, hart is not halted", hart.get());
			return;
		}
		if self.abstractcs.busy {
			self.set_cmderr(CmdErr::Busy);
			return;
		}
		log::info!("resuming hart {}", hart.get());
		self.halted.set_halted(hart, false);
		self.halt_notification.remove(hart.get());
		self.stage_resume(hart);
	}

	fn write_abstractcs(&mut self, value: u32) {
		let reg = AbstractcsReg(value);
		self.abstractcs.autoexec = autoexec_from_bits(reg.autoexec_bits());
		if reg.cmderr() == CmdErr::None as u32 && self.abstractcs.cmderr != CmdErr::None {
			log::debug!("cmderr {:?} cleared", self.abstractcs.cmderr);
			self.abstractcs.cmderr = CmdErr::None;
		}
	}

	/// Returns false if the command was refused because `cmderr` was set or
	/// another command was in flight.
	fn perform_abstract_command(&mut self, command: u32) -> bool {
		if self.abstractcs.cmderr != CmdErr::None {
			log::debug!("command {:#010x} ignored, cmderr is {:?}", command, self.abstractcs.cmderr);
			return false;
		}
		if self.abstractcs.busy {
			self.set_cmderr(CmdErr::Busy);
			return false;
		}
		let hart = match self.existing_hart(self.dmcontrol.hartsel) {
			Some(hart) => hart,
			None => {
				log::warn!("abstract command for missing hart {}", self.dmcontrol.hartsel);
				self.set_cmderr(CmdErr::Exception);
				return true;
			}
		};
		match AbstractCommand::decode(command) {
			AbstractCommand::AccessRegister(access) => self.access_register(hart, access),
			AbstractCommand::QuickAccess => self.quick_access(hart),
			AbstractCommand::Unsupported(cmdtype) => {
				log::warn!("unsupported abstract command type {}", cmdtype);
				self.set_cmderr(CmdErr::NotSup);
			}
		}
		true
	}

	fn access_register(&mut self, hart: HartId, access: AccessRegister) {
		if self.hart_status(hart.get()) != HartStatus::Halted {
			self.set_cmderr(CmdErr::HaltResume);
			return;
		}
		let transfer = if access.transfer {
			match (access.size, access.gpr()) {
				(ACCESS_SIZE_32, Some(gpr)) => {
					if access.write {
						opcode::lw(gpr, 0, DEBUG_EXCHANGE as i32)
					} else {
						opcode::sw(gpr, 0, DEBUG_EXCHANGE as i32)
					}
				},
				_ => {
					log::warn!("unsupported register access: size {} regno {:#x}", access.size, access.regno);
					self.set_cmderr(CmdErr::NotSup);
					return;
				}
			}
		} else {
			opcode::NOP
		};
		let next = if access.postexec {
			jump(DEBUG_ROM_CODE + 4, DEBUG_PROGBUF_START)
		} else {
			opcode::EBREAK
		};
		self.stage(hart, ActionKind::AccessRegister, &[transfer, next]);
	}

	fn quick_access(&mut self, hart: HartId) {
		if self.hart_status(hart.get()) != HartStatus::Running {
			self.set_cmderr(CmdErr::HaltResume);
			return;
		}
		self.stage(hart, ActionKind::QuickAccess, &[jump(DEBUG_ROM_CODE, DEBUG_PROGBUF_START)]);
		self.interrupt.insert(hart.get());
		self.control.request_halt(hart.get());
	}
}

/// Handle to a debug module.
///
/// Clones share one module: one goes to the bus that maps its regions into
/// the harts' address space, one to whatever carries DMI accesses.
#[derive(Clone)]
pub struct DebugModule {
	data: Arc<Mutex<DebugModuleData>>
}

impl DebugModule {
	pub fn new(config: DebugModuleConfig, control: Box<dyn HartControl>) -> Result<Self, DmError> {
		config.validate()?;
		let mut data = DebugModuleData {
			config: config,
			control: control,
			dmcontrol: DmControl::power_on(config.auth_type),
			abstractcs: AbstractCs::power_on(),
			interrupt: HartSet::new(),
			halt_notification: HartSet::new(),
			halted: HaltTable::new(config.hart_limit),
			rom: DebugRom::new(),
			program_buffer: [0; DEBUG_PROGBUF_SIZE],
			dmdata: ExchangeBuffer::new(),
			pending: None,
			last_command: None,
		};
		data.reset();
		Ok(DebugModule {
			data: Arc::new(Mutex::new(data))
		})
	}

	pub fn config(&self) -> DebugModuleConfig {
		self.data.lock().config
	}

	/// Back to power-on state.
	pub fn reset(&self) {
		self.data.lock().reset();
	}

	/// Device read at `offset` from `DEBUG_START`.
	pub fn load(&self, offset: u32, bytes: &mut [u8]) -> MemReadResult<()> {
		self.data.lock().load(offset, bytes)
	}

	/// Device write at `offset` from `DEBUG_START`.
	pub fn store(&self, offset: u32, bytes: &[u8]) -> MemWriteResult {
		self.data.lock().store(offset, bytes)
	}

	pub fn read_32(&self, offset: u32) -> MemReadResult<u32> {
		let mut bytes = [0; 4];
		match self.load(offset, &mut bytes) {
			MemReadResult::Ok(()) => MemReadResult::Ok(LE::read_u32(&bytes)),
			MemReadResult::ErrUnmapped => MemReadResult::ErrUnmapped,
			MemReadResult::ErrAlignment => MemReadResult::ErrAlignment,
			MemReadResult::ErrSize => MemReadResult::ErrSize,
			MemReadResult::PeripheralError => MemReadResult::PeripheralError,
		}
	}

	pub fn write_32(&self, offset: u32, value: u32) -> MemWriteResult {
		let mut bytes = [0; 4];
		LE::write_u32(&mut bytes, value);
		self.store(offset, &bytes)
	}

	/// `None` if nothing is mapped at `address`.
	pub fn dmi_read(&self, address: u32) -> Option<u32> {
		self.data.lock().dmi_read(address)
	}

	/// False only if nothing is mapped at `address`. Refused operations show
	/// up in `abstractcs.cmderr` instead.
	pub fn dmi_write(&self, address: u32, value: u32) -> bool {
		self.data.lock().dmi_write(address, value)
	}

	pub fn set_interrupt(&self, hart_id: u32) {
		self.data.lock().interrupt.insert(hart_id);
	}

	pub fn clear_interrupt(&self, hart_id: u32) {
		self.data.lock().interrupt.remove(hart_id);
	}

	pub fn get_interrupt(&self, hart_id: u32) -> bool {
		self.data.lock().interrupt.contains(hart_id)
	}

	pub fn set_halt_notification(&self, hart_id: u32) {
		self.data.lock().halt_notification.insert(hart_id);
	}

	pub fn clear_halt_notification(&self, hart_id: u32) {
		self.data.lock().halt_notification.remove(hart_id);
	}

	pub fn get_halt_notification(&self, hart_id: u32) -> bool {
		self.data.lock().halt_notification.contains(hart_id)
	}

	pub fn pending_action(&self) -> Option<PendingAction> {
		self.data.lock().pending
	}

	/// Marks the pending action as run to completion, as if the hart had
	/// come back to its entry word.
	pub fn complete_action(&self) {
		self.data.lock().complete_action();
	}

	/// Marks the pending action as faulted, as if the hart had landed in its
	/// exception word.
	pub fn fault_action(&self) {
		self.data.lock().fault_action();
	}

	pub fn dmcontrol(&self) -> DmControl {
		self.data.lock().dmcontrol
	}

	pub fn abstractcs(&self) -> AbstractCs {
		self.data.lock().abstractcs
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dm_registers::AuthType;
	use crate::dm_rom::{DEBUG_ROM_ENTRY, DEBUG_ROM_EXCEPTION};
	use rv_vsys::Opcode;
	use std::collections::HashMap;

	/// Harts that never step. Tests play the hart's part by hand.
	#[derive(Clone, Default)]
	struct TestHarts {
		states: Arc<Mutex<HashMap<u32, HartRunState>>>,
		log: Arc<Mutex<Vec<String>>>,
	}

	impl TestHarts {
		fn with_harts(count: u32) -> Self {
			let harts = Self::default();
			for hart_id in 0 .. count {
				harts.states.lock().insert(hart_id, HartRunState::Running);
			}
			harts
		}

		fn set_state(&self, hart_id: u32, state: HartRunState) {
			self.states.lock().insert(hart_id, state);
		}

		fn requests(&self) -> Vec<String> {
			self.log.lock().clone()
		}
	}

	impl HartControl for TestHarts {
		fn hart_state(&self, hart_id: u32) -> Option<HartRunState> {
			self.states.lock().get(&hart_id).copied()
		}

		fn request_halt(&mut self, hart_id: u32) {
			self.log.lock().push(format!("halt {}", hart_id));
		}

		fn request_resume(&mut self, hart_id: u32) {
			self.log.lock().push(format!("resume {}", hart_id));
		}

		fn request_reset(&mut self, hart_id: u32) {
			self.log.lock().push(format!("reset {}", hart_id));
		}
	}

	fn test_module(hart_count: u32) -> (DebugModule, TestHarts) {
		let harts = TestHarts::with_harts(hart_count);
		let dm = DebugModule::new(DebugModuleConfig::default().with_hart_limit(16), Box::new(harts.clone())).unwrap();
		(dm, harts)
	}

	fn select(dm: &DebugModule, hart_id: u32) {
		let mut reg = DmcontrolReg(0);
		reg.set_dmactive(true);
		reg.set_hartsel(hart_id);
		assert!(dm.dmi_write(DMI_DMCONTROL, reg.0));
	}

	fn request_halt(dm: &DebugModule, hart_id: u32) {
		let mut reg = DmcontrolReg(0);
		reg.set_dmactive(true);
		reg.set_haltreq(true);
		reg.set_hartsel(hart_id);
		assert!(dm.dmi_write(DMI_DMCONTROL, reg.0));
	}

	fn fetch(dm: &DebugModule, addr: u32) -> u32 {
		dm.read_32(addr - DEBUG_START).ok().unwrap()
	}

	/// Hart parks on its entry word, the way a hart entering debug mode does.
	fn park(dm: &DebugModule, hart_id: u32) {
		fetch(dm, DEBUG_ROM_ENTRY + 4 * hart_id);
	}

	fn halted_hart(dm: &DebugModule, hart_id: u32) {
		request_halt(dm, hart_id);
		park(dm, hart_id);
		select(dm, hart_id);
	}

	fn read_gpr(regno: u32) -> u32 {
		AccessRegister { size: ACCESS_SIZE_32, postexec: false, transfer: true, write: false, regno: regno }.to_bits()
	}

	fn write_gpr(regno: u32) -> u32 {
		AccessRegister { size: ACCESS_SIZE_32, postexec: false, transfer: true, write: true, regno: regno }.to_bits()
	}

	fn hartstatus(dm: &DebugModule) -> HartStatus {
		DmControl::from(dm.dmi_read(DMI_DMCONTROL).unwrap()).hartstatus
	}

	fn cmderr(dm: &DebugModule) -> CmdErr {
		AbstractCs::from(dm.dmi_read(DMI_ABSTRACTCS).unwrap()).cmderr
	}

	fn busy(dm: &DebugModule) -> bool {
		AbstractCs::from(dm.dmi_read(DMI_ABSTRACTCS).unwrap()).busy
	}

	#[test]
	fn power_on_state() {
		let (dm, _) = test_module(4);
		let abstractcs = dm.abstractcs();
		assert_eq!(abstractcs.cmderr, CmdErr::None);
		assert!(!abstractcs.busy);
		assert_eq!(abstractcs.datacount, 8);
		let control = dm.dmcontrol();
		assert!(!control.dmactive);
		assert!(control.authenticated);
		assert_eq!(control.version, 1);
		assert_eq!(dm.dmi_read(DMI_ACCESSCS), Some(8 << 24));
		assert_eq!(dm.dmi_read(DMI_PROGBUF0), Some(0));
	}

	#[test]
	fn unmapped_dmi_addresses_fail() {
		let (dm, _) = test_module(1);
		assert_eq!(dm.dmi_read(0x40), None);
		assert!(!dm.dmi_write(0x40, 0));
		assert_eq!(dm.dmi_read(DMI_DATA0 + 8), None);
		assert!(dm.dmi_write(DMI_ACCESSCS, 0));
		assert_eq!(dm.dmi_read(DMI_ACCESSCS), Some(8 << 24));
	}

	#[test]
	fn hartstatus_follows_selection() {
		let (dm, harts) = test_module(4);
		select(&dm, 2);
		assert_eq!(hartstatus(&dm), HartStatus::Running);
		harts.set_state(2, HartRunState::Unavailable);
		assert_eq!(hartstatus(&dm), HartStatus::Unavailable);
		select(&dm, 9);
		assert_eq!(hartstatus(&dm), HartStatus::NotExist);
		// beyond the halt table entirely
		select(&dm, 100);
		assert_eq!(hartstatus(&dm), HartStatus::NotExist);
	}

	#[test]
	fn halt_request_then_entry_fetch_halts() {
		let (dm, harts) = test_module(4);
		request_halt(&dm, 1);
		assert!(dm.get_interrupt(1));
		assert_eq!(hartstatus(&dm), HartStatus::Running);
		assert_eq!(harts.requests(), vec!["halt 1"]);
		park(&dm, 1);
		assert!(!dm.get_interrupt(1));
		assert!(dm.get_halt_notification(1));
		assert_eq!(hartstatus(&dm), HartStatus::Halted);
	}

	#[test]
	fn halt_request_on_halted_hart_is_a_no_op() {
		let (dm, harts) = test_module(1);
		halted_hart(&dm, 0);
		request_halt(&dm, 0);
		assert!(!dm.get_interrupt(0));
		assert_eq!(hartstatus(&dm), HartStatus::Halted);
		assert_eq!(harts.requests().iter().filter(|r| *r == "halt 0").count(), 1);
	}

	#[test]
	fn clearing_haltreq_acknowledges_the_halt() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		assert!(!dm.get_halt_notification(0));
		assert_eq!(hartstatus(&dm), HartStatus::Halted);
	}

	#[test]
	fn clearing_haltreq_before_halt_withdraws_it() {
		let (dm, harts) = test_module(1);
		request_halt(&dm, 0);
		select(&dm, 0);
		assert!(!dm.get_interrupt(0));
		assert_eq!(harts.requests(), vec!["halt 0", "resume 0"]);
	}

	#[test]
	fn register_read_completes_through_the_rom() {
		let (dm, _) = test_module(4);
		halted_hart(&dm, 0);
		assert!(dm.dmi_write(DMI_COMMAND, read_gpr(0x1005)));
		assert!(busy(&dm));

		// hart 0 takes the staged jump into the code region
		let entry = fetch(&dm, DEBUG_ROM_ENTRY);
		assert_eq!(DEBUG_ROM_ENTRY.wrapping_add(Opcode::new(entry).j_imm_signed() as u32), DEBUG_ROM_CODE);
		let first = fetch(&dm, DEBUG_ROM_CODE);
		assert_eq!(first, opcode::sw(5, 0, DEBUG_EXCHANGE as i32));
		dm.write_32(DEBUG_EXCHANGE - DEBUG_START, 0xCAFE_F00D);
		assert_eq!(fetch(&dm, DEBUG_ROM_CODE + 4), opcode::EBREAK);
		// ebreak sends it back to its entry word, now parked again
		assert_eq!(fetch(&dm, DEBUG_ROM_ENTRY), PARK);

		assert!(!busy(&dm));
		assert_eq!(cmderr(&dm), CmdErr::None);
		assert_eq!(dm.dmi_read(DMI_DATA0), Some(0xCAFE_F00D));
		assert_eq!(dm.pending_action(), None);
	}

	#[test]
	fn register_write_stages_load_from_exchange() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_DATA0, 0x1234);
		dm.dmi_write(DMI_COMMAND, write_gpr(0x1001));
		fetch(&dm, DEBUG_ROM_ENTRY);
		assert_eq!(fetch(&dm, DEBUG_ROM_CODE), opcode::lw(1, 0, DEBUG_EXCHANGE as i32));
	}

	#[test]
	fn postexec_jumps_into_program_buffer() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		let command = AccessRegister { size: ACCESS_SIZE_32, postexec: true, transfer: false, write: false, regno: 0 }.to_bits();
		dm.dmi_write(DMI_COMMAND, command);
		fetch(&dm, DEBUG_ROM_ENTRY);
		assert_eq!(fetch(&dm, DEBUG_ROM_CODE), opcode::NOP);
		let jump = Opcode::new(fetch(&dm, DEBUG_ROM_CODE + 4));
		assert_eq!((DEBUG_ROM_CODE + 4).wrapping_add(jump.j_imm_signed() as u32), DEBUG_PROGBUF_START);
		// the program buffer ends in an ebreak the debugger cannot overwrite
		assert_eq!(fetch(&dm, DEBUG_PROGBUF_START + 4 * PROGSIZE as u32), opcode::EBREAK);
		assert_eq!(dm.write_32(DEBUG_PROGBUF_START + 4 * PROGSIZE as u32 - DEBUG_START, 0), MemWriteResult::ErrReadOnly);
	}

	#[test]
	fn command_while_busy_sets_busy_and_keeps_staged_state() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x1005));
		let staged = dm.pending_action();
		let code = fetch(&dm, DEBUG_ROM_CODE);
		assert!(dm.dmi_write(DMI_COMMAND, write_gpr(0x1006)));
		assert_eq!(cmderr(&dm), CmdErr::Busy);
		assert_eq!(dm.pending_action(), staged);
		assert_eq!(fetch(&dm, DEBUG_ROM_CODE), code);
	}

	#[test]
	fn data_access_while_busy_is_refused() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_DATA0, 7);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x1005));
		dm.dmi_write(DMI_DATA0, 9);
		assert_eq!(cmderr(&dm), CmdErr::Busy);
		dm.complete_action();
		assert_eq!(dm.dmi_read(DMI_DATA0), Some(7));
	}

	#[test]
	fn cmderr_is_sticky_until_cleared() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_COMMAND, 0x0700_0000);
		assert_eq!(cmderr(&dm), CmdErr::NotSup);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x1001));
		assert!(!busy(&dm));
		assert_eq!(cmderr(&dm), CmdErr::NotSup);

		// writing cmderr back to 0 clears it
		assert!(dm.dmi_write(DMI_ABSTRACTCS, 0));
		assert_eq!(cmderr(&dm), CmdErr::None);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x1001));
		assert!(busy(&dm));
	}

	#[test]
	fn unsupported_register_accesses() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		// 64-bit access on an RV32 hart
		let wide = AccessRegister { size: 3, postexec: false, transfer: true, write: false, regno: 0x1001 }.to_bits();
		dm.dmi_write(DMI_COMMAND, wide);
		assert_eq!(cmderr(&dm), CmdErr::NotSup);
		dm.dmi_write(DMI_ABSTRACTCS, 0);
		// CSRs
		dm.dmi_write(DMI_COMMAND, read_gpr(0x0300));
		assert_eq!(cmderr(&dm), CmdErr::NotSup);
		assert!(!busy(&dm));
	}

	#[test]
	fn register_access_on_running_hart_is_haltresume() {
		let (dm, _) = test_module(1);
		select(&dm, 0);
		assert!(dm.dmi_write(DMI_COMMAND, read_gpr(0x1001)));
		assert_eq!(cmderr(&dm), CmdErr::HaltResume);
		assert!(!busy(&dm));
	}

	#[test]
	fn running_hart_is_checked_before_register_support() {
		let (dm, _) = test_module(1);
		select(&dm, 0);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x0300));
		assert_eq!(cmderr(&dm), CmdErr::HaltResume);
		dm.dmi_write(DMI_ABSTRACTCS, 0);
		let wide = AccessRegister { size: 3, postexec: false, transfer: true, write: false, regno: 0x1001 }.to_bits();
		dm.dmi_write(DMI_COMMAND, wide);
		assert_eq!(cmderr(&dm), CmdErr::HaltResume);
		assert!(!busy(&dm));
	}

	#[test]
	fn command_for_missing_hart_never_goes_busy() {
		let (dm, _) = test_module(4);
		select(&dm, 5);
		assert!(dm.dmi_write(DMI_COMMAND, read_gpr(0x1001)));
		assert_eq!(cmderr(&dm), CmdErr::Exception);
		assert!(!busy(&dm));
		assert_eq!(dm.pending_action(), None);
	}

	#[test]
	fn fault_in_staged_code_reports_exception() {
		let (dm, _) = test_module(2);
		halted_hart(&dm, 1);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x1001));
		fetch(&dm, DEBUG_ROM_ENTRY + 4);
		fetch(&dm, DEBUG_ROM_CODE);
		// the store faulted; the hart lands in its exception word and jumps home
		fetch(&dm, DEBUG_ROM_EXCEPTION + 4);
		assert!(busy(&dm));
		fetch(&dm, DEBUG_ROM_ENTRY + 4);
		assert!(!busy(&dm));
		assert_eq!(cmderr(&dm), CmdErr::Exception);
	}

	#[test]
	fn explicit_completion_and_fault() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x1001));
		let action = dm.pending_action().unwrap();
		assert_eq!(action.kind, ActionKind::AccessRegister);
		assert!(!action.executed);
		assert_eq!(action.next_action, PARK);
		dm.complete_action();
		assert!(!busy(&dm));
		assert_eq!(fetch(&dm, DEBUG_ROM_ENTRY), PARK);

		dm.dmi_write(DMI_COMMAND, read_gpr(0x1001));
		dm.fault_action();
		assert!(!busy(&dm));
		assert_eq!(cmderr(&dm), CmdErr::Exception);
	}

	#[test]
	fn autoexec_reruns_last_command_once_per_write() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_COMMAND, write_gpr(0x1008));
		dm.complete_action();
		let mut abstractcs = AbstractcsReg(0);
		abstractcs.set_autoexec_bits(1);
		dm.dmi_write(DMI_ABSTRACTCS, abstractcs.0);

		dm.dmi_write(DMI_DATA0, 0x55);
		let action = dm.pending_action().unwrap();
		assert_eq!(action.kind, ActionKind::AccessRegister);
		fetch(&dm, DEBUG_ROM_ENTRY);
		assert_eq!(fetch(&dm, DEBUG_ROM_CODE), opcode::lw(8, 0, DEBUG_EXCHANGE as i32));
		fetch(&dm, DEBUG_ROM_ENTRY);
		assert!(!busy(&dm));

		// data1 has no autoexec
		dm.dmi_write(DMI_DATA0 + 1, 0x66);
		assert_eq!(dm.pending_action(), None);
		assert_eq!(cmderr(&dm), CmdErr::None);
	}

	#[test]
	fn refused_commands_are_not_replayed_by_autoexec() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x1005));
		dm.dmi_write(DMI_COMMAND, write_gpr(0x1006));
		assert_eq!(cmderr(&dm), CmdErr::Busy);
		dm.complete_action();

		// refused while cmderr is still set
		dm.dmi_write(DMI_COMMAND, write_gpr(0x1007));
		assert!(!busy(&dm));

		// clears cmderr and sets autoexec0
		dm.dmi_write(DMI_ABSTRACTCS, 1 << 16);
		dm.dmi_write(DMI_DATA0, 0);
		assert!(busy(&dm));
		fetch(&dm, DEBUG_ROM_ENTRY);
		assert_eq!(fetch(&dm, DEBUG_ROM_CODE), opcode::sw(5, 0, DEBUG_EXCHANGE as i32));
		fetch(&dm, DEBUG_ROM_ENTRY);
		assert!(!busy(&dm));
		assert_eq!(cmderr(&dm), CmdErr::None);
	}

	#[test]
	fn autoexec_without_a_previous_command_does_nothing() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_ABSTRACTCS, 1 << 16);
		dm.dmi_write(DMI_DATA0, 1);
		assert_eq!(dm.pending_action(), None);
		assert_eq!(cmderr(&dm), CmdErr::None);
	}

	#[test]
	fn resume_stages_dret() {
		let (dm, harts) = test_module(1);
		halted_hart(&dm, 0);
		let mut reg = DmcontrolReg(0);
		reg.set_dmactive(true);
		reg.set_resumereq(true);
		dm.dmi_write(DMI_DMCONTROL, reg.0);
		assert_eq!(hartstatus(&dm), HartStatus::Running);
		assert!(busy(&dm));
		assert!(harts.requests().contains(&"resume 0".to_string()));
		// resumereq is not held
		assert!(!dm.dmcontrol().resumereq);

		fetch(&dm, DEBUG_ROM_ENTRY);
		assert_eq!(fetch(&dm, DEBUG_ROM_CODE), opcode::DRET);
		assert!(!busy(&dm));
		assert_eq!(hartstatus(&dm), HartStatus::Running);
		assert_eq!(fetch(&dm, DEBUG_ROM_ENTRY), PARK);
	}

	#[test]
	fn quick_access_runs_program_buffer_then_resumes() {
		let (dm, harts) = test_module(1);
		select(&dm, 0);
		dm.dmi_write(DMI_PROGBUF0, opcode::addi(5, 5, 1));
		assert!(dm.dmi_write(DMI_COMMAND, AbstractCommand::QUICK_ACCESS));
		assert!(busy(&dm));
		assert!(dm.get_interrupt(0));
		assert_eq!(harts.requests(), vec!["halt 0"]);

		// the hart enters debug mode and follows the staged jumps
		harts.set_state(0, HartRunState::Halted);
		fetch(&dm, DEBUG_ROM_ENTRY);
		assert_eq!(hartstatus(&dm), HartStatus::Running);
		assert!(!dm.get_halt_notification(0));
		let jump = Opcode::new(fetch(&dm, DEBUG_ROM_CODE));
		assert_eq!(DEBUG_ROM_CODE.wrapping_add(jump.j_imm_signed() as u32), DEBUG_PROGBUF_START);
		assert_eq!(fetch(&dm, DEBUG_PROGBUF_START), opcode::addi(5, 5, 1));
		fetch(&dm, DEBUG_PROGBUF_START + 4);
		// implicit ebreak returns to the entry word, which now leads to dret
		fetch(&dm, DEBUG_ROM_ENTRY);
		assert_eq!(dm.pending_action().map(|action| action.kind), Some(ActionKind::Resume));
		assert_eq!(fetch(&dm, DEBUG_ROM_CODE), opcode::DRET);
		assert!(!busy(&dm));
		assert_eq!(harts.requests(), vec!["halt 0", "resume 0"]);
	}

	#[test]
	fn quick_access_on_halted_hart_is_haltresume() {
		let (dm, _) = test_module(1);
		halted_hart(&dm, 0);
		dm.dmi_write(DMI_COMMAND, AbstractCommand::QUICK_ACCESS);
		assert_eq!(cmderr(&dm), CmdErr::HaltResume);
	}

	#[test]
	fn reset_bit_resets_selected_hart() {
		let (dm, harts) = test_module(2);
		halted_hart(&dm, 1);
		let mut reg = DmcontrolReg(0);
		reg.set_dmactive(true);
		reg.set_reset(true);
		reg.set_hartsel(1);
		dm.dmi_write(DMI_DMCONTROL, reg.0);
		assert!(harts.requests().contains(&"reset 1".to_string()));
		assert_eq!(hartstatus(&dm), HartStatus::Running);
		assert!(!dm.dmcontrol().reset);
	}

	#[test]
	fn dmactive_low_resets_module() {
		let (dm, _) = test_module(4);
		halted_hart(&dm, 2);
		dm.set_interrupt(3);
		dm.set_halt_notification(1);
		dm.dmi_write(DMI_PROGBUF0 + 2, 0xFFFF_FFFF);
		dm.dmi_write(DMI_COMMAND, read_gpr(0x1001));

		assert!(dm.dmi_write(DMI_DMCONTROL, 0));
		let abstractcs = dm.abstractcs();
		assert_eq!(abstractcs.cmderr, CmdErr::None);
		assert!(!abstractcs.busy);
		assert!(!dm.get_interrupt(3));
		assert!(!dm.get_halt_notification(1));
		assert_eq!(dm.dmi_read(DMI_PROGBUF0 + 2), Some(0));
		assert_eq!(dm.pending_action(), None);
		select(&dm, 2);
		assert_eq!(hartstatus(&dm), HartStatus::Running);
		// hart 2 re-reports on its next entry fetch
		assert_eq!(fetch(&dm, DEBUG_ROM_ENTRY + 8), PARK);
		assert_eq!(hartstatus(&dm), HartStatus::Halted);
	}

	#[test]
	fn collaborator_reported_halt_shows_after_reset() {
		let (dm, harts) = test_module(1);
		harts.set_state(0, HartRunState::Halted);
		select(&dm, 0);
		assert_eq!(hartstatus(&dm), HartStatus::Halted);
	}

	#[test]
	fn interrupt_set_membership() {
		let (dm, _) = test_module(4);
		dm.set_interrupt(2);
		assert!(dm.get_interrupt(2));
		assert!(!dm.get_interrupt(1));
		assert!(!dm.get_interrupt(3));
		dm.clear_interrupt(2);
		assert!(!dm.get_interrupt(2));
		assert!(!dm.get_interrupt(1));
		assert!(!dm.get_interrupt(3));
	}

	#[test]
	fn halt_notification_set_membership() {
		let (dm, _) = test_module(4);
		dm.set_halt_notification(2);
		assert!(dm.get_halt_notification(2));
		assert!(!dm.get_halt_notification(1));
		assert!(!dm.get_halt_notification(3));
		dm.clear_halt_notification(2);
		assert!(!dm.get_halt_notification(2));
		assert!(!dm.get_halt_notification(1));
		assert!(!dm.get_halt_notification(3));
	}

	#[test]
	fn device_bus_access_rules() {
		let (dm, _) = test_module(1);
		assert_eq!(dm.write_32(DEBUG_EXCHANGE - DEBUG_START + 4, 0xAB), MemWriteResult::Ok);
		assert_eq!(dm.dmi_read(DMI_DATA0 + 1), Some(0xAB));
		assert_eq!(dm.write_32(DEBUG_PROGBUF_START - DEBUG_START, opcode::NOP), MemWriteResult::Ok);
		assert_eq!(dm.dmi_read(DMI_PROGBUF0), Some(opcode::NOP));
		assert_eq!(dm.write_32(DEBUG_ROM_ENTRY - DEBUG_START, 0), MemWriteResult::ErrReadOnly);
		assert_eq!(dm.write_32(DEBUG_ROM_CODE - DEBUG_START, 0), MemWriteResult::ErrReadOnly);
		assert_eq!(dm.write_32(DEBUG_ROM_EXCEPTION - DEBUG_START, 0), MemWriteResult::ErrReadOnly);
		assert_eq!(dm.read_32(0x0080), MemReadResult::ErrUnmapped);
		assert_eq!(dm.write_32(0x0080, 0), MemWriteResult::ErrUnmapped);
		assert_eq!(dm.read_32(u32::MAX), MemReadResult::ErrUnmapped);
	}

	#[test]
	fn password_auth_reports_unauthenticated() {
		let harts = TestHarts::with_harts(1);
		let config = DebugModuleConfig::default().with_auth_type(AuthType::Password);
		let dm = DebugModule::new(config, Box::new(harts)).unwrap();
		let control = DmControl::from(dm.dmi_read(DMI_DMCONTROL).unwrap());
		assert!(!control.authenticated);
		assert_eq!(control.authtype, AuthType::Password);
	}

	#[test]
	fn invalid_config_is_rejected() {
		let harts = TestHarts::with_harts(1);
		let config = DebugModuleConfig::default().with_hart_limit(0);
		assert!(DebugModule::new(config, Box::new(harts)).is_err());
	}
}
