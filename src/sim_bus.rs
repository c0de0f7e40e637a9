use std::sync::Arc;
use parking_lot::Mutex;

use rv_vsys::{MemIO, MemReadResult, MemWriteResult};
use byteorder::{LE, ByteOrder};

use crate::debug_module::DebugModule;
use crate::dm_rom::{DEBUG_END, DEBUG_START};

pub const RAM_START: u32 = 0x8000_0000;
pub const RAM_SIZE: usize = 0x0010_0000;

/// Address space shared by every hart of a `Sim`.
///
///   DEBUG_START .. DEBUG_END:  debug module (exchange, progbuf, ROM)
///   RAM_START .. + RAM_SIZE:   RAM
///
/// Clones share RAM and the debug module.
#[derive(Clone)]
pub struct SimBus {
	ram: Arc<Mutex<Box<[u8]>>>,
	debug_module: DebugModule,
}

impl SimBus {
	pub fn new(debug_module: DebugModule) -> SimBus {
		SimBus {
			ram: Arc::new(Mutex::new(vec![0u8; RAM_SIZE].into_boxed_slice())),
			debug_module: debug_module,
		}
	}

	pub fn debug_module(&self) -> &DebugModule {
		&self.debug_module
	}

	fn ram_offset(addr: u32, len: usize) -> Option<usize> {
		let offset = addr.checked_sub(RAM_START)? as usize;
		if offset.checked_add(len)? <= RAM_SIZE {
			Some(offset)
		} else {
			None
		}
	}

	/// Copies little-endian instruction words into RAM at `addr`.
	pub fn load_program(&self, addr: u32, program: &[u32]) -> MemWriteResult {
		let offset = match Self::ram_offset(addr, program.len() * 4) {
			Some(offset) => offset,
			None => return MemWriteResult::ErrUnmapped,
		};
		let mut gaurd = self.ram.lock();
		for (i, word) in program.iter().enumerate() {
			LE::write_u32(&mut gaurd[offset + i * 4 ..], *word);
		}
		MemWriteResult::Ok
	}

	pub fn read_ram_32(&self, addr: u32) -> MemReadResult<u32> {
		if addr & 3 != 0 {
			return MemReadResult::ErrAlignment;
		}
		match Self::ram_offset(addr, 4) {
			Some(offset) => MemReadResult::Ok(LE::read_u32(&self.ram.lock()[offset ..])),
			None => MemReadResult::ErrUnmapped,
		}
	}
}

impl MemIO for SimBus {
	fn read_32(&mut self, addr: u32) -> MemReadResult<u32> {
		if addr & 3 != 0 {
			return MemReadResult::ErrAlignment;
		}
		if addr >= DEBUG_START && addr < DEBUG_END {
			self.debug_module.read_32(addr - DEBUG_START)
		} else {
			self.read_ram_32(addr)
		}
	}

	fn write_32(&mut self, addr: u32, value: u32) -> MemWriteResult {
		if addr & 3 != 0 {
			return MemWriteResult::ErrAlignment;
		}
		if addr >= DEBUG_START && addr < DEBUG_END {
			return self.debug_module.write_32(addr - DEBUG_START, value);
		}
		match Self::ram_offset(addr, 4) {
			Some(offset) => {
				LE::write_u32(&mut self.ram.lock()[offset ..], value);
				MemWriteResult::Ok
			},
			None => MemWriteResult::ErrUnmapped,
		}
	}
}
