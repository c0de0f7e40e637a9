/* Debug module address map

	0x0100 - 0x011F: exchange buffer       R/W   data0 - data7
	0x0200 - 0x021F: program buffer        R/W   progbuf0 - progbuf7
	0x0220 - 0x0223: program buffer tail   R     implicit ebreak
	0x1000 - 0x1FFF: debug ROM entry       R     one word per hart
	0x2000 - 0x20FF: debug ROM code        R     staged instructions
	0x2100 - 0x30FF: debug ROM exception   R     one word per hart
*/

use byteorder::{LE, ByteOrder};
use rv_vsys::{opcode, DebugVectors};

use crate::hart_table::HartId;

pub const MAX_HARTS: usize = 1024;

pub const DEBUG_START: u32 = 0x0100;

pub const DEBUG_EXCHANGE: u32 = 0x0100;
pub const DEBUG_EXCHANGE_SIZE: usize = 32;
pub const DATACOUNT: usize = DEBUG_EXCHANGE_SIZE / 4;

pub const DEBUG_PROGBUF_START: u32 = 0x0200;
pub const PROGSIZE: usize = 8;
pub const DEBUG_PROGBUF_SIZE: usize = 4 * (PROGSIZE + 1);

pub const DEBUG_ROM_ENTRY: u32 = 0x1000;
pub const DEBUG_ROM_ENTRY_SIZE: usize = 4 * MAX_HARTS;
pub const DEBUG_ROM_CODE: u32 = 0x2000;
pub const DEBUG_ROM_CODE_SIZE: usize = 256;
pub const DEBUG_ROM_EXCEPTION: u32 = 0x2100;
pub const DEBUG_ROM_EXCEPTION_SIZE: usize = 4 * MAX_HARTS;

pub const DEBUG_END: u32 = DEBUG_ROM_EXCEPTION + DEBUG_ROM_EXCEPTION_SIZE as u32;

pub const DEBUG_VECTORS: DebugVectors = DebugVectors {
	rom_entry: DEBUG_ROM_ENTRY,
	rom_exception: DEBUG_ROM_EXCEPTION,
};

/// Jump-to-self a halted hart spins on.
pub const PARK: u32 = opcode::jal(0, 0);

pub fn entry_address(hart: HartId) -> u32 {
	DEBUG_ROM_ENTRY + 4 * hart.get()
}

pub fn exception_address(hart: HartId) -> u32 {
	DEBUG_ROM_EXCEPTION + 4 * hart.get()
}

/// `jal x0` from one absolute address to another.
pub fn jump(from: u32, to: u32) -> u32 {
	opcode::jal(0, to.wrapping_sub(from) as i32)
}

pub fn read32(memory: &[u8], index: usize) -> u32 {
	LE::read_u32(&memory[index * 4 .. index * 4 + 4])
}

pub fn write32(memory: &mut [u8], index: usize, value: u32) {
	LE::write_u32(&mut memory[index * 4 .. index * 4 + 4], value);
}

/// A decoded access into the debug module's address range. Offsets are
/// relative to the start of the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
	Exchange(usize),
	ProgramBuffer(usize),
	RomEntry(usize),
	RomCode(usize),
	RomException(usize),
}

impl Region {
	/// The region holding all of `addr .. addr + len`, if any.
	pub fn decode(addr: u32, len: usize) -> Option<Region> {
		let regions: [(u32, usize, fn(usize) -> Region); 5] = [
			(DEBUG_EXCHANGE, DEBUG_EXCHANGE_SIZE, Region::Exchange),
			(DEBUG_PROGBUF_START, DEBUG_PROGBUF_SIZE, Region::ProgramBuffer),
			(DEBUG_ROM_ENTRY, DEBUG_ROM_ENTRY_SIZE, Region::RomEntry),
			(DEBUG_ROM_CODE, DEBUG_ROM_CODE_SIZE, Region::RomCode),
			(DEBUG_ROM_EXCEPTION, DEBUG_ROM_EXCEPTION_SIZE, Region::RomException),
		];
		let addr = addr as u64;
		let end = addr + len as u64;
		regions.iter().find_map(|(start, size, region)| {
			let start = *start as u64;
			if addr >= start && end <= start + *size as u64 {
				Some(region((addr - start) as usize))
			} else {
				None
			}
		})
	}
}

/// Debug ROM images.
///
/// Every hart has an entry word (what it runs while parked in debug mode)
/// and an exception word (where it lands if staged code faults). The code
/// region is shared and holds the currently staged instructions.
pub struct DebugRom {
	entry: Box<[u8]>,
	code: [u8; DEBUG_ROM_CODE_SIZE],
	exception: Box<[u8]>,
}

impl DebugRom {
	pub fn new() -> Self {
		let mut rom = DebugRom {
			entry: vec![0; DEBUG_ROM_ENTRY_SIZE].into_boxed_slice(),
			code: [0; DEBUG_ROM_CODE_SIZE],
			exception: vec![0; DEBUG_ROM_EXCEPTION_SIZE].into_boxed_slice(),
		};
		rom.reset();
		rom
	}
	
	/// Restores the fixed templates.
	pub fn reset(&mut self) {
		for index in 0 .. MAX_HARTS {
			let entry = DEBUG_ROM_ENTRY + 4 * index as u32;
			let exception = DEBUG_ROM_EXCEPTION + 4 * index as u32;
			write32(&mut self.entry, index, PARK);
			write32(&mut self.exception, index, jump(exception, entry));
		}
		for index in 0 .. DEBUG_ROM_CODE_SIZE / 4 {
			write32(&mut self.code, index, opcode::EBREAK);
		}
	}
	
	pub fn entry_word(&self, hart: HartId) -> u32 {
		read32(&self.entry, hart.index())
	}
	
	pub fn set_entry_word(&mut self, hart: HartId, value: u32) {
		write32(&mut self.entry, hart.index(), value);
	}
	
	pub fn set_code_word(&mut self, index: usize, value: u32) {
		write32(&mut self.code, index, value);
	}
	
	pub fn exception_word(&self, hart: HartId) -> u32 {
		read32(&self.exception, hart.index())
	}
	
	pub fn entry_bytes(&self) -> &[u8] {
		&self.entry
	}
	
	pub fn code_bytes(&self) -> &[u8] {
		&self.code
	}
	
	pub fn exception_bytes(&self) -> &[u8] {
		&self.exception
	}
}
