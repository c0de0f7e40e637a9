use std::ops::Range;

use byteorder::{LE, ByteOrder};
use rv_vsys::{MemReadResult, MemWriteResult};

use crate::dm_rom::DEBUG_EXCHANGE_SIZE;

/// Scratch words shared by the `dataN` registers and the hart running staged
/// code. Word accessors are little-endian and need 4-byte aligned offsets.
#[derive(Debug, Clone)]
pub struct ExchangeBuffer {
	data: [u8; DEBUG_EXCHANGE_SIZE],
}

impl ExchangeBuffer {
	pub fn new() -> Self {
		ExchangeBuffer {
			data: [0; DEBUG_EXCHANGE_SIZE]
		}
	}
	
	fn range(addr: usize, len: usize) -> Option<Range<usize>> {
		let end = addr.checked_add(len)?;
		if end <= DEBUG_EXCHANGE_SIZE {
			Some(addr .. end)
		} else {
			None
		}
	}
	
	pub fn load(&self, addr: usize, bytes: &mut [u8]) -> MemReadResult<()> {
		match Self::range(addr, bytes.len()) {
			Some(range) => {
				bytes.copy_from_slice(&self.data[range]);
				MemReadResult::Ok(())
			},
			None => {
				log::warn!("invalid load from exchange buffer: {} bytes at {:#x}", bytes.len(), addr);
				MemReadResult::ErrUnmapped
			}
		}
	}
	
	pub fn store(&mut self, addr: usize, bytes: &[u8]) -> MemWriteResult {
		match Self::range(addr, bytes.len()) {
			Some(range) => {
				self.data[range].copy_from_slice(bytes);
				MemWriteResult::Ok
			},
			None => {
				log::warn!("invalid store to exchange buffer: {} bytes at {:#x}", bytes.len(), addr);
				MemWriteResult::ErrUnmapped
			}
		}
	}
	
	pub fn read32(&self, addr: usize) -> MemReadResult<u32> {
		if addr & 3 != 0 {
			return MemReadResult::ErrAlignment;
		}
		match Self::range(addr, 4) {
			Some(range) => MemReadResult::Ok(LE::read_u32(&self.data[range])),
			None => MemReadResult::ErrUnmapped,
		}
	}
	
	pub fn write32(&mut self, addr: usize, value: u32) -> MemWriteResult {
		if addr & 3 != 0 {
			return MemWriteResult::ErrAlignment;
		}
		match Self::range(addr, 4) {
			Some(range) => {
				LE::write_u32(&mut self.data[range], value);
				MemWriteResult::Ok
			},
			None => MemWriteResult::ErrUnmapped,
		}
	}
}
