#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemReadResult<T> {
	Ok(T),
	ErrUnmapped,
	ErrAlignment,
	ErrSize,
	PeripheralError,
}

impl <T> MemReadResult<T> {
	pub fn is_ok(&self) -> bool {
		matches!(self, MemReadResult::Ok(..))
	}
	
	pub fn ok(self) -> Option<T> {
		if let Self::Ok(x) = self {
			Some(x)
		} else {
			None
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemWriteResult {
	Ok,
	ErrUnmapped,
	ErrReadOnly,
	ErrAlignment,
	ErrSize,
	PeripheralError,
}

impl MemWriteResult {
	pub fn is_ok(&self) -> bool {
		matches!(self, MemWriteResult::Ok)
	}
}

/// The address space as seen by a single hart.
pub trait MemIO {
	fn read_32(&mut self, addr: u32) -> MemReadResult<u32>;
	fn write_32(&mut self, addr: u32, value: u32) -> MemWriteResult;
	
	/// Instruction fetch. Devices that watch for fetches (the debug ROM) see
	/// the same access as a data read.
	fn read_32_ifetch(&mut self, addr: u32) -> MemReadResult<u32> {
		self.read_32(addr)
	}
}
