use std::collections::BTreeSet;

use crate::dm_rom::MAX_HARTS;
use crate::error::DmError;

/// A hart id checked against the halt table's bound.
///
/// Only `HaltTable::hart` hands these out, so indexing any per-hart storage
/// sized for the table with one cannot go out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HartId(u32);

impl HartId {
	pub fn get(self) -> u32 {
		self.0
	}
	
	pub fn index(self) -> usize {
		self.0 as usize
	}
}

/// Per-hart halted flags, as the debugger sees them.
#[derive(Debug, Clone)]
pub struct HaltTable {
	halted: Box<[bool]>,
}

impl HaltTable {
	pub fn new(limit: u32) -> Self {
		let limit = (limit as usize).min(MAX_HARTS);
		HaltTable {
			halted: vec![false; limit].into_boxed_slice()
		}
	}
	
	pub fn limit(&self) -> u32 {
		self.halted.len() as u32
	}
	
	pub fn hart(&self, id: u32) -> Result<HartId, DmError> {
		if (id as usize) < self.halted.len() {
			Ok(HartId(id))
		} else {
			Err(DmError::HartOutOfRange { hart: id, limit: self.limit() })
		}
	}
	
	pub fn is_halted(&self, hart: HartId) -> bool {
		self.halted[hart.index()]
	}
	
	pub fn set_halted(&mut self, hart: HartId, halted: bool) {
		self.halted[hart.index()] = halted;
	}
	
	pub fn clear(&mut self) {
		for halted in self.halted.iter_mut() {
			*halted = false;
		}
	}
}

/// Sparse set of hart ids.
#[derive(Debug, Clone, Default)]
pub struct HartSet {
	members: BTreeSet<u32>,
}

impl HartSet {
	pub fn new() -> Self {
		Self::default()
	}
	
	pub fn insert(&mut self, hart_id: u32) {
		self.members.insert(hart_id);
	}
	
	pub fn remove(&mut self, hart_id: u32) {
		self.members.remove(&hart_id);
	}
	
	pub fn contains(&self, hart_id: u32) -> bool {
		self.members.contains(&hart_id)
	}
	
	pub fn clear(&mut self) {
		self.members.clear();
	}
	
	pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
		self.members.iter().copied()
	}
}
