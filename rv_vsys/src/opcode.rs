#![allow(clippy::unusual_byte_groupings)]
use num_derive::FromPrimitive;
use num_derive::ToPrimitive;
use num_traits::FromPrimitive;

pub struct Opcode {
	pub value: u32
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
	Load         = 0b00_000_11,
	MiscMem      = 0b00_011_11,
	OpImm        = 0b00_100_11,
	Auipc        = 0b00_101_11,
	Store        = 0b01_000_11,
	Op           = 0b01_100_11,
	Lui          = 0b01_101_11,
	Branch       = 0b11_000_11,
	Jalr         = 0b11_001_11,
	Jal          = 0b11_011_11,
	System       = 0b11_100_11,
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpImmFunct3 {
	AddI  = 0b000,
	SllI  = 0b001,
	SltI  = 0b010,
	SltIU = 0b011,
	XorI  = 0b100,
	SrxI  = 0b101,
	OrI   = 0b110,
	AndI  = 0b111,
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFunct3 {
	Byte = 0b000,
	Half = 0b001,
	Word = 0b010,
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFunct3 {
	Byte = 0b000,
	Half = 0b001,
	Word = 0b010,
	ByteUnsigned = 0b100,
	HalfUnsigned = 0b101,
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFunct3Funct7 {
	//       funct7    funct3
	Add    = 0b0000000_000,
	Sub    = 0b0100000_000,
	Sll    = 0b0000000_001,
	Slt    = 0b0000000_010,
	SltU   = 0b0000000_011,
	Xor    = 0b0000000_100,
	Srl    = 0b0000000_101,
	Sra    = 0b0100000_101,
	Or     = 0b0000000_110,
	And    = 0b0000000_111,
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchFunct3 {
	Eq   = 0b000,
	NEq  = 0b001,
	Lt   = 0b100,
	GEq  = 0b101,
	LtU  = 0b110,
	GEqU = 0b111,
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemFunct3 {
	Int    = 0b000,
	CsrRW  = 0b001,
	CsrRS  = 0b010,
	CsrRC  = 0b011,
	CsrRWI = 0b101,
	CsrRSI = 0b110,
	CsrRCI = 0b111,
}

/// funct3 = 0 system instructions, told apart by their immediate.
#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemIntImm {
	ECall            = 0x000,
	EBreak           = 0x001,
	WaitForInterrupt = 0x105,
	MRet             = 0x302,
	DRet             = 0x7b2,
}

fn bitfield(x: u32, count: u32, src_bit: u32, dst_bit: u32) -> u32 {
	let mask = (1u32 << count).wrapping_sub(1);
	let y = x >> src_bit;
	(y & mask) << dst_bit
}

fn sign_extend(value: u32, bits: u32) -> i32 {
	let shift = 32 - bits;
	((value << shift) as i32) >> shift
}

impl Opcode {
	pub fn new(value: u32) -> Self {
		Opcode {
			value: value
		}
	}

	pub fn op(&self) -> Option<Op> {
		Op::from_u32(self.value & 0x7F)
	}

	pub fn rd(&self) -> u32 {
		bitfield(self.value, 5, 7, 0)
	}

	pub fn rs1(&self) -> u32 {
		bitfield(self.value, 5, 15, 0)
	}

	pub fn rs2(&self) -> u32 {
		bitfield(self.value, 5, 20, 0)
	}
	
	pub fn shamt(&self) -> u32 {
		bitfield(self.value, 5, 20, 0)
	}

	pub fn funct3(&self) -> u32 {
		bitfield(self.value, 3, 12, 0)
	}

	pub fn funct7(&self) -> u32 {
		bitfield(self.value, 7, 25, 0)
	}
	
	pub fn funct3_7(&self) -> u32 {
		bitfield(self.value, 3, 12, 0) |
		bitfield(self.value, 7, 25, 3)
	}
	
	pub fn srxi_is_arithmetic(&self) -> bool {
		self.value & 0x4000_0000 != 0
	}
	
	pub fn funct3_op_imm(&self) -> Option<OpImmFunct3> {
		OpImmFunct3::from_u32(self.funct3())
	}
	
	pub fn funct3_store(&self) -> Option<StoreFunct3> {
		StoreFunct3::from_u32(self.funct3())
	}
	
	pub fn funct3_load(&self) -> Option<LoadFunct3> {
		LoadFunct3::from_u32(self.funct3())
	}
	
	pub fn funct3funct7_op(&self) -> Option<OpFunct3Funct7> {
		OpFunct3Funct7::from_u32(self.funct3_7())
	}
	
	pub fn funct3_branch(&self) -> Option<BranchFunct3> {
		BranchFunct3::from_u32(self.funct3())
	}
	
	pub fn funct3_system(&self) -> Option<SystemFunct3> {
		SystemFunct3::from_u32(self.funct3())
	}
	
	pub fn system_int(&self) -> Option<SystemIntImm> {
		SystemIntImm::from_u32(self.i_imm())
	}

	pub fn i_imm(&self) -> u32 {
		bitfield(self.value, 12, 20, 0)
	}

	pub fn i_imm_signed(&self) -> i32 {
		sign_extend(self.i_imm(), 12)
	}

	pub fn s_imm_signed(&self) -> i32 {
		let val_raw = 
			bitfield(self.value, 5, 7, 0) |
			bitfield(self.value, 7, 25, 5);
		sign_extend(val_raw, 12)
	}

	pub fn u_imm(&self) -> u32 {
		bitfield(self.value, 20, 12, 0)
	}
	
	pub fn j_imm(&self) -> u32 {
		bitfield(self.value, 10, 21, 1) |
		bitfield(self.value, 1, 20, 11) |
		bitfield(self.value, 8, 12, 12) |
		bitfield(self.value, 1, 31, 20)
	}

	pub fn j_imm_signed(&self) -> i32 {
		sign_extend(self.j_imm(), 21)
	}
	
	pub fn b_imm(&self) -> u32 {
		bitfield(self.value, 1, 7, 11) |
		bitfield(self.value, 4, 8, 1) |
		bitfield(self.value, 6, 25, 5) |
		bitfield(self.value, 1, 31, 12)
	}
	
	pub fn b_imm_signed(&self) -> i32 {
		sign_extend(self.b_imm(), 13)
	}
}

// Encoders. Fields wider than their slot are truncated; callers pass
// register numbers < 32 and immediates that fit.

pub const EBREAK: u32 = ((SystemIntImm::EBreak as u32) << 20) | Op::System as u32;
pub const DRET: u32 = ((SystemIntImm::DRet as u32) << 20) | Op::System as u32;
pub const NOP: u32 = Op::OpImm as u32;

const fn i_type(op: Op, rd: u32, funct3: u32, rs1: u32, imm: i32) -> u32 {
	((imm as u32 & 0xFFF) << 20) |
	((rs1 & 0x1F) << 15) |
	((funct3 & 0x07) << 12) |
	((rd & 0x1F) << 7) |
	op as u32
}

const fn s_type(op: Op, funct3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
	let imm = imm as u32;
	(((imm >> 5) & 0x7F) << 25) |
	((rs2 & 0x1F) << 20) |
	((rs1 & 0x1F) << 15) |
	((funct3 & 0x07) << 12) |
	((imm & 0x1F) << 7) |
	op as u32
}

pub const fn lw(rd: u32, rs1: u32, offset: i32) -> u32 {
	i_type(Op::Load, rd, LoadFunct3::Word as u32, rs1, offset)
}

pub const fn sw(rs2: u32, rs1: u32, offset: i32) -> u32 {
	s_type(Op::Store, StoreFunct3::Word as u32, rs1, rs2, offset)
}

pub const fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
	i_type(Op::OpImm, rd, OpImmFunct3::AddI as u32, rs1, imm)
}

/// `jal rd, offset`, offset relative to the jal itself.
pub const fn jal(rd: u32, offset: i32) -> u32 {
	let imm = offset as u32;
	(((imm >> 20) & 0x1) << 31) |
	(((imm >> 1) & 0x3FF) << 21) |
	(((imm >> 11) & 0x1) << 20) |
	(((imm >> 12) & 0xFF) << 12) |
	((rd & 0x1F) << 7) |
	Op::Jal as u32
}

pub const fn branch(funct3: BranchFunct3, rs1: u32, rs2: u32, offset: i32) -> u32 {
	let imm = offset as u32;
	(((imm >> 12) & 0x1) << 31) |
	(((imm >> 5) & 0x3F) << 25) |
	((rs2 & 0x1F) << 20) |
	((rs1 & 0x1F) << 15) |
	((funct3 as u32) << 12) |
	(((imm >> 1) & 0xF) << 8) |
	(((imm >> 11) & 0x1) << 7) |
	Op::Branch as u32
}

pub const fn csrrw(rd: u32, rs1: u32, csr: u32) -> u32 {
	i_type(Op::System, rd, SystemFunct3::CsrRW as u32, rs1, csr as i32)
}

pub const fn csrrs(rd: u32, rs1: u32, csr: u32) -> u32 {
	i_type(Op::System, rd, SystemFunct3::CsrRS as u32, rs1, csr as i32)
}

pub const fn csrr(rd: u32, csr: u32) -> u32 {
	csrrs(rd, 0, csr)
}

pub const fn csrw(csr: u32, rs1: u32) -> u32 {
	csrrw(0, rs1, csr)
}
