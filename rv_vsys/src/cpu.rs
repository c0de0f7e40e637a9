use crate::{MemIO, MemReadResult, MemWriteResult, Opcode, Op, OpImmFunct3, StoreFunct3, LoadFunct3, OpFunct3Funct7, BranchFunct3, SystemFunct3, SystemIntImm, HartSignals, HartRunState};

const REG_NAMES: [&str; 32] = [
	"zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2",
	"s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
	"a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
	"s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

pub const CSR_MTVEC: u32 = 0x305;
pub const CSR_MEPC: u32 = 0x341;
pub const CSR_MCAUSE: u32 = 0x342;
pub const CSR_MTVAL: u32 = 0x343;
pub const CSR_DCSR: u32 = 0x7B0;
pub const CSR_DPC: u32 = 0x7B1;
pub const CSR_DSCRATCH0: u32 = 0x7B2;
pub const CSR_MHARTID: u32 = 0xF14;

// xdebugver = 4, prv = M
const DCSR_VALUE: u32 = 0x4000_0003;

#[derive(Clone, Copy, Debug)]
enum Exception {
	InstructionAccessFault(u32),
	IllegalInstruction{op: u32, addr: u32},
	Breakpoint(u32),
	LoadAddressMisaligned{instr_addr: u32, load_addr: u32},
	LoadAccessFault{instr_addr: u32, load_addr: u32},
	StoreAddressMisaligned{instr_addr: u32, store_addr: u32},
	StoreAccessFault{instr_addr: u32, store_addr: u32},
	ECall(u32),
}

struct TrapCSRs {
	mtvec: u32,
	mepc: u32,
	mcause: u32,
	mtval: u32,
}

impl TrapCSRs {
	pub fn new() -> Self {
		Self {
			mtvec: 0,
			mepc: 0,
			mcause: 0,
			mtval: 0,
		}
	}
	
	pub fn reset(&mut self) {
		*self = Self::new();
	}
}

/// Debug ROM addresses a hart vectors to. Each hart owns one word in the
/// entry and exception regions, at `base + 4 * hart_id`.
#[derive(Debug, Clone, Copy)]
pub struct DebugVectors {
	pub rom_entry: u32,
	pub rom_exception: u32,
}

/// A minimal RV32I hart with a debug mode.
///
/// Enough of the base ISA to run debug ROM and program buffer code and small
/// test programs. Halt and reset requests are polled from `HartSignals` at
/// the start of each step.
pub struct Cpu <MIO: MemIO> {
	xr: [u32; 31],
	pc: u32,
	dpc: u32,
	dscratch: u32,
	debug_mode: bool,
	pub mio: MIO,
	hart_id: u32,
	signals: HartSignals,
	vectors: DebugVectors,
	reset_pc: u32,
	trap_csrs: TrapCSRs,
}

impl <MIO: MemIO> Cpu<MIO> {
	pub fn new(mio: MIO, signals: HartSignals, vectors: DebugVectors, id: u32) -> Cpu<MIO> {
		Cpu {
			xr: [0; 31],
			pc: 0,
			dpc: 0,
			dscratch: 0,
			debug_mode: false,
			mio: mio,
			hart_id: id,
			signals: signals,
			vectors: vectors,
			reset_pc: 0,
			trap_csrs: TrapCSRs::new(),
		}
	}

	pub fn reset(&mut self, pc: u32) {
		self.xr = [0; 31];
		self.pc = pc;
		self.reset_pc = pc;
		self.dpc = 0;
		self.dscratch = 0;
		self.debug_mode = false;
		self.trap_csrs.reset();
		self.signals.set_state(self.hart_id, HartRunState::Running);
	}
	
	pub fn hart_id(&self) -> u32 {
		self.hart_id
	}
	
	pub fn pc(&self) -> u32 {
		self.pc
	}
	
	pub fn in_debug_mode(&self) -> bool {
		self.debug_mode
	}
	
	pub fn get_gpr(&self, reg: u32) -> u32 {
		match reg {
			0 => 0,
			1 ..= 31 => self.xr[(reg - 1) as usize],
			_ => 0
		}
	}
	
	pub fn set_gpr(&mut self, reg: u32, value: u32) {
		if let 1 ..= 31 = reg {
			self.xr[(reg - 1) as usize] = value;
		}
	}
	
	fn entry_vector(&self) -> u32 {
		self.vectors.rom_entry + 4 * self.hart_id
	}
	
	fn exception_vector(&self) -> u32 {
		self.vectors.rom_exception + 4 * self.hart_id
	}
	
	fn enter_debug_mode(&mut self, dpc: u32) {
		log::debug!("hart {} entering debug mode, dpc = {:#010x}", self.hart_id, dpc);
		self.dpc = dpc;
		self.debug_mode = true;
		self.pc = self.entry_vector();
		self.signals.set_state(self.hart_id, HartRunState::Halted);
	}
	
	fn leave_debug_mode(&mut self) {
		log::debug!("hart {} leaving debug mode, resuming at {:#010x}", self.hart_id, self.dpc);
		self.pc = self.dpc;
		self.debug_mode = false;
		self.signals.set_state(self.hart_id, HartRunState::Running);
	}
	
	fn raise(&mut self, exception: Exception) {
		if self.debug_mode {
			log::debug!("hart {} faulted in debug mode: {:?}", self.hart_id, exception);
			self.pc = self.exception_vector();
			return;
		}
		let (cause, tval, pc) = match exception {
			Exception::InstructionAccessFault(pc) => (1, pc, pc),
			Exception::IllegalInstruction{op, addr} => (2, op, addr),
			Exception::Breakpoint(pc) => {
				self.enter_debug_mode(pc);
				return;
			},
			Exception::LoadAddressMisaligned{instr_addr, load_addr} => (4, load_addr, instr_addr),
			Exception::LoadAccessFault{instr_addr, load_addr} => (5, load_addr, instr_addr),
			Exception::StoreAddressMisaligned{instr_addr, store_addr} => (6, store_addr, instr_addr),
			Exception::StoreAccessFault{instr_addr, store_addr} => (7, store_addr, instr_addr),
			Exception::ECall(pc) => (11, 0, pc),
		};
		self.trap_csrs.mepc = pc;
		self.trap_csrs.mcause = cause;
		self.trap_csrs.mtval = tval;
		self.pc = self.trap_csrs.mtvec & !3u32;
	}
	
	/// Runs one instruction. Returns false if the instruction trapped.
	pub fn step(&mut self) -> bool {
		if self.signals.take_reset(self.hart_id) {
			let pc = self.reset_pc;
			log::debug!("hart {} reset to {:#010x}", self.hart_id, pc);
			self.reset(pc);
		}
		if ! self.debug_mode && self.signals.halt_requested(self.hart_id) {
			let pc = self.pc;
			self.enter_debug_mode(pc);
		}
		let pc = self.pc;
		let opcode_value = match self.mio.read_32_ifetch(pc) {
			MemReadResult::Ok(value) => value,
			_ => {
				self.raise(Exception::InstructionAccessFault(pc));
				return false;
			}
		};
		if cfg!(feature = "cpu_debug") { log::trace!("hart {} step @{:#010x}: {:#010x}", self.hart_id, pc, opcode_value); }
		match self.execute(Opcode::new(opcode_value)) {
			Ok(()) => true,
			Err(exception) => {
				self.raise(exception);
				false
			}
		}
	}
	
	fn execute(&mut self, opcode: Opcode) -> Result<(), Exception> {
		let pc = self.pc;
		let illegal = Exception::IllegalInstruction{op: opcode.value, addr: pc};
		match opcode.op().ok_or(illegal)? {
			Op::Lui => {
				self.set_gpr(opcode.rd(), opcode.u_imm() << 12);
				self.pc = pc.wrapping_add(4);
			},
			Op::Auipc => {
				self.set_gpr(opcode.rd(), pc.wrapping_add(opcode.u_imm() << 12));
				self.pc = pc.wrapping_add(4);
			},
			Op::Jal => {
				self.set_gpr(opcode.rd(), pc.wrapping_add(4));
				self.pc = pc.wrapping_add(opcode.j_imm_signed() as u32);
			},
			Op::Jalr => {
				let target = self.get_gpr(opcode.rs1()).wrapping_add(opcode.i_imm_signed() as u32) & !1u32;
				self.set_gpr(opcode.rd(), pc.wrapping_add(4));
				self.pc = target;
			},
			Op::Branch => {
				let a = self.get_gpr(opcode.rs1());
				let b = self.get_gpr(opcode.rs2());
				let taken = match opcode.funct3_branch().ok_or(illegal)? {
					BranchFunct3::Eq => a == b,
					BranchFunct3::NEq => a != b,
					BranchFunct3::Lt => (a as i32) < (b as i32),
					BranchFunct3::GEq => (a as i32) >= (b as i32),
					BranchFunct3::LtU => a < b,
					BranchFunct3::GEqU => a >= b,
				};
				self.pc = if taken { pc.wrapping_add(opcode.b_imm_signed() as u32) } else { pc.wrapping_add(4) };
			},
			Op::OpImm => {
				let src = self.get_gpr(opcode.rs1());
				let imm = opcode.i_imm_signed();
				let value = match opcode.funct3_op_imm().ok_or(illegal)? {
					OpImmFunct3::AddI => src.wrapping_add(imm as u32),
					OpImmFunct3::SltI => ((src as i32) < imm) as u32,
					OpImmFunct3::SltIU => (src < imm as u32) as u32,
					OpImmFunct3::XorI => src ^ imm as u32,
					OpImmFunct3::OrI => src | imm as u32,
					OpImmFunct3::AndI => src & imm as u32,
					OpImmFunct3::SllI => src << opcode.shamt(),
					OpImmFunct3::SrxI => if opcode.srxi_is_arithmetic() {
						((src as i32) >> opcode.shamt()) as u32
					} else {
						src >> opcode.shamt()
					},
				};
				self.set_gpr(opcode.rd(), value);
				self.pc = pc.wrapping_add(4);
			},
			Op::Op => {
				let a = self.get_gpr(opcode.rs1());
				let b = self.get_gpr(opcode.rs2());
				let value = match opcode.funct3funct7_op().ok_or(illegal)? {
					OpFunct3Funct7::Add => a.wrapping_add(b),
					OpFunct3Funct7::Sub => a.wrapping_sub(b),
					OpFunct3Funct7::Sll => a << (b & 0x1F),
					OpFunct3Funct7::Slt => ((a as i32) < (b as i32)) as u32,
					OpFunct3Funct7::SltU => (a < b) as u32,
					OpFunct3Funct7::Xor => a ^ b,
					OpFunct3Funct7::Srl => a >> (b & 0x1F),
					OpFunct3Funct7::Sra => ((a as i32) >> (b & 0x1F)) as u32,
					OpFunct3Funct7::Or => a | b,
					OpFunct3Funct7::And => a & b,
				};
				self.set_gpr(opcode.rd(), value);
				self.pc = pc.wrapping_add(4);
			},
			Op::Load => {
				let addr = self.get_gpr(opcode.rs1()).wrapping_add(opcode.i_imm_signed() as u32);
				match opcode.funct3_load().ok_or(illegal)? {
					LoadFunct3::Word => {},
					_ => return Err(illegal),
				}
				if addr & 3 != 0 {
					return Err(Exception::LoadAddressMisaligned{instr_addr: pc, load_addr: addr});
				}
				let value = match self.mio.read_32(addr) {
					MemReadResult::Ok(value) => value,
					_ => return Err(Exception::LoadAccessFault{instr_addr: pc, load_addr: addr}),
				};
				if cfg!(feature = "cpu_debug") { log::trace!("lw {} <= [{:#010x}] = {:#010x}", REG_NAMES[opcode.rd() as usize], addr, value); }
				self.set_gpr(opcode.rd(), value);
				self.pc = pc.wrapping_add(4);
			},
			Op::Store => {
				let addr = self.get_gpr(opcode.rs1()).wrapping_add(opcode.s_imm_signed() as u32);
				match opcode.funct3_store().ok_or(illegal)? {
					StoreFunct3::Word => {},
					_ => return Err(illegal),
				}
				if addr & 3 != 0 {
					return Err(Exception::StoreAddressMisaligned{instr_addr: pc, store_addr: addr});
				}
				let value = self.get_gpr(opcode.rs2());
				if cfg!(feature = "cpu_debug") { log::trace!("sw [{:#010x}] <= {} = {:#010x}", addr, REG_NAMES[opcode.rs2() as usize], value); }
				match self.mio.write_32(addr, value) {
					MemWriteResult::Ok => {},
					_ => return Err(Exception::StoreAccessFault{instr_addr: pc, store_addr: addr}),
				}
				self.pc = pc.wrapping_add(4);
			},
			Op::MiscMem => {
				self.pc = pc.wrapping_add(4);
			},
			Op::System => self.execute_system(opcode, illegal)?,
		}
		Ok(())
	}
	
	fn execute_system(&mut self, opcode: Opcode, illegal: Exception) -> Result<(), Exception> {
		let pc = self.pc;
		let funct3 = opcode.funct3_system().ok_or(illegal)?;
		if let SystemFunct3::Int = funct3 {
			match opcode.system_int().ok_or(illegal)? {
				SystemIntImm::ECall => return Err(Exception::ECall(pc)),
				SystemIntImm::EBreak => {
					if self.debug_mode {
						// ebreak inside debug mode parks the hart back on its entry word
						self.pc = self.entry_vector();
						return Ok(());
					}
					return Err(Exception::Breakpoint(pc));
				},
				SystemIntImm::DRet => {
					if ! self.debug_mode {
						return Err(illegal);
					}
					self.leave_debug_mode();
				},
				SystemIntImm::MRet => {
					self.pc = self.trap_csrs.mepc;
				},
				SystemIntImm::WaitForInterrupt => {
					self.pc = pc.wrapping_add(4);
				},
			}
			return Ok(());
		}
		let csr = opcode.i_imm();
		let old = self.read_csr(csr).ok_or(illegal)?;
		let operand = match funct3 {
			SystemFunct3::CsrRWI | SystemFunct3::CsrRSI | SystemFunct3::CsrRCI => opcode.rs1(),
			_ => self.get_gpr(opcode.rs1()),
		};
		let new = match funct3 {
			SystemFunct3::CsrRW | SystemFunct3::CsrRWI => Some(operand),
			SystemFunct3::CsrRS | SystemFunct3::CsrRSI => if opcode.rs1() != 0 { Some(old | operand) } else { None },
			SystemFunct3::CsrRC | SystemFunct3::CsrRCI => if opcode.rs1() != 0 { Some(old & !operand) } else { None },
			SystemFunct3::Int => None,
		};
		if let Some(value) = new {
			if ! self.write_csr(csr, value) {
				return Err(illegal);
			}
		}
		self.set_gpr(opcode.rd(), old);
		self.pc = pc.wrapping_add(4);
		Ok(())
	}
	
	fn read_csr(&self, csr: u32) -> Option<u32> {
		match csr {
			CSR_MTVEC => Some(self.trap_csrs.mtvec),
			CSR_MEPC => Some(self.trap_csrs.mepc),
			CSR_MCAUSE => Some(self.trap_csrs.mcause),
			CSR_MTVAL => Some(self.trap_csrs.mtval),
			CSR_MHARTID => Some(self.hart_id),
			CSR_DCSR if self.debug_mode => Some(DCSR_VALUE),
			CSR_DPC if self.debug_mode => Some(self.dpc),
			CSR_DSCRATCH0 if self.debug_mode => Some(self.dscratch),
			_ => None
		}
	}
	
	fn write_csr(&mut self, csr: u32, value: u32) -> bool {
		match csr {
			CSR_MTVEC => self.trap_csrs.mtvec = value,
			CSR_MEPC => self.trap_csrs.mepc = value & !3u32,
			CSR_MCAUSE => self.trap_csrs.mcause = value,
			CSR_MTVAL => self.trap_csrs.mtval = value,
			CSR_DCSR if self.debug_mode => {},
			CSR_DPC if self.debug_mode => self.dpc = value & !3u32,
			CSR_DSCRATCH0 if self.debug_mode => self.dscratch = value,
			_ => return false
		}
		true
	}
}
