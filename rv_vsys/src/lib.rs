mod mem;
mod cpu;
pub mod opcode;
mod debug;

pub use cpu::{Cpu, DebugVectors, CSR_MTVEC, CSR_MEPC, CSR_MCAUSE, CSR_MTVAL, CSR_DCSR, CSR_DPC, CSR_DSCRATCH0, CSR_MHARTID};
pub use mem::{MemIO, MemReadResult, MemWriteResult};
pub use opcode::{Opcode, Op, OpImmFunct3, StoreFunct3, LoadFunct3, OpFunct3Funct7, BranchFunct3, SystemFunct3, SystemIntImm};
pub use debug::{HartControl, HartRunState, HartSignals};
