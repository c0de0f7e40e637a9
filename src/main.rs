use std::env::args;
use std::path::Path;
use std::process;

use rv_debug_module::{Debugger, DebugModuleConfig, DmError, Sim};
use rv_debug_module::sim_bus::RAM_START;
use rv_vsys::{opcode, CSR_DPC};

const DEFAULT_HART_COUNT: u32 = 4;

/// Each hart counts up in t0 forever.
const COUNTER_PROGRAM: [u32; 2] = [
	opcode::addi(5, 5, 1),
	opcode::jal(0, -4),
];

fn load_config(path: Option<&String>) -> Result<DebugModuleConfig, DmError> {
	match path {
		Some(path) => DebugModuleConfig::from_file(Path::new(path)),
		None => Ok(DebugModuleConfig::default()),
	}
}

fn session(hart_count: u32, config: DebugModuleConfig) -> Result<(), DmError> {
	let mut sim = Sim::new(hart_count, config)?;
	sim.load_program(RAM_START, &COUNTER_PROGRAM);
	sim.reset(RAM_START);
	sim.run(100);

	let target = hart_count - 1;
	let mut debugger = Debugger::attach(&mut sim);
	debugger.halt(target)?;
	let t0 = debugger.read_gpr(target, 5)?;
	let dpc = debugger.read_csr(target, CSR_DPC)?;
	log::info!("hart {} halted at {:#010x} with t0 = {}", target, dpc, t0);

	debugger.write_gpr(target, 5, 1000)?;
	debugger.resume(target)?;
	debugger.sim().run(10);
	let t0 = debugger.sim().hart(target).map_or(0, |hart| hart.get_gpr(5));
	log::info!("hart {} resumed, t0 = {}", target, t0);

	debugger.quick_access(0, &[opcode::addi(5, 0, 0)])?;
	log::info!("hart 0 t0 reset by quick access, status {:?}", debugger.hart_status(0));
	Ok(())
}

fn main() {
	env_logger::init();
	let args: Vec<String> = args().collect();
	let hart_count = match args.get(1).map(|arg| arg.parse::<u32>()) {
		Some(Ok(count)) => count,
		Some(Err(error)) => {
			log::error!("invalid hart count {:?}: {}", args[1], error);
			process::exit(2);
		},
		None => DEFAULT_HART_COUNT,
	};
	let result = load_config(args.get(2)).and_then(|config| session(hart_count, config));
	if let Err(error) = result {
		log::error!("{}", error);
		process::exit(1);
	}
}
