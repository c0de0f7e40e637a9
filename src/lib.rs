pub mod error;
pub mod dm_registers;
pub mod dm_rom;
pub mod dm_exchange;
pub mod dm_config;
pub mod hart_table;
pub mod debug_module;
pub mod sim_bus;
pub mod sim;
pub mod debugger;

pub use debug_module::{ActionKind, DebugModule, PendingAction};
pub use dm_config::DebugModuleConfig;
pub use dm_exchange::ExchangeBuffer;
pub use error::DmError;
pub use sim::Sim;
pub use sim_bus::SimBus;
pub use debugger::Debugger;
