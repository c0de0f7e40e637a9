use thiserror::Error;

use crate::dm_registers::CmdErr;

#[derive(Debug, Error)]
pub enum DmError {
	#[error("hart {hart} is outside the configured range of {limit} harts")]
	HartOutOfRange { hart: u32, limit: u32 },
	#[error("invalid debug module configuration: {0}")]
	InvalidConfig(String),
	#[error("could not parse debug module configuration")]
	ConfigParse(#[from] json::Error),
	#[error("could not read debug module configuration")]
	ConfigIo(#[from] std::io::Error),
	#[error("abstract command failed: {0:?}")]
	CommandFailed(CmdErr),
	#[error("timed out waiting for {0}")]
	Timeout(&'static str),
}
