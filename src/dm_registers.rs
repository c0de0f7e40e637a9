/* Debug module registers, as seen over the DMI

	0x04 - 0x0B: data0 - data7    R/W  exchange buffer words
	0x10:        dmcontrol        R/W
	0x16:        abstractcs       R/W
	0x17:        command          W    abstract command
	0x18:        accesscs         R    progsize
	0x20 - 0x27: progbuf0 - 7     R/W  program buffer words
*/

use bitfield::bitfield;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::dm_rom::{DATACOUNT, PROGSIZE};

pub const DMI_DATA0: u32 = 0x04;
pub const DMI_DMCONTROL: u32 = 0x10;
pub const DMI_ABSTRACTCS: u32 = 0x16;
pub const DMI_COMMAND: u32 = 0x17;
pub const DMI_ACCESSCS: u32 = 0x18;
pub const DMI_PROGBUF0: u32 = 0x20;

pub const DM_VERSION: u32 = 1;

/// First GPR in the abstract register number space; x0 - x31 follow.
pub const REGNO_GPR_BASE: u32 = 0x1000;
pub const REGNO_GPR_COUNT: u32 = 32;

/// 32-bit register access, the only width RV32 harts support.
pub const ACCESS_SIZE_32: u32 = 2;

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HartStatus {
	Halted      = 0,
	Running     = 1,
	Unavailable = 2,
	NotExist    = 3,
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
	NoAuth    = 0,
	Password  = 1,
	Challenge = 2,
}

#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdErr {
	None       = 0,
	Busy       = 1,
	NotSup     = 2,
	Exception  = 3,
	HaltResume = 4,
	Other      = 7,
}

bitfield! {
	#[derive(Clone, Copy)]
	pub struct DmcontrolReg(u32);
	impl Debug;
	
	pub haltreq, set_haltreq: 31;
	pub resumereq, set_resumereq: 30;
	pub reset, set_reset: 29;
	pub dmactive, set_dmactive: 28;
	pub hartstatus, set_hartstatus: 27, 26;
	pub hartsel, set_hartsel: 25, 16;
	pub authenticated, set_authenticated: 7;
	pub authbusy, set_authbusy: 6;
	pub authtype, set_authtype: 5, 4;
	pub version, set_version: 1, 0;
}

bitfield! {
	#[derive(Clone, Copy)]
	pub struct AbstractcsReg(u32);
	impl Debug;
	
	pub autoexec_bits, set_autoexec_bits: 23, 16;
	pub busy, set_busy: 12;
	pub cmderr, set_cmderr: 10, 8;
	pub datacount, set_datacount: 4, 0;
}

bitfield! {
	#[derive(Clone, Copy)]
	pub struct CommandReg(u32);
	impl Debug;
	
	pub cmdtype, set_cmdtype: 31, 24;
	pub size, set_size: 22, 20;
	pub postexec, set_postexec: 18;
	pub transfer, set_transfer: 17;
	pub write, set_write: 16;
	pub regno, set_regno: 15, 0;
}

bitfield! {
	#[derive(Clone, Copy)]
	pub struct AccesscsReg(u32);
	impl Debug;
	
	pub progsize, set_progsize: 31, 24;
}

/// Decoded `dmcontrol` state.
///
/// `resumereq` and `reset` are requests: they act on the write that sets
/// them and are not held afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmControl {
	pub haltreq: bool,
	pub resumereq: bool,
	pub reset: bool,
	pub dmactive: bool,
	pub hartstatus: HartStatus,
	pub hartsel: u32,
	pub authenticated: bool,
	pub authbusy: bool,
	pub authtype: AuthType,
	pub version: u32,
}

impl DmControl {
	pub fn power_on(authtype: AuthType) -> Self {
		DmControl {
			haltreq: false,
			resumereq: false,
			reset: false,
			dmactive: false,
			hartstatus: HartStatus::Running,
			hartsel: 0,
			authenticated: authtype == AuthType::NoAuth,
			authbusy: false,
			authtype: authtype,
			version: DM_VERSION,
		}
	}
	
	pub fn to_bits(&self) -> u32 {
		let mut reg = DmcontrolReg(0);
		reg.set_haltreq(self.haltreq);
		reg.set_resumereq(self.resumereq);
		reg.set_reset(self.reset);
		reg.set_dmactive(self.dmactive);
		reg.set_hartstatus(self.hartstatus as u32);
		reg.set_hartsel(self.hartsel);
		reg.set_authenticated(self.authenticated);
		reg.set_authbusy(self.authbusy);
		reg.set_authtype(self.authtype as u32);
		reg.set_version(self.version);
		reg.0
	}
}

impl From<u32> for DmControl {
	fn from(value: u32) -> Self {
		let reg = DmcontrolReg(value);
		DmControl {
			haltreq: reg.haltreq(),
			resumereq: reg.resumereq(),
			reset: reg.reset(),
			dmactive: reg.dmactive(),
			hartstatus: HartStatus::from_u32(reg.hartstatus()).unwrap_or(HartStatus::NotExist),
			hartsel: reg.hartsel(),
			authenticated: reg.authenticated(),
			authbusy: reg.authbusy(),
			authtype: AuthType::from_u32(reg.authtype()).unwrap_or(AuthType::NoAuth),
			version: reg.version(),
		}
	}
}

/// Decoded `abstractcs` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbstractCs {
	pub autoexec: [bool; DATACOUNT],
	pub cmderr: CmdErr,
	pub busy: bool,
	pub datacount: u32,
}

impl AbstractCs {
	pub fn power_on() -> Self {
		AbstractCs {
			autoexec: [false; DATACOUNT],
			cmderr: CmdErr::None,
			busy: false,
			datacount: DATACOUNT as u32,
		}
	}
	
	pub fn to_bits(&self) -> u32 {
		let mut reg = AbstractcsReg(0);
		reg.set_autoexec_bits(autoexec_to_bits(&self.autoexec));
		reg.set_busy(self.busy);
		reg.set_cmderr(self.cmderr as u32);
		reg.set_datacount(self.datacount);
		reg.0
	}
}

impl From<u32> for AbstractCs {
	fn from(value: u32) -> Self {
		let reg = AbstractcsReg(value);
		AbstractCs {
			autoexec: autoexec_from_bits(reg.autoexec_bits()),
			cmderr: CmdErr::from_u32(reg.cmderr()).unwrap_or(CmdErr::Other),
			busy: reg.busy(),
			datacount: reg.datacount(),
		}
	}
}

pub fn autoexec_from_bits(bits: u32) -> [bool; DATACOUNT] {
	let mut autoexec = [false; DATACOUNT];
	for (n, flag) in autoexec.iter_mut().enumerate() {
		*flag = (bits >> n) & 1 != 0;
	}
	autoexec
}

pub fn autoexec_to_bits(autoexec: &[bool; DATACOUNT]) -> u32 {
	autoexec.iter().enumerate().fold(0, |bits, (n, flag)| bits | ((*flag as u32) << n))
}

pub fn accesscs_value() -> u32 {
	let mut reg = AccesscsReg(0);
	reg.set_progsize(PROGSIZE as u32);
	reg.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRegister {
	pub size: u32,
	pub postexec: bool,
	pub transfer: bool,
	pub write: bool,
	pub regno: u32,
}

impl AccessRegister {
	/// GPR number if `regno` names one.
	pub fn gpr(&self) -> Option<u32> {
		if self.regno >= REGNO_GPR_BASE && self.regno < REGNO_GPR_BASE + REGNO_GPR_COUNT {
			Some(self.regno - REGNO_GPR_BASE)
		} else {
			None
		}
	}
	
	pub fn to_bits(&self) -> u32 {
		let mut reg = CommandReg(0);
		reg.set_cmdtype(0);
		reg.set_size(self.size);
		reg.set_postexec(self.postexec);
		reg.set_transfer(self.transfer);
		reg.set_write(self.write);
		reg.set_regno(self.regno);
		reg.0
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractCommand {
	AccessRegister(AccessRegister),
	QuickAccess,
	Unsupported(u32),
}

impl AbstractCommand {
	pub const QUICK_ACCESS: u32 = 1 << 24;
	
	pub fn decode(value: u32) -> Self {
		let reg = CommandReg(value);
		match reg.cmdtype() {
			0 => AbstractCommand::AccessRegister(AccessRegister {
				size: reg.size(),
				postexec: reg.postexec(),
				transfer: reg.transfer(),
				write: reg.write(),
				regno: reg.regno(),
			}),
			1 => AbstractCommand::QuickAccess,
			cmdtype => AbstractCommand::Unsupported(cmdtype),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	
	#[test]
	fn dmcontrol_field_positions() {
		let mut control = DmControl::power_on(AuthType::NoAuth);
		control.dmactive = true;
		control.hartsel = 0x3FF;
		control.hartstatus = HartStatus::NotExist;
		assert_eq!(control.to_bits(), 0x1000_0000 | 0x03FF_0000 | 0x0C00_0000 | 0x80 | 1);
		assert_eq!(DmControl::from(control.to_bits()), control);
	}
	
	#[test]
	fn power_on_authentication_follows_authtype() {
		assert!(DmControl::power_on(AuthType::NoAuth).authenticated);
		let control = DmControl::power_on(AuthType::Password);
		assert!(!control.authenticated);
		assert_eq!(DmcontrolReg(control.to_bits()).authtype(), 1);
	}
	
	#[test]
	fn abstractcs_reports_datacount_and_autoexec() {
		let mut abstractcs = AbstractCs::power_on();
		abstractcs.autoexec[0] = true;
		abstractcs.autoexec[7] = true;
		abstractcs.cmderr = CmdErr::HaltResume;
		let bits = abstractcs.to_bits();
		assert_eq!(bits, (0x81 << 16) | (4 << 8) | 8);
		assert_eq!(AbstractCs::from(bits), abstractcs);
	}
	
	#[test]
	fn reserved_cmderr_decodes_as_other() {
		assert_eq!(AbstractCs::from(5 << 8).cmderr, CmdErr::Other);
	}
	
	#[test]
	fn decode_register_access() {
		let access = AccessRegister { size: ACCESS_SIZE_32, postexec: true, transfer: true, write: false, regno: 0x1008 };
		match AbstractCommand::decode(access.to_bits()) {
			AbstractCommand::AccessRegister(decoded) => {
				assert_eq!(decoded, access);
				assert_eq!(decoded.gpr(), Some(8));
			},
			other => panic!("unexpected command {:?}", other),
		}
		assert_eq!(AbstractCommand::decode(AbstractCommand::QUICK_ACCESS), AbstractCommand::QuickAccess);
		assert_eq!(AbstractCommand::decode(0x0500_0000), AbstractCommand::Unsupported(5));
	}
	
	#[test]
	fn csr_regno_is_not_a_gpr() {
		let access = AccessRegister { size: ACCESS_SIZE_32, postexec: false, transfer: true, write: false, regno: 0x7B1 };
		assert_eq!(access.gpr(), None);
	}
}
