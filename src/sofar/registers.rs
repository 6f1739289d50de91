use tokio_modbus::{Address, Quantity};

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum RegisterKind {
    Holding,
    Input,
}

/// A contiguous run of registers fetched with a single read request.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct RegisterBlock {
    pub kind: RegisterKind,
    pub start: Address,
    pub count: Quantity,
}

impl RegisterBlock {
    pub const fn holding(start: Address, count: Quantity) -> Self {
        Self { kind: RegisterKind::Holding, start, count }
    }

    pub const fn input(start: Address, count: Quantity) -> Self {
        Self { kind: RegisterKind::Input, start, count }
    }
}

pub const RUNNING_STATE: RegisterBlock = RegisterBlock::holding(0x0200, 1);
pub const OPERATIONAL: RegisterBlock = RegisterBlock::holding(0x0206, 52);
pub const BATTERY_CONFIG: RegisterBlock = RegisterBlock::input(0x10B0, 13);

/// Vendor passthrough function used for work mode writes.
pub const WORK_MODE_FUNCTION: u8 = 0x42;

pub const STANDBY: Address = 0x0100;
pub const DISCHARGE: Address = 0x0101;
pub const CHARGE: Address = 0x0102;
pub const AUTO: Address = 0x0103;

/// Value written to the mode registers that take no magnitude.
pub const MODE_ENABLE: u16 = 0x5555;
