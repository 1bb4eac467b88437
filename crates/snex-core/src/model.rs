use snex_mapping::AddressSpace;

use crate::uri::DeviceUri;

/// Operations a device may support. Drivers advertise a [`CapabilitySet`];
/// invoking an unsupported operation yields `CapabilityUnavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Capability {
    ReadMemory = 1 << 0,
    WriteMemory = 1 << 1,
    ResetSystem = 1 << 2,
    PauseToggle = 1 << 3,
    ExecuteAsm = 1 << 4,
    BootRom = 1 << 5,
    ReadDir = 1 << 6,
    PutFile = 1 << 7,
    GetFile = 1 << 8,
    BootFile = 1 << 9,
    NwaCommand = 1 << 10,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::ReadMemory,
        Capability::WriteMemory,
        Capability::ResetSystem,
        Capability::PauseToggle,
        Capability::ExecuteAsm,
        Capability::BootRom,
        Capability::ReadDir,
        Capability::PutFile,
        Capability::GetFile,
        Capability::BootFile,
        Capability::NwaCommand,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::ReadMemory => "read_memory",
            Capability::WriteMemory => "write_memory",
            Capability::ResetSystem => "reset_system",
            Capability::PauseToggle => "pause_toggle",
            Capability::ExecuteAsm => "execute_asm",
            Capability::BootRom => "boot_rom",
            Capability::ReadDir => "read_dir",
            Capability::PutFile => "put_file",
            Capability::GetFile => "get_file",
            Capability::BootFile => "boot_file",
            Capability::NwaCommand => "nwa_command",
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A small set of [`Capability`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    pub const fn of(caps: &[Capability]) -> CapabilitySet {
        let mut bits = 0u16;
        let mut i = 0;
        while i < caps.len() {
            bits |= caps[i] as u16;
            i += 1;
        }
        CapabilitySet(bits)
    }

    pub fn contains(self, cap: Capability) -> bool {
        self.0 & cap as u16 != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut bits = 0u16;
        for cap in iter {
            bits |= cap as u16;
        }
        CapabilitySet(bits)
    }
}

/// What discovery reports about one device. Descriptors are ephemeral;
/// every `list_devices` call re-enumerates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub uri: DeviceUri,
    pub display_name: String,
    pub kind: &'static str,
    pub capabilities: CapabilitySet,
    /// The address space clients should speak to this device by default.
    pub default_address_space: AddressSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReadRequest {
    pub request_space: AddressSpace,
    pub request_address: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReadResponse {
    pub request_space: AddressSpace,
    pub request_address: u32,
    pub device_space: AddressSpace,
    pub device_address: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWriteRequest {
    pub request_space: AddressSpace,
    pub request_address: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWriteResponse {
    pub request_space: AddressSpace,
    pub request_address: u32,
    pub device_space: AddressSpace,
    pub device_address: u32,
    pub size: u32,
}
