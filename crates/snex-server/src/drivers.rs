//! Driver wiring. Registration happens exactly once at startup; the sealed
//! registry is immutable for the life of the process.

use std::sync::Arc;

use snex_core::{DriverRegistry, Result};

pub fn register_all(registry: &DriverRegistry) -> Result<()> {
    registry.register(Arc::new(snex_fxpakpro::FxPakProDriver::new()))?;
    registry.register(Arc::new(snex_luabridge::LuaBridgeDriver::new()))?;
    registry.register(Arc::new(snex_mock::MockDriver::new()))?;
    registry.register(Arc::new(snex_retroarch::RetroArchDriver::new()))?;
    registry.seal();
    Ok(())
}
