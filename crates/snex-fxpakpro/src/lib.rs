#![forbid(unsafe_code)]

//! FX Pak Pro / SD2SNES USB-serial driver (`fxpakpro://<port>`).
//!
//! Devices enumerate as CDC-ACM serial ports with USB VID 0x1209 / PID
//! 0x5A22. Memory access uses the pak's vectored VGET/VPUT commands, eight
//! 255-byte tuples per 512-byte command block, with the data phase in
//! 64-byte frames. Serial I/O is blocking and runs on the runtime's blocking
//! thread pool.

pub mod command;
mod driver;

pub use driver::{FxPakProDevice, FxPakProDriver, DEFAULT_TIMEOUT};
