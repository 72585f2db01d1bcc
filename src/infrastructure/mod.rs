//! Infrastructure shared by the memory subsystems

pub mod clock;
pub mod cpu;
pub mod hash;
pub mod logger;
pub mod lwlock;
