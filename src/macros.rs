//! Kernel halt macro

/// Logs the message at error level and halts.
///
/// Used for conditions the kernel cannot continue from: buffer pool
/// exhaustion and broken caller contracts. Release builds abort on panic.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::__log::error!("{}", msg);
        panic!("{}", msg)
    }};
}
