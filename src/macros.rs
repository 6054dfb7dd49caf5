// src/macros.rs

//
// Crate-internal log macros.
//
// With `logging` (default) every level goes to `tracing`, so the embedding
// service's subscriber decides what is shown. Without it, errors still reach
// stderr; the other levels type-check their arguments but never run.
//

#![allow(unused_macros)]

#[cfg(not(feature = "logging"))]
macro_rules! log_discard {
    ($($arg:tt)*) => {{
        if false {
            let _ = format_args!($($arg)*);
        }
    }};
}

// --- error

#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {
        eprintln!("[topic-rpc] ERROR {}", format_args!($($arg)*))
    };
}

// --- warn / info / debug

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::macros::log_discard!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::macros::log_discard!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::macros::log_discard!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
pub(crate) use log_discard;

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
