//! Logging shims: forward to `defmt` when the feature is enabled, vanish otherwise.

macro_rules! info {
    ( $($arg:tt)+ ) => (
        #[cfg(feature = "defmt")]
        defmt::info!($($arg)+);
    );
}

macro_rules! debug {
    ( $($arg:tt)+ ) => (
        #[cfg(feature = "defmt")]
        defmt::debug!($($arg)+);
    );
}

macro_rules! trace {
    ( $($arg:tt)+ ) => (
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)+);
    );
}

macro_rules! warn {
    ( $($arg:tt)+ ) => (
        #[cfg(feature = "defmt")]
        defmt::warn!($($arg)+);
    );
}
