//! # Logging Shim
//!
//! Level macros used throughout the crate. Depending on the enabled feature they
//! forward to `defmt`, `log`, or `esp-println`. With none of them enabled the
//! macros expand to nothing but still borrow their arguments, so builds stay
//! free of unused-variable warnings.
#![allow(unused_macros)]

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("You may not enable both `defmt` and `log` features.");

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::trace!($s $(, $x)*);
            #[cfg(all(feature = "esp32-log", not(any(feature = "defmt", feature = "log"))))]
            ::esp_println::println!(concat!("TRACE ", $s) $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::debug!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::debug!($s $(, $x)*);
            #[cfg(all(feature = "esp32-log", not(any(feature = "defmt", feature = "log"))))]
            ::esp_println::println!(concat!("DEBUG ", $s) $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::info!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::info!($s $(, $x)*);
            #[cfg(all(feature = "esp32-log", not(any(feature = "defmt", feature = "log"))))]
            ::esp_println::println!(concat!("INFO ", $s) $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::warn!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::warn!($s $(, $x)*);
            #[cfg(all(feature = "esp32-log", not(any(feature = "defmt", feature = "log"))))]
            ::esp_println::println!(concat!("WARN ", $s) $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::error!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::error!($s $(, $x)*);
            #[cfg(all(feature = "esp32-log", not(any(feature = "defmt", feature = "log"))))]
            ::esp_println::println!(concat!("ERROR ", $s) $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

/// Wraps a `Debug` value so it can be logged through `defmt` as well.
#[cfg(feature = "defmt")]
pub(crate) use defmt::Debug2Format;

#[cfg(not(feature = "defmt"))]
pub(crate) struct Debug2Format<'a, T: core::fmt::Debug + ?Sized>(pub &'a T);

#[cfg(not(feature = "defmt"))]
impl<T: core::fmt::Debug + ?Sized> core::fmt::Debug for Debug2Format<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}
