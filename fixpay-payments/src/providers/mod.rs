//! Gateway implementations

#[cfg(feature = "midtrans")]
pub mod midtrans;

#[cfg(feature = "midtrans")]
pub use midtrans::MidtransGateway;
