pub mod client;

pub use client::ForgeClient;
pub use githaul_core;
