//! Logical features served over the dispatch core.

pub mod gre;
pub mod phys_if;

#[cfg(test)]
mod tests;

pub use gre::{Gre, GRE_INTERFACE};
pub use phys_if::{PhysIf, MAX_MTU, PREHEADER_LEN};
