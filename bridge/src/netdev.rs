/// Host network-device collaborator.
///
/// The NIC driver that owns a physical port implements [`HostNetDevice`].
/// The bridge only needs to know whether the port is open, to flip its data
/// plane between host and coprocessor, to report carrier changes and to read
/// a statistics snapshot.
use bitflags::bitflags;

bitflags! {
    /// Offload features advertised for a bound interface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NetFeatures: u32 {
        const HIGHDMA  = 1 << 0;
        const HW_CSUM  = 1 << 1;
        const RXCSUM   = 1 << 2;
        const SG       = 1 << 3;
        const FRAGLIST = 1 << 4;
        const TSO      = 1 << 5;
        const TSO6     = 1 << 6;
        const UFO      = 1 << 7;
    }
}

/// Counter names, in [`StatsSnapshot::counters`] order.
pub const STAT_NAMES: [&str; STATS_LEN] = [
    "rx_bytes",
    "rx_packets",
    "rx_errors",
    "rx_overflow_errors",
    "rx_crc_errors",
    "rx_length_errors",
    "rx_no_buffer_errors",
    "rx_dropped",
    "tx_bytes",
    "tx_packets",
    "tx_errors",
    "tx_collisions",
    "tx_underflow_errors",
    "tx_dropped",
    "pmt_interrupts",
    "mmc_interrupts",
];

pub const STATS_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub counters: [u64; STATS_LEN],
}

impl StatsSnapshot {
    pub fn get(&self, name: &str) -> Option<u64> {
        STAT_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.counters[i])
    }

    /// `(name, value)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        STAT_NAMES.iter().copied().zip(self.counters.iter().copied())
    }
}

pub trait HostNetDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Host interface index, used to label statistics records.
    fn ifindex(&self) -> u32;

    /// Whether the host has the port administratively up.
    fn is_open(&self) -> bool;

    /// Hand the port's data plane to the coprocessor.
    fn start_data_plane(&self, interface: u16);

    /// Give the data plane back to the host driver.
    fn restore_data_plane(&self, interface: u16);

    /// Carrier change reported by the coprocessor.
    fn set_carrier(&self, up: bool);

    /// Must not block; called under the proxy lock.
    fn stats(&self) -> StatsSnapshot;
}
