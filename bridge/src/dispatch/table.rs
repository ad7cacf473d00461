/// Per-interface handler table and the callback types stored in it.
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;

use crate::msg::{Feature, InterfaceScope, Message};
use crate::netdev::{HostNetDevice, NetFeatures};

/// Interface numbers `0..MAX_INTERFACES` are valid.
pub const MAX_INTERFACES: usize = 128;
/// First dynamic (runtime-allocated) interface number.
pub const DYNAMIC_BASE: u16 = 64;

/// Scope of an interface number, `None` when out of range.
pub fn interface_scope(interface: u16) -> Option<InterfaceScope> {
    if interface as usize >= MAX_INTERFACES {
        None
    } else if interface >= DYNAMIC_BASE {
        Some(InterfaceScope::Dynamic)
    } else {
        Some(InterfaceScope::Static)
    }
}

/// Opaque caller context, shared with whoever the callback runs on.
pub type AppData = Arc<dyn Any + Send + Sync>;

/// Message completion / event callback.
pub type MsgCallback = Arc<dyn Fn(Option<&AppData>, &Message) + Send + Sync>;

/// Packet receive callback: `(interface, packet)`.
pub type RxCallback = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;

/// Raw packet tap, called ahead of the receive callback.
pub type PacketTap = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;

/// Feature-side handling of inbound messages for one interface.
pub trait MessageHandler: Send + Sync {
    fn feature(&self) -> Feature;

    /// Runs for every valid inbound message, before callback resolution.
    /// Stats-sync types update local counters here.
    fn sync_stats(&self, _interface: u16, _msg: &Message) {}

    /// The feature's single subscriber for notify-class messages on
    /// `interface`.
    fn notify_callback(&self, _interface: u16) -> Option<(MsgCallback, Option<AppData>)> {
        None
    }
}

/// Data-plane side of an entry.
#[derive(Clone)]
pub struct DeviceBinding {
    pub device: Arc<dyn HostNetDevice>,
    pub rx: RxCallback,
    pub features: NetFeatures,
}

#[derive(Clone, Default)]
pub struct HandlerEntry {
    pub handler: Option<Arc<dyn MessageHandler>>,
    pub app_data: Option<AppData>,
    pub device: Option<DeviceBinding>,
    /// Owner displaced by the current binding, reinstated on unbind.
    pub previous: Option<DeviceBinding>,
}

impl HandlerEntry {
    /// True for a slot nobody has touched, or that was fully cleared.
    pub fn is_unbound(&self) -> bool {
        self.handler.is_none()
            && self.app_data.is_none()
            && self.device.is_none()
            && self.previous.is_none()
    }

    pub fn features(&self) -> NetFeatures {
        self.device.as_ref().map(|d| d.features).unwrap_or(NetFeatures::empty())
    }
}

pub(crate) struct HandlerTable {
    entries: Vec<HandlerEntry>,
}

impl HandlerTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_INTERFACES);
        entries.resize_with(MAX_INTERFACES, HandlerEntry::default);
        Self { entries }
    }

    pub fn get(&self, interface: u16) -> Option<&HandlerEntry> {
        self.entries.get(interface as usize)
    }

    pub fn get_mut(&mut self, interface: u16) -> Option<&mut HandlerEntry> {
        self.entries.get_mut(interface as usize)
    }

    pub fn iter_bound(&self) -> impl Iterator<Item = (u16, &HandlerEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_unbound())
            .map(|(i, e)| (i as u16, e))
    }
}
