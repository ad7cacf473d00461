/// One coprocessor instance, from probe to remove.
///
/// Ties the lifecycle context, the transport queue, the dispatch core and the
/// enabled features together, and runs the interrupt top half and the NAPI
/// style bottom half.
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::dispatch::DispatchCore;
use crate::feature::{Gre, PhysIf};
use crate::hal::{
    CommonInit, Context, Doorbell, FeatureSet, InitError, IrqReturn, N2hCause, Platform,
    PlatformConfig,
};
use crate::queue::{BufferAllocator, BufferKind, HeapAllocator, TransportQueue, N2H_RING_SIZE};

pub struct Coprocessor {
    ctx: Arc<Context>,
    transport: Arc<TransportQueue>,
    core: Arc<DispatchCore>,
    gre: Option<Gre>,
    phys_if: Option<PhysIf>,
    tx_unblocked: AtomicU64,
    coredumps: AtomicU64,
}

impl Coprocessor {
    pub fn probe<P: Platform + 'static>(
        platform: Arc<P>,
        common: &CommonInit,
        config: PlatformConfig,
    ) -> Result<Self, InitError> {
        Self::probe_with_allocator(platform, common, config, Box::new(HeapAllocator))
    }

    /// Bring the core up, then register the handlers of every enabled feature.
    pub fn probe_with_allocator<P: Platform + 'static>(
        platform: Arc<P>,
        common: &CommonInit,
        config: PlatformConfig,
        alloc: Box<dyn BufferAllocator>,
    ) -> Result<Self, InitError> {
        let features = config.features;
        let ctx = Arc::new(Context::new(platform.clone(), config));
        ctx.bring_up(common)?;

        let transport = Arc::new(TransportQueue::with_allocator(Arc::clone(&ctx), alloc));
        let core = Arc::new(DispatchCore::new(Arc::clone(&transport), platform));

        let gre = features.contains(FeatureSet::GRE).then(|| Gre::new(Arc::clone(&core)));
        if let Some(gre) = &gre {
            if let Err(e) = gre.register_handler() {
                log::warn!("core{}: gre handler: {}", ctx.id(), e);
                ctx.teardown();
                return Err(InitError::InvalidConfig("gre interface unavailable"));
            }
        }
        let phys_if = features
            .contains(FeatureSet::PHYS_IF)
            .then(|| PhysIf::new(Arc::clone(&core)));

        log::info!("core{}: probed, features {:?}", ctx.id(), features);
        Ok(Self {
            ctx,
            transport,
            core,
            gre,
            phys_if,
            tx_unblocked: AtomicU64::new(0),
            coredumps: AtomicU64::new(0),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn transport(&self) -> &Arc<TransportQueue> {
        &self.transport
    }

    pub fn dispatch(&self) -> &Arc<DispatchCore> {
        &self.core
    }

    pub fn gre(&self) -> Option<&Gre> {
        self.gre.as_ref()
    }

    pub fn phys_if(&self) -> Option<&PhysIf> {
        self.phys_if.as_ref()
    }

    pub fn tx_unblocked_count(&self) -> u64 {
        self.tx_unblocked.load(Ordering::Relaxed)
    }

    pub fn coredump_count(&self) -> u64 {
        self.coredumps.load(Ordering::Relaxed)
    }

    /// Interrupt entry. Masks and schedules; never drains.
    pub fn handle_irq(&self, queue: usize) -> IrqReturn {
        self.ctx.handle_irq(queue)
    }

    /// Bottom half for `queue`: drain up to `budget` buffers in FIFO order.
    ///
    /// Interrupts are re-enabled once the ring is drained below budget or
    /// left empty; otherwise the poll stays scheduled.
    pub fn poll(&self, queue: usize, budget: usize) -> usize {
        let cause = self.ctx.read_cause(queue);
        self.ctx.clear_cause(queue, cause);

        if cause.contains(N2hCause::TX_UNBLOCKED) {
            self.tx_unblocked.fetch_add(1, Ordering::Relaxed);
        }
        if cause.contains(N2hCause::COREDUMP_COMPLETE) {
            self.coredumps.fetch_add(1, Ordering::Relaxed);
            log::error!("core{}: firmware coredump complete", self.ctx.id());
        }

        let was_full = self.transport.n2h_pending(queue) >= N2H_RING_SIZE as usize;
        let mut done = 0;
        while done < budget {
            let Some(buf) = self.transport.dequeue(queue) else {
                break;
            };
            match buf.kind {
                BufferKind::Control => {
                    if let Err(e) = self.core.dispatch_inbound(&buf.data) {
                        log::debug!("core{} q{}: {}", self.ctx.id(), queue, e);
                    }
                }
                BufferKind::Packet => {
                    self.core.on_receive(buf.interface, &buf.data);
                }
                BufferKind::Empty => {
                    log::trace!("core{} q{}: empty buffer returned", self.ctx.id(), queue);
                }
            }
            done += 1;
        }

        if was_full && done > 0 {
            self.ctx.send_doorbell(Doorbell::TxUnblocked);
        }
        // A zero budget still completes once the ring is empty.
        if done < budget || self.transport.n2h_pending(queue) == 0 {
            self.ctx.complete_poll(queue);
        }
        done
    }

    /// Ask the firmware to dump its state.
    pub fn trigger_coredump(&self) {
        log::warn!("core{}: triggering coredump", self.ctx.id());
        self.ctx.send_doorbell(Doorbell::TriggerCoredump);
    }

    /// Interrupts off and IRQs freed first, then ports handed back and
    /// handlers dropped, windows unmapped last.
    pub fn remove(self) {
        self.ctx.quiesce();

        if let Some(phys_if) = &self.phys_if {
            phys_if.unregister_all();
        }
        if let Some(gre) = &self.gre {
            gre.unregister_handler();
        }
        let dropped = self.core.clear_pending();
        if dropped > 0 {
            log::debug!("core{}: {} pending callbacks dropped", self.ctx.id(), dropped);
        }
        self.transport.reset();
        self.ctx.teardown();
    }
}
