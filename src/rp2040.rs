//! RP2040 board support: SIO GPIO port, timer-backed platform and heap.
//!
//! Pin muxing, clocks and the USB stack stay in the C SDK; only the few
//! SDK calls below are needed here.

use core::ptr::{addr_of_mut, read_volatile, write_volatile};

use ide::{IdePort, Platform};
use linked_list_allocator::LockedHeap;

const SIO_BASE: usize = 0xD000_0000;
const SIO_CPUID: usize = 0x00;
const SIO_GPIO_IN: usize = 0x04;
const SIO_GPIO_OUT: usize = 0x10;
const SIO_GPIO_OUT_SET: usize = 0x14;
const SIO_GPIO_OUT_CLR: usize = 0x18;
const SIO_GPIO_OE_SET: usize = 0x24;
const SIO_GPIO_OE_CLR: usize = 0x28;

extern "C" {
    fn time_us_64() -> u64;
    fn busy_wait_us_32(us: u32);
    fn gpio_init_mask(mask: u32);
    fn gpio_set_pulls(gpio: u32, up: bool, down: bool);
    pub fn multicore_launch_core1(entry: extern "C" fn());
}

#[inline(always)]
fn sio_read(offset: usize) -> u32 {
    // SAFETY: SIO registers are always mapped and side-effect free to read.
    unsafe { read_volatile((SIO_BASE + offset) as *const u32) }
}

#[inline(always)]
fn sio_write(offset: usize, value: u32) {
    // SAFETY: the set/clear aliases only touch the bits in `value`.
    unsafe { write_volatile((SIO_BASE + offset) as *mut u32, value) }
}

/// GPIO bank 0 through the single-cycle IO block. Only core 1 drives the
/// IDE pins once the worker is running.
pub struct SioPort;

impl IdePort for SioPort {
    fn configure(&mut self, outputs: u32, inputs: u32) {
        // SAFETY: plain SDK calls on pins this port owns.
        unsafe {
            gpio_init_mask(outputs | inputs);
            for pin in 0..32 {
                if inputs & (1 << pin) != 0 {
                    gpio_set_pulls(pin, true, false);
                }
            }
        }
        sio_write(SIO_GPIO_OE_CLR, inputs);
        sio_write(SIO_GPIO_OE_SET, outputs);
    }

    #[inline(always)]
    fn set(&mut self, mask: u32) {
        sio_write(SIO_GPIO_OUT_SET, mask);
    }

    #[inline(always)]
    fn clear(&mut self, mask: u32) {
        sio_write(SIO_GPIO_OUT_CLR, mask);
    }

    #[inline(always)]
    fn write_masked(&mut self, mask: u32, value: u32) {
        let out = sio_read(SIO_GPIO_OUT);
        sio_write(SIO_GPIO_OUT, (out & !mask) | (value & mask));
    }

    #[inline(always)]
    fn enable_output(&mut self, mask: u32) {
        sio_write(SIO_GPIO_OE_SET, mask);
    }

    #[inline(always)]
    fn disable_output(&mut self, mask: u32) {
        sio_write(SIO_GPIO_OE_CLR, mask);
    }

    #[inline(always)]
    fn read(&mut self) -> u32 {
        sio_read(SIO_GPIO_IN)
    }

    #[inline(always)]
    fn delay_cycles(&mut self, cycles: u32) {
        if cycles == 0 {
            return;
        }
        // Two cycles per iteration taken, close enough for strobe widths.
        unsafe {
            core::arch::asm!(
                "1:",
                "subs {0}, #1",
                "bne 1b",
                inout(reg) cycles => _,
                options(nomem, nostack),
            );
        }
    }
}

/// Core number and the SDK microsecond timer
pub struct Rp2040;

impl Platform for Rp2040 {
    fn context_id(&self) -> usize {
        sio_read(SIO_CPUID) as usize
    }

    fn micros(&self) -> u64 {
        // SAFETY: reads the free-running timer.
        unsafe { time_us_64() }
    }

    fn delay_us(&self, us: u32) {
        // SAFETY: busy-waits on the timer, no shared state.
        unsafe { busy_wait_us_32(us) }
    }

    fn delay_ms(&self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000))
    }
}

pub const HEAP_SIZE: usize = 96 * 1024;

#[repr(align(8))]
struct Heap([u8; HEAP_SIZE]);

static mut HEAP: Heap = Heap([0; HEAP_SIZE]);

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hand the static heap to the allocator.
///
/// # Safety
///
/// Call once, on core 0, before anything allocates.
pub unsafe fn init_heap() {
    let heap = addr_of_mut!(HEAP) as *mut u8;
    ALLOCATOR.lock().init(heap, HEAP_SIZE);
}
