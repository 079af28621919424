// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel heap.
//!
//! A fixed arena in BSS handed to a linked-list allocator.  There is
//! no memory management beyond this: the heap is initialized once at
//! boot and never grows.  Hosted test builds use the host allocator.

#[cfg(not(any(test, clippy)))]
mod imp {
    use linked_list_allocator::LockedHeap;

    #[global_allocator]
    static HEAP: LockedHeap = LockedHeap::empty();

    const HEAP_SIZE: usize = 1 << 20;
    static mut ARENA: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

    /// # Safety
    /// Must be called exactly once, before the first allocation.
    pub unsafe fn init() {
        unsafe {
            HEAP.lock().init(core::ptr::addr_of_mut!(ARENA).cast(), HEAP_SIZE);
        }
    }
}

#[cfg(any(test, clippy))]
mod imp {
    pub unsafe fn init() {}
}

pub use imp::init;
