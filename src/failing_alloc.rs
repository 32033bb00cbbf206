//! A global allocator for tests that can be told to fail.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
    ptr,
};

thread_local! {
    static FAIL_NEXT: Cell<Option<Layout>> = const { Cell::new(None) };
}

/// The system allocator, except that it refuses one allocation of the layout
/// passed to [`fail_next_alloc`] on the same thread.
struct FailingAlloc;

#[global_allocator]
static GLOBAL: FailingAlloc = FailingAlloc;

// SAFETY: every request is forwarded to `System` unchanged, or refused with null.
unsafe impl GlobalAlloc for FailingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // `try_with` fails during thread teardown; allocate normally then.
        let refuse = FAIL_NEXT
            .try_with(|fail| fail.get() == Some(layout) && fail.take().is_some())
            .unwrap_or(false);
        if refuse {
            return ptr::null_mut();
        }
        // SAFETY: forwarded from our caller.
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: every pointer we hand out comes from `System`.
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// Makes the next allocation of `layout` on the current thread fail.
///
/// Other layouts, such as lock bookkeeping, still go through.
pub(crate) fn fail_next_alloc(layout: Layout) {
    FAIL_NEXT.with(|fail| fail.set(Some(layout)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fails_once() {
        fail_next_alloc(Layout::new::<[u64; 2]>());

        let other = Box::new(5_u32);
        assert_eq!(*other, 5);

        // SAFETY: the layout is non-zero in size.
        let refused = unsafe { GLOBAL.alloc(Layout::new::<[u64; 2]>()) };
        assert!(refused.is_null());

        let boxed = Box::new([5_u64, 6]);
        assert_eq!(*boxed, [5, 6]);
    }
}
