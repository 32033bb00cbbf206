use std::{
    alloc::Layout,
    cell::UnsafeCell,
    mem::{self, align_of, size_of, MaybeUninit},
    ptr,
};

use static_assertions::const_assert_eq;

use crate::{
    registry, table::DispatchTable, trace, AllocError, Callable, EmptyCallError, Signature,
};

/// Size of the inline buffer: one pointer.
pub(crate) const INLINE_SIZE: usize = size_of::<*mut ()>();
/// Alignment of the inline buffer: that of a pointer.
pub(crate) const INLINE_ALIGN: usize = align_of::<*mut ()>();

/// How a value is laid out inside a [`Function`](crate::Function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// The value's bytes live directly in the function's buffer.
    Inline,
    /// The buffer holds a single owning pointer to a heap allocation.
    Boxed,
}

/// Resolves the [`Policy`] values of type `T` are stored with.
///
/// A type is stored inline if both:
/// * it is no larger than a pointer.
/// * the alignment of a pointer is a multiple of its alignment.
///
/// Every other type is boxed. Moves in Rust are plain copies of bytes and
/// can never fail, so no further condition applies.
///
/// This is a property of the type alone, so it is fixed for every value of `T`.
///
/// ```rust
/// use smallfn::{policy_of, Policy};
///
/// assert_eq!(policy_of::<u8>(), Policy::Inline);
/// assert_eq!(policy_of::<usize>(), Policy::Inline);
/// assert_eq!(policy_of::<[usize; 2]>(), Policy::Boxed);
/// ```
pub const fn policy_of<T>() -> Policy {
    if size_of::<T>() <= INLINE_SIZE && INLINE_ALIGN % align_of::<T>() == 0 {
        Policy::Inline
    } else {
        Policy::Boxed
    }
}

/// A pointer-sized buffer together with the table of what it holds.
///
/// Depending on the table's policy, `buffer` holds either the value itself
/// or a `*mut T` made by [`allocate`]. When `table` is the empty table,
/// `buffer` holds nothing.
///
/// The buffer sits in an `UnsafeCell`: an inline value is called through a
/// shared reference and may mutate itself through a `Cell` or similar.
#[repr(C)]
pub(crate) struct Storage<S: Signature> {
    pub(crate) buffer: UnsafeCell<MaybeUninit<*mut ()>>,
    pub(crate) table: &'static DispatchTable<S>,
}

const_assert_eq!(size_of::<Storage<fn()>>(), 2 * size_of::<usize>());
const_assert_eq!(align_of::<Storage<fn()>>(), INLINE_ALIGN);

impl<S: Signature> Storage<S> {
    /// Creates a storage holding nothing.
    pub(crate) fn vacant() -> Self {
        Self::vacant_with(registry::empty::<S>())
    }

    /// Creates a storage holding nothing, with the empty table that `table` links to.
    ///
    /// Unlike [`Storage::vacant`], this never touches the registry.
    pub(crate) fn vacant_like(table: &'static DispatchTable<S>) -> Self {
        Self::vacant_with(table.empty_table())
    }

    fn vacant_with(empty: &'static DispatchTable<S>) -> Self {
        Self {
            buffer: null_buffer(),
            table: empty,
        }
    }

    /// Moves `value` into a new storage, boxing it if its policy says so.
    pub(crate) fn try_with<T>(value: T) -> Result<Self, AllocError>
    where
        T: Callable<S> + Clone + 'static,
    {
        let table = registry::stored::<S, T>();
        let mut inst = Self {
            buffer: UnsafeCell::new(MaybeUninit::uninit()),
            table,
        };

        match policy_of::<T>() {
            // SAFETY: `T` fits in `buffer` (size and alignment) under the inline policy.
            Policy::Inline => unsafe { inst.inline_ptr_mut::<T>().write(value) },
            Policy::Boxed => {
                let boxed = allocate::<T>()?;
                // SAFETY: `boxed` is valid for writes of a `T`, freshly allocated.
                unsafe { boxed.write(value) };
                inst.buffer = UnsafeCell::new(MaybeUninit::new(boxed.cast()));
            }
        }

        Ok(inst)
    }

    // both derive from `UnsafeCell::get`, so writes through the result are
    // allowed even when it came from `&self`.
    fn inline_ptr<T>(&self) -> *mut T {
        self.buffer.get().cast()
    }

    fn inline_ptr_mut<T>(&mut self) -> *mut T {
        self.buffer.get_mut().as_mut_ptr().cast()
    }

    /// # Safety
    ///
    /// The buffer must hold a pointer written by [`Storage::try_with`] or a boxed `copy`.
    unsafe fn boxed_ptr<T>(&self) -> *mut T {
        // SAFETY: the caller guarantees the buffer was initialized with a pointer,
        // and nothing writes the buffer while `&self` is live.
        unsafe { (*self.buffer.get()).assume_init() }.cast()
    }

    /// Returns a pointer to the stored value.
    ///
    /// # Safety
    ///
    /// `table` must be the table for `T` (under `policy_of::<T>()`).
    pub(crate) unsafe fn value_ptr<T>(&self) -> *const T {
        match policy_of::<T>() {
            Policy::Inline => self.inline_ptr::<T>(),
            // SAFETY: the table for a boxed `T` is only installed over a boxed pointer.
            Policy::Boxed => unsafe { self.boxed_ptr::<T>() },
        }
    }

    /// Returns a mutable pointer to the stored value.
    ///
    /// # Safety
    ///
    /// `table` must be the table for `T` (under `policy_of::<T>()`).
    pub(crate) unsafe fn value_ptr_mut<T>(&mut self) -> *mut T {
        match policy_of::<T>() {
            Policy::Inline => self.inline_ptr_mut::<T>(),
            // SAFETY: the table for a boxed `T` is only installed over a boxed pointer.
            Policy::Boxed => unsafe { self.boxed_ptr::<T>() },
        }
    }
}

fn null_buffer() -> UnsafeCell<MaybeUninit<*mut ()>> {
    UnsafeCell::new(MaybeUninit::new(ptr::null_mut()))
}

/// Allocates room for a `T` with the global allocator.
///
/// Zero-sized types get a dangling, well-aligned pointer and no allocation,
/// as `Box` does.
fn allocate<T>() -> Result<*mut T, AllocError> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return Ok(ptr::NonNull::<T>::dangling().as_ptr());
    }

    // SAFETY: `layout` has a non-zero size.
    let alloc = unsafe { std::alloc::alloc(layout) };
    if alloc.is_null() {
        return Err(AllocError::new(layout));
    }

    trace!(size = layout.size(), align = layout.align(), "allocated boxed value");
    Ok(alloc.cast())
}

/// Drops and deallocates a value made by [`allocate`].
///
/// # Safety
///
/// `ptr` must come from [`allocate::<T>`], hold an initialized `T`
/// and not be used again.
unsafe fn release<T>(ptr: *mut T) {
    // SAFETY:
    // * `allocate` uses the global allocator with `Layout::new::<T>()`
    //   (or a dangling pointer for zero-sized `T`), exactly as `Box<T>` does.
    // * the caller guarantees the pointee is initialized and never used again.
    drop(unsafe { Box::from_raw(ptr) });
    trace!(size = size_of::<T>(), "released boxed value");
}

/// Builds the table for `T` under `policy_of::<T>()`.
pub(crate) fn table_for<S, T>(empty: &'static DispatchTable<S>) -> DispatchTable<S>
where
    S: Signature,
    T: Callable<S> + Clone + 'static,
{
    match policy_of::<T>() {
        Policy::Inline => DispatchTable::populated(
            inline::invoke::<S, T>,
            inline::destroy::<S, T>,
            inline::copy::<S, T>,
            inline::mover::<S, T>,
            Policy::Inline,
            empty,
        ),
        Policy::Boxed => DispatchTable::populated(
            boxed::invoke::<S, T>,
            boxed::destroy::<S, T>,
            boxed::copy::<S, T>,
            boxed::mover::<S, T>,
            Policy::Boxed,
            empty,
        ),
    }
}

mod inline {
    use super::*;

    pub(super) unsafe fn invoke<S: Signature, T: Callable<S>>(
        storage: &Storage<S>,
        args: S::Args,
    ) -> Result<S::Output, EmptyCallError> {
        // SAFETY: this table is only installed over an inline `T`.
        let value = unsafe { &*storage.inline_ptr::<T>() };
        Ok(value.call_with(args))
    }

    pub(super) unsafe fn destroy<S: Signature, T>(storage: &mut Storage<S>) {
        // retire first: a panicking `Drop` must not leave `T`'s table behind.
        storage.table = storage.table.empty_table();
        // SAFETY: the buffer held an inline `T`, which is never used again.
        unsafe { storage.inline_ptr_mut::<T>().drop_in_place() };
    }

    pub(super) unsafe fn copy<S: Signature, T: Clone>(
        dest: &mut Storage<S>,
        src: &Storage<S>,
    ) -> Result<(), AllocError> {
        // SAFETY: `src` holds an inline `T`.
        let value = unsafe { &*src.inline_ptr::<T>() }.clone();
        // SAFETY: `dest` is vacant and `T` fits its buffer.
        unsafe { dest.inline_ptr_mut::<T>().write(value) };
        dest.table = src.table;
        Ok(())
    }

    pub(super) unsafe fn mover<S: Signature, T>(dest: &mut Storage<S>, src: &mut Storage<S>) {
        let empty = src.table.empty_table();
        let table = mem::replace(&mut src.table, empty);
        // SAFETY:
        // * `src` held an inline `T`; its table is retired, so it is never read again.
        // * `dest` is vacant and `T` fits its buffer.
        unsafe {
            let value = src.inline_ptr::<T>().read();
            dest.inline_ptr_mut::<T>().write(value);
        }
        dest.table = table;
    }
}

mod boxed {
    use super::*;

    pub(super) unsafe fn invoke<S: Signature, T: Callable<S>>(
        storage: &Storage<S>,
        args: S::Args,
    ) -> Result<S::Output, EmptyCallError> {
        // SAFETY: this table is only installed over a pointer to a live `T`.
        let value = unsafe { &*storage.boxed_ptr::<T>() };
        Ok(value.call_with(args))
    }

    pub(super) unsafe fn destroy<S: Signature, T>(storage: &mut Storage<S>) {
        storage.table = storage.table.empty_table();
        // SAFETY: the buffer held a pointer from `allocate::<T>`, never used again.
        unsafe { release(storage.boxed_ptr::<T>()) };
        storage.buffer = null_buffer();
    }

    pub(super) unsafe fn copy<S: Signature, T: Clone>(
        dest: &mut Storage<S>,
        src: &Storage<S>,
    ) -> Result<(), AllocError> {
        // clone before allocating, so a panicking `clone` has nothing to free.
        // SAFETY: `src` holds a pointer to a live `T`.
        let value = unsafe { &*src.boxed_ptr::<T>() }.clone();
        let boxed = allocate::<T>()?;
        // SAFETY: `boxed` is valid for writes of a `T`, freshly allocated.
        unsafe { boxed.write(value) };
        dest.buffer = UnsafeCell::new(MaybeUninit::new(boxed.cast()));
        dest.table = src.table;
        Ok(())
    }

    pub(super) unsafe fn mover<S: Signature, T>(dest: &mut Storage<S>, src: &mut Storage<S>) {
        // the retired table, not the nulled pointer, keeps `src` from freeing
        // the allocation again.
        let empty = src.table.empty_table();
        let table = mem::replace(&mut src.table, empty);
        dest.buffer = mem::replace(&mut src.buffer, null_buffer());
        dest.table = table;
    }
}

// these tests exercise the raw buffer and are expected to pass under `cargo miri test`.
#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::failing_alloc::fail_next_alloc;

    #[repr(align(32))]
    #[derive(Clone, Copy)]
    struct OverAligned;

    #[test]
    fn test_policy_of() {
        assert_eq!(policy_of::<()>(), Policy::Inline);
        assert_eq!(policy_of::<u8>(), Policy::Inline);
        assert_eq!(policy_of::<u32>(), Policy::Inline);
        assert_eq!(policy_of::<*const u8>(), Policy::Inline);
        assert_eq!(policy_of::<Rc<Cell<u8>>>(), Policy::Inline);
        assert_eq!(policy_of::<[u8; INLINE_SIZE]>(), Policy::Inline);

        assert_eq!(policy_of::<[u8; INLINE_SIZE + 1]>(), Policy::Boxed);
        assert_eq!(policy_of::<String>(), Policy::Boxed);
        assert_eq!(policy_of::<u128>(), Policy::Boxed);
        assert_eq!(policy_of::<OverAligned>(), Policy::Boxed);
    }

    #[test]
    fn test_allocate_zero_sized() {
        let ptr = allocate::<OverAligned>().unwrap();
        assert_eq!(ptr as usize % align_of::<OverAligned>(), 0);
        // SAFETY: `ptr` came from `allocate` and the zero-sized value needs no init.
        unsafe {
            ptr.write(OverAligned);
            release(ptr);
        }
    }

    #[test]
    fn test_allocate_reports_failure() {
        fail_next_alloc(Layout::new::<[u64; 3]>());
        let err = allocate::<[u64; 3]>().unwrap_err();
        assert_eq!(err.layout(), Layout::new::<[u64; 3]>());

        // only one allocation is refused
        let ptr = allocate::<[u64; 3]>().unwrap();
        // SAFETY: `ptr` came from `allocate` and is initialized before release.
        unsafe {
            ptr.write([1, 2, 3]);
            release(ptr);
        }
    }

    #[test]
    fn test_inline_value_mutates_through_shared_call() {
        #[derive(Clone)]
        struct Tally(Cell<u32>);

        impl Callable<fn() -> u32> for Tally {
            fn call_with(&self, (): ()) -> u32 {
                self.0.set(self.0.get() + 1);
                self.0.get()
            }
        }

        let mut storage = Storage::<fn() -> u32>::try_with(Tally(Cell::new(0))).unwrap();
        assert_eq!(storage.table.policy, Some(Policy::Inline));
        // SAFETY: `storage` holds the inline `Tally` installed above.
        unsafe {
            assert_eq!((storage.table.invoke)(&storage, ()), Ok(1));
            assert_eq!((storage.table.invoke)(&storage, ()), Ok(2));
            assert_eq!((*storage.value_ptr::<Tally>()).0.get(), 2);
            (storage.table.destroy)(&mut storage);
        }
    }

    #[test]
    fn test_inline_storage_moves_bytes() {
        let hits = Rc::new(Cell::new(0));
        let f = {
            let hits = hits.clone();
            move || hits.set(hits.get() + 1)
        };

        let mut src = Storage::<fn()>::try_with(f).unwrap();
        let mut dest = Storage::<fn()>::vacant();
        assert_eq!(Rc::strong_count(&hits), 2);

        // SAFETY: `dest` is vacant, `src` holds the value installed above.
        unsafe {
            (src.table.mover)(&mut dest, &mut src);
            assert!(src.table.is_empty());
            assert_eq!((src.table.invoke)(&src, ()), Err(EmptyCallError));
            assert_eq!((dest.table.invoke)(&dest, ()), Ok(()));
            (dest.table.destroy)(&mut dest);
            (dest.table.destroy)(&mut dest);
            (src.table.destroy)(&mut src);
        }

        assert_eq!(hits.get(), 1);
        assert_eq!(Rc::strong_count(&hits), 1);
    }

    #[test]
    fn test_boxed_storage_hands_over_pointer() {
        let payload = [7_u64; 4];
        let f = move |i: usize| payload[i];

        let mut src = Storage::<fn(usize) -> u64>::try_with(f).unwrap();
        let mut dest = Storage::<fn(usize) -> u64>::vacant();
        // SAFETY: `src` holds a boxed closure.
        let before = unsafe { src.boxed_ptr::<u8>() };

        // SAFETY: `dest` is vacant, `src` holds the value installed above.
        unsafe {
            (src.table.mover)(&mut dest, &mut src);
            assert_eq!(dest.boxed_ptr::<u8>(), before);
            assert!(src.buffer.get_mut().assume_init().is_null());
            assert_eq!((dest.table.invoke)(&dest, (3,)), Ok(7));
            (src.table.destroy)(&mut src);
            (dest.table.destroy)(&mut dest);
        }
        assert!(dest.table.is_empty());
    }
}
