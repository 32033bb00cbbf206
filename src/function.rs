use std::{any::type_name, fmt, mem, ptr};

use crate::{registry, storage::Storage, AllocError, Callable, EmptyCallError, Policy, Signature};

/// A type-erased callable with the signature `S`, stored inline when it fits in a pointer.
///
/// `S` is spelled as a function-pointer type, e.g. `Function<fn(i32, i32) -> i32>`.
/// A `Function` is either empty or holds one value of a concrete type
/// implementing [`Callable<S>`] and [`Clone`], chosen at construction.
///
/// # Which values are stored inline?
///
/// Values whose [`policy_of`](crate::policy_of) is [`Policy::Inline`] live inside the
/// `Function` itself, which is always two pointers wide.
/// Anything larger, or more strictly aligned than a pointer, is boxed on the heap.
///
/// # Value semantics
///
/// * [`Clone`] clones the stored value, so the clone is independent of the original.
/// * Moving a `Function` moves the stored value along with it.
///   [`Function::take`] and [`Function::assign`] move out of a place and leave it empty.
/// * Dropping a `Function` drops the stored value exactly once.
///
/// A `Function` is neither [`Send`] nor [`Sync`].
///
/// ```rust
/// use smallfn::{EmptyCallError, Function};
///
/// let add = |a: i32, b: i32| a + b;
/// let mut f = Function::<fn(i32, i32) -> i32>::new(add);
/// assert!(f.has_target());
/// assert_eq!(f.call(2, 3), Ok(5));
///
/// let g = f.take();
/// assert_eq!(f.call(2, 3), Err(EmptyCallError));
/// assert_eq!(g.call(4, 5), Ok(9));
/// ```
pub struct Function<S: Signature> {
    storage: Storage<S>,
}

impl<S: Signature> Function<S> {
    /// Creates an empty function, which fails every call with [`EmptyCallError`].
    pub fn empty() -> Self {
        Self {
            storage: Storage::vacant(),
        }
    }

    /// Creates a function holding `f`.
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] if `f` must be boxed and
    /// the allocation fails; see [`Function::try_new`] for the fallible version.
    pub fn new<F>(f: F) -> Self
    where
        F: Callable<S> + Clone + 'static,
    {
        Self::try_new(f).unwrap_or_else(|err| err.handle())
    }

    /// Creates a function holding `f`, reporting allocation failure.
    pub fn try_new<F>(f: F) -> Result<Self, AllocError>
    where
        F: Callable<S> + Clone + 'static,
    {
        Ok(Self {
            storage: Storage::try_with(f)?,
        })
    }

    /// Returns whether this function holds a callable.
    pub fn has_target(&self) -> bool {
        !self.storage.table.is_empty()
    }

    /// Returns whether this function holds nothing.
    pub fn is_empty(&self) -> bool {
        !self.has_target()
    }

    /// The policy the held value is stored with, or `None` if empty.
    pub fn policy(&self) -> Option<Policy> {
        self.storage.table.policy
    }

    /// Returns whether the held value is stored inline, rather than boxed.
    ///
    /// Empty functions are neither.
    pub fn is_inline(&self) -> bool {
        self.policy() == Some(Policy::Inline)
    }

    /// Calls the stored callable with a packed argument tuple.
    ///
    /// Returns [`EmptyCallError`] if this function is empty.
    /// Panics raised by the callable propagate unchanged.
    ///
    /// The per-arity `call` methods unpack the arguments for you.
    #[inline]
    pub fn invoke(&self, args: S::Args) -> Result<S::Output, EmptyCallError> {
        // SAFETY: `storage.table` always describes what `storage` holds.
        unsafe { (self.storage.table.invoke)(&self.storage, args) }
    }

    /// Returns a reference to the held value if it is exactly a `T`.
    ///
    /// The check compares the current dispatch table with the one built for `T`,
    /// and nothing else.
    ///
    /// ```rust
    /// use smallfn::Function;
    ///
    /// fn double(x: u32) -> u32 {
    ///     x * 2
    /// }
    ///
    /// let f = Function::<fn(u32) -> u32>::new(double as fn(u32) -> u32);
    /// assert!(f.target::<fn(u32) -> u32>().is_some());
    /// assert!(f.target::<u32>().is_none());
    /// ```
    pub fn target<T: 'static>(&self) -> Option<&T> {
        let table = registry::lookup::<S, T>()?;
        if !ptr::eq(self.storage.table, table) {
            return None;
        }
        // SAFETY: the current table is the one for `T`, so the storage holds a live `T`.
        Some(unsafe { &*self.storage.value_ptr::<T>() })
    }

    /// Returns a mutable reference to the held value if it is exactly a `T`.
    pub fn target_mut<T: 'static>(&mut self) -> Option<&mut T> {
        let table = registry::lookup::<S, T>()?;
        if !ptr::eq(self.storage.table, table) {
            return None;
        }
        // SAFETY: the current table is the one for `T`, so the storage holds a live `T`,
        // borrowed uniquely through `self`.
        Some(unsafe { &mut *self.storage.value_ptr_mut::<T>() })
    }

    /// Clones this function, reporting allocation failure.
    ///
    /// On failure `self` is left untouched.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        let mut copy = self.vacant_like();
        // SAFETY: `copy` is vacant and `self.storage.table` describes `self.storage`.
        unsafe { (self.storage.table.copy)(&mut copy.storage, &self.storage)? };
        Ok(copy)
    }

    /// Moves the held value out, leaving this function empty.
    pub fn take(&mut self) -> Self {
        let mut taken = self.vacant_like();
        // SAFETY: `taken` is vacant and `self.storage.table` describes `self.storage`.
        unsafe { (self.storage.table.mover)(&mut taken.storage, &mut self.storage) };
        taken
    }

    /// Replaces the held value with the one held by `source`, leaving `source` empty.
    ///
    /// The previously held value is dropped first.
    pub fn assign(&mut self, source: &mut Self) {
        self.clear();
        // SAFETY: `self.storage` was just vacated and `source.storage.table`
        // describes `source.storage`.
        unsafe { (source.storage.table.mover)(&mut self.storage, &mut source.storage) };
    }

    /// Replaces the held value with `f`, returning the previous function.
    pub fn replace<F>(&mut self, f: F) -> Self
    where
        F: Callable<S> + Clone + 'static,
    {
        mem::replace(self, Self::new(f))
    }

    /// Drops the held value, leaving this function empty.
    pub fn clear(&mut self) {
        // SAFETY: `storage.table` describes `storage`; destroy retires it to the empty table.
        unsafe { (self.storage.table.destroy)(&mut self.storage) };
    }

    // an empty function reached through the current table, without the registry
    fn vacant_like(&self) -> Self {
        Self {
            storage: Storage::vacant_like(self.storage.table),
        }
    }
}

impl<S: Signature> Default for Function<S> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<S: Signature> Clone for Function<S> {
    fn clone(&self) -> Self {
        self.try_clone().unwrap_or_else(|err| err.handle())
    }

    fn clone_from(&mut self, source: &Self) {
        // the copy is complete before the current value is dropped,
        // so a panicking `clone` leaves `self` as it was.
        let mut copy = source.clone();
        self.assign(&mut copy);
    }
}

impl<S: Signature> Drop for Function<S> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<S: Signature> fmt::Debug for Function<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("signature", &type_name::<S>())
            .field("policy", &self.policy())
            .finish()
    }
}
