use std::ptr;

use crate::{storage::Storage, AllocError, EmptyCallError, Policy, Signature};

type InvokeFn<S> = unsafe fn(
    &Storage<S>,
    <S as Signature>::Args,
) -> Result<<S as Signature>::Output, EmptyCallError>;
type DestroyFn<S> = unsafe fn(&mut Storage<S>);
type CopyFn<S> = unsafe fn(&mut Storage<S>, &Storage<S>) -> Result<(), AllocError>;
type MoveFn<S> = unsafe fn(&mut Storage<S>, &mut Storage<S>);

/// The operations of one stored type under one [`Policy`].
///
/// Tables live for the whole process and are handed out by the registry,
/// one per key, so a table's address identifies the type it was built for.
///
/// # Safety
///
/// Every slot may only be called with storage whose `table` is this table:
/// * `invoke` and `destroy` take the storage holding the value.
/// * `copy` and `mover` take a vacant destination (holding no live value)
///   and the source holding the value.
pub(crate) struct DispatchTable<S: Signature> {
    pub(crate) invoke: InvokeFn<S>,
    pub(crate) destroy: DestroyFn<S>,
    pub(crate) copy: CopyFn<S>,
    pub(crate) mover: MoveFn<S>,
    pub(crate) policy: Option<Policy>,
    // `None` for the empty table itself.
    empty: Option<&'static DispatchTable<S>>,
}

impl<S: Signature> DispatchTable<S> {
    /// The table of a storage that holds nothing.
    pub(crate) fn empty() -> Self {
        Self {
            invoke: empty_invoke::<S>,
            destroy: empty_destroy::<S>,
            copy: empty_copy::<S>,
            mover: empty_move::<S>,
            policy: None,
            empty: None,
        }
    }

    pub(crate) fn populated(
        invoke: InvokeFn<S>,
        destroy: DestroyFn<S>,
        copy: CopyFn<S>,
        mover: MoveFn<S>,
        policy: Policy,
        empty: &'static Self,
    ) -> Self {
        Self {
            invoke,
            destroy,
            copy,
            mover,
            policy: Some(policy),
            empty: Some(empty),
        }
    }

    /// The empty table of this table's signature.
    pub(crate) fn empty_table(&'static self) -> &'static Self {
        self.empty.unwrap_or(self)
    }

    pub(crate) fn is_empty(&'static self) -> bool {
        ptr::eq(self, self.empty_table())
    }
}

unsafe fn empty_invoke<S: Signature>(
    _storage: &Storage<S>,
    _args: S::Args,
) -> Result<S::Output, EmptyCallError> {
    Err(EmptyCallError)
}

unsafe fn empty_destroy<S: Signature>(_storage: &mut Storage<S>) {}

unsafe fn empty_copy<S: Signature>(dest: &mut Storage<S>, src: &Storage<S>) -> Result<(), AllocError> {
    dest.table = src.table;
    Ok(())
}

unsafe fn empty_move<S: Signature>(dest: &mut Storage<S>, src: &mut Storage<S>) {
    dest.table = src.table;
}
