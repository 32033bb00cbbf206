//! Call signatures and the values that can be called through them.

use crate::{EmptyCallError, Function};

mod sealed {
    pub trait Sealed {}
}

/// A plain function-pointer type `fn(A0, .., An) -> R` used to name the
/// signature of a [`Function`].
///
/// Implemented for arities 0 through 8. The trait is sealed: signatures are
/// always spelled as `fn` pointer types, never as custom types.
///
/// # Borrowed arguments
///
/// Argument and return types must be `'static`, because dispatch tables are
/// keyed by the signature's [`TypeId`](std::any::TypeId). Borrowed arguments
/// are written with a `'static` lifetime, as in `fn(&'static str) -> usize`.
/// Higher-ranked signatures such as `for<'a> fn(&'a str)` are not supported:
///
/// ```rust,compile_fail
/// use smallfn::Function;
///
/// let f = Function::<for<'a> fn(&'a str) -> usize>::new(|s: &str| s.len());
/// ```
///
/// To pass data that does not live forever, take it by value or through a
/// shared owner such as [`Rc`](std::rc::Rc):
///
/// ```rust
/// use std::rc::Rc;
/// use smallfn::Function;
///
/// let len = Function::<fn(Rc<str>) -> usize>::new(|s: Rc<str>| s.len());
/// let name: Rc<str> = String::from("callable").into();
/// assert_eq!(len.call(name.clone()), Ok(8));
///
/// let literal = Function::<fn(&'static str) -> usize>::new(|s: &'static str| s.len());
/// assert_eq!(literal.call("four"), Ok(4));
/// ```
pub trait Signature: sealed::Sealed + 'static {
    /// The arguments, packed into a tuple.
    type Args: 'static;
    /// The return type.
    type Output: 'static;
}

/// A value that can be called with the arguments of signature `S`.
///
/// Implemented for every closure and function item whose [`Fn`] signature
/// matches `S`.
pub trait Callable<S: Signature> {
    /// Calls the value with a packed argument tuple.
    fn call_with(&self, args: S::Args) -> S::Output;
}

macro_rules! impl_signature {
    ($($arg:ident: $ty:ident),*) => {
        impl<R: 'static, $($ty: 'static),*> sealed::Sealed for fn($($ty),*) -> R {}

        impl<R: 'static, $($ty: 'static),*> Signature for fn($($ty),*) -> R {
            type Args = ($($ty,)*);
            type Output = R;
        }

        impl<Func, R: 'static, $($ty: 'static),*> Callable<fn($($ty),*) -> R> for Func
        where
            Func: Fn($($ty),*) -> R,
        {
            #[inline]
            fn call_with(&self, ($($arg,)*): ($($ty,)*)) -> R {
                self($($arg),*)
            }
        }

        impl<R: 'static, $($ty: 'static),*> Function<fn($($ty),*) -> R> {
            /// Calls the stored callable.
            ///
            /// Returns [`EmptyCallError`] if this function is empty.
            #[inline]
            pub fn call(&self, $($arg: $ty),*) -> Result<R, EmptyCallError> {
                self.invoke(($($arg,)*))
            }
        }
    };
}

impl_signature!();
impl_signature!(a0: A0);
impl_signature!(a0: A0, a1: A1);
impl_signature!(a0: A0, a1: A1, a2: A2);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6, a7: A7);

#[cfg(test)]
mod tests {
    use super::*;

    fn call<S: Signature, F: Callable<S>>(f: &F, args: S::Args) -> S::Output {
        f.call_with(args)
    }

    fn answer() -> u32 {
        42
    }

    #[test]
    fn test_call_with_tuples() {
        assert_eq!(call::<fn() -> u32, _>(&answer, ()), 42);
        assert_eq!(call::<fn(i32) -> i32, _>(&|x: i32| x * 2, (21,)), 42);

        let greeting = String::from("hello");
        let greet = move |name: &'static str, punct: char| format!("{greeting}, {name}{punct}");
        assert_eq!(
            call::<fn(&'static str, char) -> String, _>(&greet, ("world", '!')),
            "hello, world!"
        );

        let sum8 = |a: u8, b: u8, c: u8, d: u8, e: u8, f: u8, g: u8, h: u8| {
            [a, b, c, d, e, f, g, h].iter().map(|&x| x as u32).sum::<u32>()
        };
        type Sum8 = fn(u8, u8, u8, u8, u8, u8, u8, u8) -> u32;
        assert_eq!(call::<Sum8, _>(&sum8, (1, 2, 3, 4, 5, 6, 7, 8)), 36);
    }

    #[test]
    fn test_static_and_shared_arguments() {
        let first = Function::<fn(&'static [u8]) -> Option<u8>>::new(|bytes: &'static [u8]| {
            bytes.first().copied()
        });
        assert_eq!(first.call(b"xyz"), Ok(Some(b'x')));
        assert_eq!(first.call(&[]), Ok(None));

        // data built at runtime goes through an owner instead of a borrow
        let words = Function::<fn(std::rc::Rc<str>) -> usize>::new(|text: std::rc::Rc<str>| {
            text.split_whitespace().count()
        });
        let text: std::rc::Rc<str> = format!("{} {}", "two", "words").into();
        assert_eq!(words.call(text.clone()), Ok(2));
        assert_eq!(std::rc::Rc::strong_count(&text), 1);
    }
}
