use std::fmt::{self, Display, Formatter};
use std::marker::PhantomData;
use std::ops::AddAssign;

/// Enumerates an iterator with a typed counter instead of a bare `usize`.
#[derive(Clone, Debug)]
pub struct TypedEnumerate<I, E: Copy + AddAssign<usize>> {
    iter: I,
    count: E,
}

impl<I, E: Copy + AddAssign<usize>> Iterator for TypedEnumerate<I, E>
where
    I: Iterator,
{
    type Item = (E, <I as Iterator>::Item);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.iter.next()?;
        let index = self.count;
        self.count += 1;
        Some((index, item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

pub trait TypedEnum<E: Copy + AddAssign<usize>>
where
    Self: Sized,
{
    fn typed_enumerate(self, first: E) -> TypedEnumerate<Self, E> {
        TypedEnumerate {
            iter: self,
            count: first,
        }
    }
}

impl<I: Iterator, E: Copy + AddAssign<usize>> TypedEnum<E> for I {}

/// An integer tagged with a marker type so that ids from different
/// numbering schemes cannot be mixed up.
#[derive(Debug, Hash, Ord, PartialOrd, Eq, PartialEq)]
pub struct TypedInt<B, X>(B, PhantomData<X>)
where
    B: Copy;

impl<B, X> Copy for TypedInt<B, X> where B: Copy {}

impl<B, X> Clone for TypedInt<B, X>
where
    B: Copy,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<B, X> Default for TypedInt<B, X>
where
    B: Copy + Default,
{
    fn default() -> Self {
        Self(B::default(), PhantomData)
    }
}

impl<B, X> Display for TypedInt<B, X>
where
    B: Copy + Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<B, X> From<B> for TypedInt<B, X>
where
    B: Copy,
{
    fn from(inner: B) -> Self {
        Self(inner, PhantomData)
    }
}

impl<B, X> TypedInt<B, X>
where
    B: Copy,
{
    pub fn new(inner: B) -> Self {
        Self::from(inner)
    }
    pub fn into_inner(self) -> B {
        self.0
    }
    pub fn inner(&self) -> &B {
        &self.0
    }
}

impl<B, A, X> AddAssign<A> for TypedInt<B, X>
where
    B: AddAssign<A> + Copy,
{
    fn add_assign(&mut self, rhs: A) {
        self.0.add_assign(rhs);
    }
}

/// Declares a tag type and an id alias over it. Tags derive `Hash` and the
/// comparison traits so the ids can key maps and be sorted.
#[macro_export]
macro_rules! typed_int {
    ($name:ident, $tag:ident, $base:ty) => {
        #[derive(Debug, Clone, Copy, Hash, Eq, Ord, PartialOrd, PartialEq)]
        pub struct $tag(usize);
        pub type $name = TypedInt<$base, $tag>;
    };
}
