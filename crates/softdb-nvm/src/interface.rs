use std::cmp::Ordering;


/// A three-way comparison over keys of type `K`.
///
/// This is deliberately separate from [`Ord`]: the database stores keys as
/// handles to encoded records, and ordering them requires decoding a
/// length prefix and an embedded sequence tag first. Implementations must
/// provide a total order; keys which compare as equal need not be
/// bit-identical.
pub trait Compare<K> {
    #[must_use]
    fn cmp(&self, lhs: &K, rhs: &K) -> Ordering;

    #[inline]
    #[must_use]
    fn eq(&self, lhs: &K, rhs: &K) -> bool {
        self.cmp(lhs, rhs).is_eq()
    }
}

impl<K, C: Compare<K>> Compare<K> for &C {
    #[inline]
    fn cmp(&self, lhs: &K, rhs: &K) -> Ordering {
        C::cmp(self, lhs, rhs)
    }
}
