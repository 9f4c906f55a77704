//! State transforms and updates
//!
//! A transform is a pure `&T -> T` function. Transforms are shared behind an
//! `Arc` because the same transform may be replayed many times: once when it is
//! first committed and again on every rollback that walks over it.

use std::fmt;
use std::sync::Arc;

/// Shared pure state transform
pub type Transform<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// Wrap a closure as a transform
pub fn transform<T, F>(f: F) -> Transform<T>
where
    F: Fn(&T) -> T + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Transform that returns its input unchanged
pub fn identity<T: Clone + 'static>() -> Transform<T> {
    Arc::new(|state: &T| state.clone())
}

/// Transform that ignores its input and always yields `value`
pub fn constant<T>(value: T) -> Transform<T>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move |_: &T| value.clone())
}

/// Left-fold transforms over an initial value
pub fn fold<'a, T, I>(initial: &T, transforms: I) -> T
where
    T: Clone + 'a,
    I: IntoIterator<Item = &'a Transform<T>>,
{
    transforms
        .into_iter()
        .fold(initial.clone(), |acc, next| next(&acc))
}

/// Either a plain next value or an updater over the previous value
pub enum Update<T> {
    /// Replace the state with this value
    Value(T),
    /// Derive the next state from the previous one
    Updater(Transform<T>),
}

impl<T> Update<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn value(value: T) -> Self {
        Update::Value(value)
    }

    pub fn updater<F>(f: F) -> Self
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        Update::Updater(Arc::new(f))
    }

    /// Normalize into a transform; a value becomes a constant transform
    pub fn into_transform(self) -> Transform<T> {
        match self {
            Update::Value(value) => constant(value),
            Update::Updater(f) => f,
        }
    }
}

impl<T: Clone> Clone for Update<T> {
    fn clone(&self) -> Self {
        match self {
            Update::Value(value) => Update::Value(value.clone()),
            Update::Updater(f) => Update::Updater(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Update<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Update::Updater(_) => f.write_str("Updater(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_update_value_is_constant() {
        let t = Update::value(5).into_transform();
        assert_eq!(t(&1), 5);
        assert_eq!(t(&100), 5);
    }

    #[test]
    fn test_update_updater() {
        let t = Update::updater(|v: &i32| v * 2).into_transform();
        assert_eq!(t(&21), 42);
    }

    #[test]
    fn test_fold_order() {
        let transforms = vec![
            transform(|v: &Vec<u8>| {
                let mut v = v.clone();
                v.push(1);
                v
            }),
            transform(|v: &Vec<u8>| {
                let mut v = v.clone();
                v.push(2);
                v
            }),
        ];
        assert_eq!(fold(&vec![0], &transforms), vec![0, 1, 2]);
    }

    proptest! {
        #[test]
        fn prop_identity_preserves_value(v in any::<i64>()) {
            let id = identity::<i64>();
            prop_assert_eq!(id(&v), v);
        }

        #[test]
        fn prop_fold_of_additions_is_sum(start in -1000i64..1000, deltas in prop::collection::vec(-50i64..50, 0..32)) {
            let transforms: Vec<Transform<i64>> = deltas
                .iter()
                .map(|d| {
                    let d = *d;
                    transform(move |v: &i64| v + d)
                })
                .collect();
            prop_assert_eq!(fold(&start, &transforms), start + deltas.iter().sum::<i64>());
        }
    }
}
