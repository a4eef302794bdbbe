use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// Ordered list of per-item details inside a feature change.
///
/// A single item is written flat into the enclosing change object,
/// several items are written under a `changes` array. Both shapes are
/// accepted on input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T>(Vec<T>);

#[derive(serde::Serialize)]
#[serde(untagged)]
enum BatchRef<'a, T> {
    Many { changes: &'a [T] },
    One(&'a T),
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum BatchOwned<T> {
    Many { changes: Vec<T> },
    One(T),
}

impl<T> Batch<T> {
    pub fn new(items: Vec<T>) -> Self {
        Batch(items)
    }

    pub fn single(item: T) -> Self {
        Batch(vec![item])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.0.iter_mut()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> From<Vec<T>> for Batch<T> {
    fn from(items: Vec<T>) -> Self {
        Batch(items)
    }
}

impl<'a, T> IntoIterator for &'a Batch<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: Serialize> Serialize for Batch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [one] => BatchRef::One(one).serialize(serializer),
            many => BatchRef::Many { changes: many }.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Batch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match BatchOwned::deserialize(deserializer)? {
            BatchOwned::Many { changes } => Batch(changes),
            BatchOwned::One(one) => Batch(vec![one]),
        })
    }
}
