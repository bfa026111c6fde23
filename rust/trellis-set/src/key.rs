use serde::{Deserialize, Serialize, de::DeserializeOwned};
use trellis_common::{Blake3Hash, ConditionalSync};

use crate::{TrellisSetError, codec};

/// A value that may be stored within a [`Set`](crate::Set).
///
/// The tree engine never inspects concrete values: it only orders them,
/// compares them for equality and encodes them. Any type with a total order
/// and a serde representation qualifies.
pub trait ValueType:
    std::fmt::Debug + Clone + Ord + Serialize + DeserializeOwned + ConditionalSync + 'static
{
    /// The [`OrderedKey`] that summarizes this value
    fn ordered_key(&self) -> OrderedKey<Self> {
        OrderedKey(self.clone())
    }

    /// The [`Blake3Hash`] of this value's canonical encoding, which is the
    /// input to the chunk boundary function
    fn digest(&self) -> Result<Blake3Hash, TrellisSetError> {
        codec::digest(self)
    }
}

impl<T> ValueType for T where
    T: std::fmt::Debug + Clone + Ord + Serialize + DeserializeOwned + ConditionalSync + 'static
{
}

/// A comparable summary of a value, used to delimit the range of a chunk and
/// to drive cursor search. For a set the key of a value is the value itself,
/// so keys order exactly as values do.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedKey<Value>(Value);

impl<Value> OrderedKey<Value>
where
    Value: ValueType,
{
    /// The value this key summarizes
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Take the value this key summarizes
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl<Value> From<Value> for OrderedKey<Value>
where
    Value: ValueType,
{
    fn from(value: Value) -> Self {
        OrderedKey(value)
    }
}
