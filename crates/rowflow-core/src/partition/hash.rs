//! Hash partitioning on a single key column.

use smallvec::SmallVec;

use super::lookup3::hashword;
use super::{PartitionError, Partitioner};
use crate::row::{Value, ValueType};

/// Word buffer for key conversion. Short keys stay on the stack.
pub type KeyWords = SmallVec<[u32; 16]>;

/// Returns true if values of `value_type` can be used as a hash key.
#[must_use]
pub fn is_hashable(value_type: ValueType) -> bool {
    !matches!(value_type, ValueType::Serializable)
}

/// Converts a key value to the word sequence fed to `hashword`.
///
/// - numeric values: the 64-bit integer as low word then high word
/// - text, temporal and boolean values: the lowercase text form, one word per char
/// - binary values: bytes packed little endian, zero padded
///
/// # Errors
///
/// Returns `PartitionError::UnsupportedKeyType` for opaque values.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn key_words(value: &Value) -> Result<KeyWords, PartitionError> {
    let mut words = KeyWords::new();
    match value {
        Value::Null => {}
        Value::Integer(_) | Value::Number(_) => {
            let v = value.as_integer().unwrap_or_default() as u64;
            words.push(v as u32);
            words.push((v >> 32) as u32);
        }
        Value::String(s) => push_chars(&mut words, &s.to_lowercase()),
        Value::Boolean(_) | Value::Date(_) | Value::Timestamp(_) => {
            push_chars(&mut words, &value.to_string().to_lowercase());
        }
        Value::Binary(bytes) => {
            for chunk in bytes.chunks(4) {
                let mut buf = [0u8; 4];
                buf[..chunk.len()].copy_from_slice(chunk);
                words.push(u32::from_le_bytes(buf));
            }
        }
        Value::Serializable(_) => {
            return Err(PartitionError::UnsupportedKeyType(ValueType::Serializable));
        }
    }
    Ok(words)
}

fn push_chars(words: &mut KeyWords, text: &str) {
    words.extend(text.chars().map(u32::from));
}

/// Reduces a hash to a partition number in `[0, partition_count)`.
#[inline]
fn reduce(hash: u32, partition_count: usize) -> usize {
    // The hash is read as a signed 32-bit value before taking its magnitude.
    #[allow(clippy::cast_possible_wrap)]
    let magnitude = (hash as i32).unsigned_abs() as usize;
    magnitude % partition_count
}

/// Assigns rows to partitions by the lookup3 hash of one key column.
///
/// The mapping depends only on the key value and the partition count, so
/// independently started processes agree on where a row belongs.
#[derive(Debug, Clone)]
pub struct HashPartitioner {
    key_index: usize,
    partition_count: usize,
}

impl HashPartitioner {
    /// Creates a partitioner reading the key at `key_index`.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::NoPartitions` if `partition_count` is zero.
    pub fn new(key_index: usize, partition_count: usize) -> Result<Self, PartitionError> {
        if partition_count == 0 {
            return Err(PartitionError::NoPartitions);
        }
        Ok(Self {
            key_index,
            partition_count,
        })
    }

    /// Hash partition of `value` among `partition_count` partitions.
    ///
    /// A null key always lands in partition 0.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::NoPartitions` if `partition_count` is zero,
    /// or `PartitionError::UnsupportedKeyType` for opaque values.
    pub fn hash_partition(value: &Value, partition_count: usize) -> Result<usize, PartitionError> {
        if partition_count == 0 {
            return Err(PartitionError::NoPartitions);
        }
        if value.is_null() {
            return Ok(0);
        }
        let words = key_words(value)?;
        Ok(reduce(hashword(&words, 0), partition_count))
    }
}

impl Partitioner for HashPartitioner {
    fn partition_count(&self) -> usize {
        self.partition_count
    }

    fn key_index(&self) -> Option<usize> {
        Some(self.key_index)
    }

    fn assign(&self, key: &Value, partition_count: usize) -> Result<usize, PartitionError> {
        Self::hash_partition(key, partition_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;

    #[test]
    fn test_integer_words() {
        assert_eq!(key_words(&Value::from(5)).unwrap().as_slice(), &[5, 0]);
        assert_eq!(
            key_words(&Value::from(-1)).unwrap().as_slice(),
            &[u32::MAX, u32::MAX]
        );
        // Numbers go through the same integer conversion.
        assert_eq!(key_words(&Value::Number(5.7)).unwrap(), key_words(&Value::from(5)).unwrap());
    }

    #[test]
    fn test_text_is_case_normalized() {
        let upper = key_words(&Value::from("ABC")).unwrap();
        assert_eq!(upper.as_slice(), &[97, 98, 99]);
        assert_eq!(
            HashPartitioner::hash_partition(&Value::from("Alpha"), 7).unwrap(),
            HashPartitioner::hash_partition(&Value::from("alpha"), 7).unwrap()
        );
    }

    #[test]
    fn test_boolean_and_date_use_text_form() {
        assert_eq!(
            key_words(&Value::from(true)).unwrap(),
            key_words(&Value::from("true")).unwrap()
        );
        assert_eq!(
            key_words(&Value::Date(1234)).unwrap(),
            key_words(&Value::from("1234")).unwrap()
        );
    }

    #[test]
    fn test_binary_packing() {
        let words = key_words(&Value::from(vec![1u8, 0, 0, 0, 2])).unwrap();
        assert_eq!(words.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_serializable_is_rejected() {
        let err = key_words(&Value::Serializable(vec![1u8].into())).unwrap_err();
        assert_eq!(err, PartitionError::UnsupportedKeyType(ValueType::Serializable));
        assert!(!is_hashable(ValueType::Serializable));
        assert!(is_hashable(ValueType::Binary));
    }

    #[test]
    fn test_deterministic_and_in_range() {
        for partitions in 1..=16 {
            for key in -200i64..200 {
                let v = Value::from(key);
                let first = HashPartitioner::hash_partition(&v, partitions).unwrap();
                let second = HashPartitioner::hash_partition(&v, partitions).unwrap();
                assert_eq!(first, second);
                assert!(first < partitions);
            }
        }
    }

    #[test]
    fn test_null_goes_to_first_partition() {
        assert_eq!(HashPartitioner::hash_partition(&Value::Null, 5).unwrap(), 0);
    }

    #[test]
    fn test_zero_partitions() {
        assert!(HashPartitioner::new(0, 0).is_err());
        assert_eq!(
            HashPartitioner::hash_partition(&Value::from(1), 0),
            Err(PartitionError::NoPartitions)
        );
    }

    #[test]
    fn test_partition_row_by_key_column() {
        let partitioner = HashPartitioner::new(1, 4).unwrap();
        let row = Row::new(vec![Value::from("ignored"), Value::from(42)]);
        let expected = HashPartitioner::hash_partition(&Value::from(42), 4).unwrap();
        assert_eq!(partitioner.partition(&row).unwrap(), expected);

        let short = Row::new(vec![Value::from(1)]);
        assert_eq!(
            partitioner.partition(&short),
            Err(PartitionError::KeyColumnOutOfRange { index: 1, len: 1 })
        );
    }

    #[test]
    fn test_reduce_handles_min_value() {
        assert_eq!(reduce(0x8000_0000, 3), (1usize << 31) % 3);
        assert_eq!(reduce(u32::MAX, 10), 1);
    }
}
