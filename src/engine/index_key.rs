use crate::engine::MAX_INDEX_KEY_LENGTH;
use crate::utils::BufferSlice;
use crate::{Error, Result};
use bson::Bson;
use bson::spec::BinarySubtype;
use std::cmp::Ordering;
use std::fmt;

const TAG_MIN_VALUE: u8 = 0;
const TAG_NULL: u8 = 1;
const TAG_INT32: u8 = 2;
const TAG_INT64: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BINARY: u8 = 6;
const TAG_OBJECT_ID: u8 = 7;
const TAG_GUID: u8 = 8;
const TAG_BOOLEAN: u8 = 9;
const TAG_DATE_TIME: u8 = 10;
const TAG_MAX_VALUE: u8 = 255;

/// An index key: the ordered subset of document values, plus the sentinel
/// `MinValue`/`MaxValue` keys the skip-list HEAD/TAIL nodes carry.
///
/// The total order ranks by kind first; the three numeric kinds compare
/// against each other by numeric value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IndexKey {
    MinValue,
    Null,
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    ObjectId(bson::oid::ObjectId),
    Guid(uuid::Uuid),
    Boolean(bool),
    DateTime(bson::DateTime),
    MaxValue,
}

impl IndexKey {
    /// Kind rank in the document-value order. Numbers share one rank.
    fn type_order(&self) -> u8 {
        match self {
            IndexKey::MinValue => 0,
            IndexKey::Null => 1,
            IndexKey::Int32(_) | IndexKey::Int64(_) | IndexKey::Double(_) => 2,
            IndexKey::String(_) => 3,
            IndexKey::Binary(_) => 4,
            IndexKey::ObjectId(_) => 5,
            IndexKey::Guid(_) => 6,
            IndexKey::Boolean(_) => 7,
            IndexKey::DateTime(_) => 8,
            IndexKey::MaxValue => 9,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, IndexKey::MinValue | IndexKey::MaxValue)
    }

    /// Converts a document value into a key. Documents and arrays are not
    /// indexable; a missing field indexes as `Null` (callers map `None` to
    /// `Bson::Null` before getting here).
    pub fn from_bson(field: &str, value: &Bson) -> Result<IndexKey> {
        let key = match value {
            Bson::Null | Bson::Undefined => IndexKey::Null,
            Bson::Int32(v) => IndexKey::Int32(*v),
            Bson::Int64(v) => IndexKey::Int64(*v),
            Bson::Double(v) => IndexKey::Double(*v),
            Bson::String(v) => IndexKey::String(v.clone()),
            Bson::Boolean(v) => IndexKey::Boolean(*v),
            Bson::DateTime(v) => IndexKey::DateTime(*v),
            Bson::ObjectId(v) => IndexKey::ObjectId(*v),
            Bson::Binary(bin) if bin.subtype == BinarySubtype::Uuid => {
                match uuid::Uuid::from_slice(&bin.bytes) {
                    Ok(guid) => IndexKey::Guid(guid),
                    Err(_) => IndexKey::Binary(bin.bytes.clone()),
                }
            }
            Bson::Binary(bin) => IndexKey::Binary(bin.bytes.clone()),
            other => return Err(Error::invalid_data_type(field, other)),
        };

        if key.key_length() > MAX_INDEX_KEY_LENGTH {
            return Err(Error::index_key_too_long(key.key_length()));
        }

        Ok(key)
    }

    /// The document value this key stands for. Sentinels map to `Null`;
    /// they never leave the engine in practice.
    pub fn into_bson(self) -> Bson {
        match self {
            IndexKey::MinValue | IndexKey::MaxValue | IndexKey::Null => Bson::Null,
            IndexKey::Int32(v) => Bson::Int32(v),
            IndexKey::Int64(v) => Bson::Int64(v),
            IndexKey::Double(v) => Bson::Double(v),
            IndexKey::String(v) => Bson::String(v),
            IndexKey::Boolean(v) => Bson::Boolean(v),
            IndexKey::DateTime(v) => Bson::DateTime(v),
            IndexKey::ObjectId(v) => Bson::ObjectId(v),
            IndexKey::Guid(v) => Bson::Binary(bson::Binary {
                subtype: BinarySubtype::Uuid,
                bytes: v.as_bytes().to_vec(),
            }),
            IndexKey::Binary(v) => Bson::Binary(bson::Binary {
                subtype: BinarySubtype::Generic,
                bytes: v,
            }),
        }
    }

    /// Serialized size: tag byte, u16 length prefix for the variable kinds,
    /// then the payload.
    pub fn key_length(&self) -> usize {
        let payload = match self {
            IndexKey::MinValue | IndexKey::Null | IndexKey::MaxValue => 0,
            IndexKey::Int32(_) => 4,
            IndexKey::Int64(_) => 8,
            IndexKey::Double(_) => 8,
            IndexKey::String(s) => s.len(),
            IndexKey::Binary(b) => b.len(),
            IndexKey::ObjectId(_) => 12,
            IndexKey::Guid(_) => 16,
            IndexKey::Boolean(_) => 1,
            IndexKey::DateTime(_) => 8,
        };

        let has_length_prefix = matches!(self, IndexKey::String(_) | IndexKey::Binary(_));

        1 + if has_length_prefix { 2 } else { 0 } + payload
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexKey::*;

        let order = self.type_order().cmp(&other.type_order());
        if order != Ordering::Equal {
            return order;
        }

        match (self, other) {
            (MinValue, MinValue) | (Null, Null) | (MaxValue, MaxValue) => Ordering::Equal,
            (Int32(a), Int32(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Int32(a), Int64(b)) => (*a as i64).cmp(b),
            (Int64(a), Int32(b)) => a.cmp(&(*b as i64)),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Int32(a), Double(b)) => (*a as f64).total_cmp(b),
            (Double(a), Int32(b)) => a.total_cmp(&(*b as f64)),
            (Int64(a), Double(b)) => (*a as f64).total_cmp(b),
            (Double(a), Int64(b)) => a.total_cmp(&(*b as f64)),
            (String(a), String(b)) => a.cmp(b),
            (Binary(a), Binary(b)) => a.cmp(b),
            (ObjectId(a), ObjectId(b)) => a.bytes().cmp(&b.bytes()),
            (Guid(a), Guid(b)) => a.cmp(b),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.timestamp_millis().cmp(&b.timestamp_millis()),
            _ => unreachable!("kinds with equal rank compared above"),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::MinValue => write!(f, "$minValue"),
            IndexKey::Null => write!(f, "null"),
            IndexKey::Int32(v) => write!(f, "{v}"),
            IndexKey::Int64(v) => write!(f, "{v}"),
            IndexKey::Double(v) => write!(f, "{v}"),
            IndexKey::String(v) => write!(f, "\"{v}\""),
            IndexKey::Binary(v) => write!(f, "binary({} bytes)", v.len()),
            IndexKey::ObjectId(v) => write!(f, "{v}"),
            IndexKey::Guid(v) => write!(f, "{v}"),
            IndexKey::Boolean(v) => write!(f, "{v}"),
            IndexKey::DateTime(v) => write!(f, "{}", v.timestamp_millis()),
            IndexKey::MaxValue => write!(f, "$maxValue"),
        }
    }
}

impl BufferSlice {
    pub fn read_index_key(&self, offset: usize) -> Result<IndexKey> {
        let tag = self.read_u8(offset);
        let p = offset + 1;

        let key = match tag {
            TAG_MIN_VALUE => IndexKey::MinValue,
            TAG_NULL => IndexKey::Null,
            TAG_INT32 => IndexKey::Int32(self.read_i32(p)),
            TAG_INT64 => IndexKey::Int64(self.read_i64(p)),
            TAG_DOUBLE => IndexKey::Double(self.read_f64(p)),
            TAG_STRING => {
                let len = self.read_u16(p) as usize;
                let bytes = self.read_bytes(p + 2, len).to_vec();
                IndexKey::String(
                    String::from_utf8(bytes).map_err(Error::invalid_format)?,
                )
            }
            TAG_BINARY => {
                let len = self.read_u16(p) as usize;
                IndexKey::Binary(self.read_bytes(p + 2, len).to_vec())
            }
            TAG_OBJECT_ID => {
                let bytes: [u8; 12] = self.read_bytes(p, 12).try_into().unwrap();
                IndexKey::ObjectId(bson::oid::ObjectId::from_bytes(bytes))
            }
            TAG_GUID => {
                let bytes: [u8; 16] = self.read_bytes(p, 16).try_into().unwrap();
                IndexKey::Guid(uuid::Uuid::from_bytes(bytes))
            }
            TAG_BOOLEAN => IndexKey::Boolean(self.read_bool(p)),
            TAG_DATE_TIME => IndexKey::DateTime(bson::DateTime::from_millis(self.read_i64(p))),
            TAG_MAX_VALUE => IndexKey::MaxValue,
            other => {
                return Err(Error::file_corrupted(format!("unknown index key tag {other}")));
            }
        };

        Ok(key)
    }

    pub fn write_index_key(&mut self, offset: usize, key: &IndexKey) {
        let p = offset + 1;

        match key {
            IndexKey::MinValue => self.write_u8(offset, TAG_MIN_VALUE),
            IndexKey::Null => self.write_u8(offset, TAG_NULL),
            IndexKey::Int32(v) => {
                self.write_u8(offset, TAG_INT32);
                self.write_i32(p, *v);
            }
            IndexKey::Int64(v) => {
                self.write_u8(offset, TAG_INT64);
                self.write_i64(p, *v);
            }
            IndexKey::Double(v) => {
                self.write_u8(offset, TAG_DOUBLE);
                self.write_f64(p, *v);
            }
            IndexKey::String(v) => {
                self.write_u8(offset, TAG_STRING);
                self.write_u16(p, v.len() as u16);
                self.write_bytes(p + 2, v.as_bytes());
            }
            IndexKey::Binary(v) => {
                self.write_u8(offset, TAG_BINARY);
                self.write_u16(p, v.len() as u16);
                self.write_bytes(p + 2, v);
            }
            IndexKey::ObjectId(v) => {
                self.write_u8(offset, TAG_OBJECT_ID);
                self.write_bytes(p, &v.bytes());
            }
            IndexKey::Guid(v) => {
                self.write_u8(offset, TAG_GUID);
                self.write_bytes(p, v.as_bytes());
            }
            IndexKey::Boolean(v) => {
                self.write_u8(offset, TAG_BOOLEAN);
                self.write_bool(p, *v);
            }
            IndexKey::DateTime(v) => {
                self.write_u8(offset, TAG_DATE_TIME);
                self.write_i64(p, v.timestamp_millis());
            }
            IndexKey::MaxValue => self.write_u8(offset, TAG_MAX_VALUE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(key: IndexKey) -> IndexKey {
        let mut buffer = vec![0u8; MAX_INDEX_KEY_LENGTH + 3];
        let slice = BufferSlice::new_mut(&mut buffer);
        slice.write_index_key(0, &key);
        slice.read_index_key(0).unwrap()
    }

    #[test]
    fn codec_roundtrip() {
        let keys = [
            IndexKey::MinValue,
            IndexKey::Null,
            IndexKey::Int32(-7),
            IndexKey::Int64(1 << 40),
            IndexKey::Double(2.5),
            IndexKey::String("city".into()),
            IndexKey::Binary(vec![1, 2, 3]),
            IndexKey::ObjectId(bson::oid::ObjectId::new()),
            IndexKey::Guid(uuid::Uuid::new_v4()),
            IndexKey::Boolean(true),
            IndexKey::DateTime(bson::DateTime::from_millis(1_700_000_000_000)),
            IndexKey::MaxValue,
        ];

        for key in keys {
            assert_eq!(roundtrip(key.clone()), key);
        }
    }

    #[test]
    fn sentinels_bound_everything() {
        let samples = [
            IndexKey::Null,
            IndexKey::Int32(i32::MIN),
            IndexKey::Double(f64::NEG_INFINITY),
            IndexKey::String(String::new()),
            IndexKey::Boolean(false),
            IndexKey::DateTime(bson::DateTime::from_millis(0)),
        ];

        for key in &samples {
            assert!(IndexKey::MinValue < *key);
            assert!(*key < IndexKey::MaxValue);
        }
    }

    #[test]
    fn numbers_compare_across_kinds() {
        assert!(IndexKey::Int32(2) < IndexKey::Int64(3));
        assert!(IndexKey::Double(2.5) > IndexKey::Int32(2));
        assert!(IndexKey::Double(2.5) < IndexKey::Int64(3));
        assert_eq!(
            IndexKey::Int32(5).cmp(&IndexKey::Int64(5)),
            Ordering::Equal
        );
    }

    #[test]
    fn kind_rank_orders_mixed_keys() {
        assert!(IndexKey::Null < IndexKey::Int32(0));
        assert!(IndexKey::Int64(i64::MAX) < IndexKey::String(String::new()));
        assert!(IndexKey::String("z".into()) < IndexKey::Boolean(false));
    }

    #[test]
    fn oversized_key_rejected() {
        let long = "x".repeat(MAX_INDEX_KEY_LENGTH);
        let err = IndexKey::from_bson("name", &Bson::String(long)).unwrap_err();
        assert!(matches!(err, crate::Error::IndexKeyTooLong { .. }));
    }
}
