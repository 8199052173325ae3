mod array_storage;
mod de;
mod features;
mod host_object;
mod same_value_zero;
mod ser;
mod tags;
mod value;

pub use crate::array_storage::ArrayStorage;
pub use crate::array_storage::DenseArrayStorage;
pub use crate::array_storage::ElementOrder;
pub use crate::array_storage::JsArrayStorage;
pub use crate::array_storage::SparseArrayStorage;
pub use crate::de::ParseError;
pub use crate::de::ParseErrorKind;
pub use crate::de::ValueDeserializer;
pub use crate::features::FeatureSet;
pub use crate::features::Version;
pub use crate::host_object::HostObjectHandler;
pub use crate::host_object::NodeJsArrayBufferViewHostObjectHandler;
pub use crate::same_value_zero::same_value_zero;
pub use crate::same_value_zero::SameValueZeroKey;
pub use crate::ser::SerializationError;
pub use crate::ser::ValueSerializer;
pub use crate::value::ArrayBuffer;
pub use crate::value::ArrayBufferView;
pub use crate::value::ArrayBufferViewKind;
pub use crate::value::Date;
pub use crate::value::Error as ErrorValue;
pub use crate::value::ErrorName;
pub use crate::value::Heap;
pub use crate::value::HeapBuildError;
pub use crate::value::HeapBuilder;
pub use crate::value::HeapReference;
pub use crate::value::HeapValue;
pub use crate::value::JsArray;
pub use crate::value::Map;
pub use crate::value::Object;
pub use crate::value::OneByteString;
pub use crate::value::PropertyKey;
pub use crate::value::RegExp;
pub use crate::value::RegExpFlags;
pub use crate::value::Set;
pub use crate::value::StringValue;
pub use crate::value::value_eq;
pub use crate::value::TwoByteString;
pub use crate::value::Value;
pub use crate::value::Wtf8String;
