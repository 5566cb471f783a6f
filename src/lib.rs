pub mod archive;
pub mod codecs;
pub mod error;
pub mod features;
pub mod info;
pub mod lazy;
pub mod mapper;
pub mod path;
pub mod reader;
pub mod store;
pub mod types;
pub mod value;
pub mod writer;

// Re-export key types at crate root for convenience.
pub use codecs::{CodecRegistry, Compression, LeafCodec, LeafKind};
pub use error::{ShardError, ShardResult};
pub use features::{Feature, Features};
pub use info::DatasetInfo;
pub use lazy::LazyValue;
pub use path::{MemberPath, Segment};
pub use reader::{Sample, SampleIter, ShardIndex, ShardReader};
pub use store::{DATASET_INFO_FILENAME, LocalStore};
pub use types::{ArrayData, DataType, ScalarValue, Tensor};
pub use value::Value;
pub use writer::{ShardWriter, WriterOptions};
