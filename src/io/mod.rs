mod blob_store;
mod endian;
mod s3_store;

pub use blob_store::{validate_key, BlobStore, LocalBlobStore, MemoryBlobStore};
pub use endian::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};
pub use s3_store::{create_s3_client, S3BlobStore};
