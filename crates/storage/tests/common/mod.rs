pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{chunked_stream, read_to_vec, seeded_bytes, sha256_hash};
