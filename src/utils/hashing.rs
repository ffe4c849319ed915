// Content hashing
//
// blake3 digests identify source files and aspect definitions in cache keys.

use rayon::prelude::*;

/// 64-character hex blake3 digest of `content`.
pub fn hash_content(content: &[u8]) -> String {
    let hash = blake3::hash(content);
    hash.to_hex().to_string()
}

/// Digests of many contents, computed in parallel, in input order.
pub fn hash_contents_batch<T: AsRef<[u8]> + Sync>(contents: &[T]) -> Vec<String> {
    contents
        .par_iter()
        .map(|content| hash_content(content.as_ref()))
        .collect()
}
