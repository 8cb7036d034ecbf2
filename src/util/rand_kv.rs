use bytes::Bytes;

/// Deterministic test key for index `i`.
pub fn get_test_key(i: usize) -> Bytes {
  Bytes::from(std::format!("emberkv-key-{:09}", i))
}

/// Test value for index `i`, padded so rotation kicks in quickly.
pub fn get_test_value(i: usize) -> Bytes {
  Bytes::from(std::format!(
    "emberkv-value-padding-padding-padding-{:09}",
    i
  ))
}
