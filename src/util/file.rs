use std::{fs, path::Path};

/// Total size in bytes of everything under `dir_path`.
pub fn dir_disk_size<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  let mut total = 0;
  if let Ok(entries) = fs::read_dir(&dir_path) {
    for entry in entries.flatten() {
      if let Ok(meta) = entry.metadata() {
        if meta.is_dir() {
          total += dir_disk_size(entry.path());
        } else {
          total += meta.len();
        }
      }
    }
  }
  total
}

/// Free bytes on the filesystem holding the current directory.
pub fn available_disk_space() -> u64 {
  if let Ok(cur_dir) = std::env::current_dir() {
    if let Ok(free) = fs2::available_space(cur_dir) {
      return free;
    }
  }
  0
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;

  #[test]
  fn test_dir_disk_size() {
    let dir = PathBuf::from("/tmp/emberkv-util-dirsize");
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    assert_eq!(dir_disk_size(&dir), 0);

    fs::write(dir.join("a"), b"0123456789").unwrap();
    fs::create_dir_all(dir.join("sub")).unwrap();
    fs::write(dir.join("sub").join("b"), b"01234").unwrap();
    assert_eq!(dir_disk_size(&dir), 15);

    fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn test_available_disk_space() {
    assert!(available_disk_space() > 0);
  }
}
