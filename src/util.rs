//! Assorted utility functions and structures.

use busboy_common::error::Error;
use std::{cell::RefCell, fs::File, io::Read, rc::Rc};

/// Shared mutable type able to be passed between types
/// allowing for circular referencing and interior mutability.
pub type SharedMut<T> = Rc<RefCell<T>>;

/// Reads the contents of the file at the given path into
/// a vector of bytes.
pub fn read_file(path: &str) -> Result<Vec<u8>, Error> {
    let mut file =
        File::open(path).map_err(|_| Error::Io(format!("Failed to open file: {}", path)))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|_| Error::Io(format!("Failed to read from file: {}", path)))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::read_file;

    #[test]
    fn test_read_file_missing() {
        let result = read_file("/path/that/does/not/exist.gb");
        assert!(result.is_err());
    }
}
