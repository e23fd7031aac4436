use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use sha2::{Sha256, Digest};

/// SHA-256 of an in-memory buffer, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Compute SHA256 hash of a file asynchronously.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 1024 * 8];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 { break; }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether the file at `path` holds exactly `data`.
pub async fn same_content(path: &Path, data: &[u8]) -> std::io::Result<bool> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.len() != data.len() as u64 {
        return Ok(false);
    }
    Ok(sha256_file(path).await? == sha256_hex(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_and_buffer_digests_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(sha256_file(&path).await.unwrap(), sha256_hex(b"hello"));
        assert!(same_content(&path, b"hello").await.unwrap());
        assert!(!same_content(&path, b"hellO").await.unwrap());
        assert!(!same_content(&path, b"hello!").await.unwrap());
    }
}
