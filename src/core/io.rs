use async_trait::async_trait;
use anyhow::{Context, Result};

#[cfg(target_arch = "wasm32")]
pub trait StorageBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> StorageBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait StorageBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> StorageBounds for T {}

/// Where batch files are read from and exported artifacts land.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Storage: StorageBounds {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;

    async fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", path))
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[derive(Default)]
pub struct NativeStorage;

#[cfg(not(target_arch = "wasm32"))]
impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_native_storage_roundtrip_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/hero_001.png");
        let path_str = path.to_str().unwrap();
        let storage = NativeStorage::new();

        assert!(!storage.exists(path_str).await.unwrap());
        storage.write(path_str, b"\x89PNG").await.unwrap();
        assert!(storage.exists(path_str).await.unwrap());
        assert_eq!(storage.read(path_str).await.unwrap(), b"\x89PNG");
    }

    #[tokio::test]
    async fn test_read_to_string_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        let path_str = path.to_str().unwrap();
        let storage = NativeStorage::new();

        storage.write(path_str, &[0xff, 0xfe]).await.unwrap();
        assert!(storage.read_to_string(path_str).await.is_err());
    }
}
