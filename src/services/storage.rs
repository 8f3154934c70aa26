use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::core::config::Settings;

/// Blob layout: source PDFs under `copies/source/`, page rasters under
/// `copies/pages/{copy_id}/p{NNN}.png`, finalized PDFs under `copies/final/`.
pub(crate) fn source_pdf_key(copy_id: &str) -> String {
    format!("copies/source/{copy_id}.pdf")
}

pub(crate) fn page_key(copy_id: &str, page_index: usize) -> String {
    format!("copies/pages/{copy_id}/p{page_index:03}.png")
}

pub(crate) fn final_pdf_key(copy_id: &str) -> String {
    format!("copies/final/{copy_id}.pdf")
}

pub(crate) fn staged_pdf_key(copy_id: &str) -> String {
    format!("copies/staged/{copy_id}.pdf")
}

#[derive(Debug, Clone)]
pub(crate) struct StorageService {
    client: Client,
    bucket: String,
}

impl StorageService {
    pub(crate) async fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        if settings.s3().access_key.is_empty() || settings.s3().secret_key.is_empty() {
            return Ok(None);
        }

        let creds = Credentials::new(
            settings.s3().access_key.clone(),
            settings.s3().secret_key.clone(),
            None,
            None,
            "korrigo-static",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(settings.s3().endpoint.clone())
            .region(aws_config::Region::new(settings.s3().region.clone()))
            .credentials_provider(creds)
            .load()
            .await;

        let client = Client::new(&config);

        Ok(Some(Self { client, bucket: settings.s3().bucket.clone() }))
    }

    pub(crate) async fn upload_bytes(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<(i64, String)> {
        let size = bytes.len() as i64;
        let hash = Sha256::digest(&bytes);
        let hash_hex = hex::encode(hash);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await?;

        Ok((size, hash_hex))
    }

    pub(crate) async fn download_bytes(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let object =
            self.client.get_object().bucket(&self.bucket).key(key).send().await?;
        let bytes = object.body.collect().await?.into_bytes();
        Ok(bytes.to_vec())
    }

    /// Server-side copy, used to promote a staged blob to its final key.
    pub(crate) async fn copy_object(&self, from: &str, to: &str) -> anyhow::Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, from))
            .key(to)
            .send()
            .await?;
        Ok(())
    }

    pub(crate) async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client.delete_object().bucket(&self.bucket).key(key).send().await?;
        Ok(())
    }

    pub(crate) async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> anyhow::Result<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(expires_in)?)
            .await?;

        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_stable() {
        assert_eq!(page_key("c-1", 0), "copies/pages/c-1/p000.png");
        assert_eq!(page_key("c-1", 12), "copies/pages/c-1/p012.png");
        assert_eq!(final_pdf_key("c-1"), "copies/final/c-1.pdf");
        assert_eq!(staged_pdf_key("c-1"), "copies/staged/c-1.pdf");
        assert_eq!(source_pdf_key("c-1"), "copies/source/c-1.pdf");
    }

    #[tokio::test]
    async fn presign_get_returns_url() {
        let _guard = crate::test_support::env_lock().await;
        crate::test_support::set_test_env();
        crate::test_support::set_test_storage_env();

        let settings = Settings::load().expect("settings");
        let storage = StorageService::from_settings(&settings)
            .await
            .expect("storage")
            .expect("storage enabled");

        let url = storage
            .presign_get(&final_pdf_key("copy-1"), Duration::from_secs(300))
            .await
            .expect("presign get");

        assert!(url.contains("copy-1.pdf"));
    }
}
