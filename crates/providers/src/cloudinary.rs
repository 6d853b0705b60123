use async_trait::async_trait;
use chrono::Utc;
use model::ProductImage;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use service::{ImageStore, ImageUpload, ProviderError};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::{check_status, transport};

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// # CloudinaryImageStore
///
/// Signed uploads and deletions against the Cloudinary upload API.
pub struct CloudinaryImageStore {
    client: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
    folder: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

impl CloudinaryImageStore {
    pub fn new(
        client: reqwest::Client,
        cloud_name: &str,
        api_key: &str,
        api_secret: &str,
        folder: &str,
    ) -> Self {
        Self {
            client,
            cloud_name: cloud_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            folder: folder.to_string(),
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{API_BASE}/{}/image/{action}", self.cloud_name)
    }
}

/// Request signature: the parameters sorted by name, joined as `k=v&…`,
/// followed by the API secret, hashed with SHA-256.
pub(crate) fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ImageStore for CloudinaryImageStore {
    #[instrument(skip_all, fields(file = %image.file_name, bytes = image.bytes.len()))]
    async fn upload(&self, image: ImageUpload) -> Result<ProductImage, ProviderError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(
            &[("folder", self.folder.as_str()), ("timestamp", timestamp.as_str())],
            &self.api_secret,
        );

        let mut file = Part::bytes(image.bytes.to_vec()).file_name(image.file_name);
        if let Some(content_type) = image.content_type {
            file = file
                .mime_str(&content_type)
                .map_err(|e| ProviderError::Payload(e.to_string()))?;
        }
        let form = Form::new()
            .part("file", file)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", self.folder.clone())
            .text("signature_algorithm", "sha256")
            .text("signature", signature);

        let response = self
            .client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let uploaded: UploadResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;
        debug!(public_id = %uploaded.public_id, "Image uploaded");
        Ok(ProductImage {
            url: uploaded.secure_url,
            public_id: uploaded.public_id,
        })
    }

    #[instrument(skip(self))]
    async fn destroy(&self, public_id: &str) -> Result<(), ProviderError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(
            &[("public_id", public_id), ("timestamp", timestamp.as_str())],
            &self.api_secret,
        );
        let form = [
            ("public_id", public_id),
            ("api_key", self.api_key.as_str()),
            ("timestamp", timestamp.as_str()),
            ("signature_algorithm", "sha256"),
            ("signature", signature.as_str()),
        ];
        let response = self
            .client
            .post(self.endpoint("destroy"))
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let outcome: DestroyResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;
        // "not found" means the image is already gone.
        match outcome.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(ProviderError::Rejected {
                status: 200,
                message: format!("destroy {public_id}: {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_sorts_parameters_and_skips_empty_ones() {
        let a = sign(&[("timestamp", "1700000000"), ("folder", "shop")], "secret");
        let b = sign(
            &[("folder", "shop"), ("timestamp", "1700000000"), ("tags", "")],
            "secret",
        );
        assert_eq!(a, b);

        let mut hasher = Sha256::new();
        hasher.update(b"folder=shop&timestamp=1700000000secret");
        assert_eq!(a, hex::encode(hasher.finalize()));
    }

    #[test]
    fn signature_depends_on_the_secret() {
        let params = [("public_id", "shop/abc"), ("timestamp", "1")];
        assert_ne!(sign(&params, "one"), sign(&params, "two"));
    }

    #[test]
    fn endpoints_are_scoped_to_the_cloud() {
        let store = CloudinaryImageStore::new(reqwest::Client::new(), "demo", "k", "s", "shop");
        assert_eq!(
            store.endpoint("upload"),
            "https://api.cloudinary.com/v1_1/demo/image/upload"
        );
    }
}
