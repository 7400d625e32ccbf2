use crate::auth::Scope;
use crate::companion::CompanionClient;
use crate::error::{RequestError, Result, TvError};
use crate::session::ConnectionSession;
use crate::types::{ContentId, ContentItem, ImageType, MatteCatalog, MatteDescriptor, PhotoFilter};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Picture-frame content management over the companion surface
///
/// When built with a session, every operation first checks that the
/// session's credentials permit content management.
#[derive(Clone)]
pub struct ContentController {
    companion: Arc<CompanionClient>,
    session: Option<Arc<ConnectionSession>>,
}

#[derive(Deserialize)]
struct UploadReceipt {
    content_id: ContentId,
}

impl ContentController {
    pub fn new(companion: Arc<CompanionClient>, session: Option<Arc<ConnectionSession>>) -> Self {
        Self { companion, session }
    }

    /// Everything in the content library
    pub async fn list_content(&self) -> Result<Vec<ContentItem>> {
        self.authorize()?;
        let body: Value = self.companion.get_json("art/content").await?;
        Ok(list_from(body, "content_list")?)
    }

    /// Upload an image and return the id the device assigned to it
    ///
    /// The new item may not show up in [`list_content`](Self::list_content)
    /// right away; use [`wait_for_content`](Self::wait_for_content) to confirm.
    pub async fn upload(
        &self,
        data: Vec<u8>,
        image_type: ImageType,
        matte: Option<&MatteDescriptor>,
    ) -> Result<ContentId> {
        self.authorize()?;
        let matte = matte.map(MatteDescriptor::as_param).unwrap_or_else(|| "none".to_string());
        let url = format!("art/content?type={}&matte={}", image_type.as_param(), matte);
        let size = data.len();

        let response = self
            .companion
            .request(
                Method::POST,
                &url,
                vec![("Content-Type".to_string(), image_type.mime_type().to_string())],
                Some(data),
            )
            .await?;
        let receipt: UploadReceipt = response.json()?;

        tracing::info!("Uploaded {} bytes as {}", size, receipt.content_id);
        Ok(receipt.content_id)
    }

    /// Display `id`, optionally switching the screen to it right away
    pub async fn select(&self, id: &str, show: bool) -> Result<()> {
        self.authorize()?;
        let url = format!("art/content/{}/select?show={}", id, show);
        self.companion.request(Method::PUT, &url, Vec::new(), None).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.authorize()?;
        let url = format!("art/content/{}", id);
        self.companion.request(Method::DELETE, &url, Vec::new(), None).await?;
        tracing::info!("Deleted content {}", id);
        Ok(())
    }

    pub async fn filters(&self) -> Result<Vec<PhotoFilter>> {
        self.authorize()?;
        let body: Value = self.companion.get_json("art/filters").await?;
        Ok(list_from(body, "filter_list")?)
    }

    pub async fn mattes(&self) -> Result<MatteCatalog> {
        self.authorize()?;
        Ok(self.companion.get_json("art/mattes").await?)
    }

    /// Item currently on screen
    pub async fn current(&self) -> Result<ContentItem> {
        self.authorize()?;
        Ok(self.companion.get_json("art/content/current").await?)
    }

    /// Poll the library until `id` appears
    ///
    /// Returns false if it is still missing after `attempts` listings.
    pub async fn wait_for_content(&self, id: &str, attempts: u32, interval: Duration) -> Result<bool> {
        for attempt in 1..=attempts {
            if self.list_content().await?.iter().any(|item| item.content_id == id) {
                return Ok(true);
            }
            tracing::debug!("{} not listed yet (attempt {}/{})", id, attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Ok(false)
    }

    fn authorize(&self) -> Result<()> {
        match &self.session {
            Some(session) => session.authorize(Scope::Content),
            None => Ok(()),
        }
    }
}

/// Listings arrive either as a bare array or wrapped under `key`
fn list_from<T: DeserializeOwned>(body: Value, key: &str) -> std::result::Result<Vec<T>, TvError> {
    let list = match body {
        Value::Array(_) => body,
        Value::Object(mut map) => map
            .remove(key)
            .ok_or_else(|| RequestError::MalformedBody(format!("missing {}", key)))?,
        other => {
            return Err(RequestError::MalformedBody(format!("expected a list, got {}", other)).into())
        }
    };
    serde_json::from_value(list).map_err(|e| RequestError::MalformedBody(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_accepts_bare_and_wrapped_arrays() {
        let bare: Vec<PhotoFilter> =
            list_from(json!([{ "filter_id": "ink", "filter_name": "Ink" }]), "filter_list").unwrap();
        assert_eq!(bare[0].filter_id, "ink");

        let wrapped: Vec<ContentItem> = list_from(
            json!({ "content_list": [{ "content_id": "MY_F0003", "width": 3840 }] }),
            "content_list",
        )
        .unwrap();
        assert_eq!(wrapped[0].content_id, "MY_F0003");
        assert_eq!(wrapped[0].width, Some(3840));

        assert!(matches!(
            list_from::<ContentItem>(json!({ "items": [] }), "content_list"),
            Err(TvError::Request(RequestError::MalformedBody(_)))
        ));
    }
}
