//! Google Drive client.

use chrono::{DateTime, Utc};
use rand::Rng as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::rest::RestClient;
use crate::transport::{HttpRequest, Method};

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id, name, mimeType, size, modifiedTime, parents, webViewLink, iconLink";

/// Metadata for one file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Byte size; absent for folders and Google-native documents.
    #[serde(default, deserialize_with = "size_from_string", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_link: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Google Docs, Sheets and Slides have no binary content and must be
    /// exported instead of downloaded.
    pub fn is_google_native(&self) -> bool {
        self.mime_type.starts_with("application/vnd.google-apps.") && !self.is_folder()
    }
}

/// Drive sends int64 values as JSON strings.
fn size_from_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Text(String),
        Number(u64),
    }
    match Option::<Size>::deserialize(deserializer)? {
        Some(Size::Text(text)) => text.parse().map(Some).map_err(serde::de::Error::custom),
        Some(Size::Number(n)) => Ok(Some(n)),
        None => Ok(None),
    }
}

/// One page of a file listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Content for [`DriveClient::upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }
}

/// Quotes a value for use inside a Drive query string literal.
pub fn quote_query_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Builds a `multipart/related` body: JSON metadata, then the content.
/// Returns the content type (with boundary) and the body.
fn multipart_related(metadata: &serde_json::Value, file: &UploadFile) -> (String, Vec<u8>) {
    let boundary = format!("campusdesk-{:016x}", rand::rng().random::<u64>());
    let mut body = Vec::with_capacity(file.data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {}\r\n\r\n",
            file.mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(&file.data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/related; boundary={boundary}"), body)
}

/// Drive operations for the signed-in user.
#[derive(Debug, Clone)]
pub struct DriveClient {
    rest: RestClient,
    upload_base: String,
}

impl DriveClient {
    pub fn new(rest: RestClient, upload_base: impl Into<String>) -> Self {
        Self {
            rest,
            upload_base: upload_base.into(),
        }
    }

    /// A copy whose calls stop at `cancel`.
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self::new(self.rest.scoped(cancel), self.upload_base.clone())
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    fn file_url(&self, id: &str) -> String {
        self.rest
            .endpoint(&format!("files/{}", urlencoding::encode(id)))
    }

    /// One page of files matching a Drive query (`q`), or all files.
    pub async fn list_files(
        &self,
        query: Option<&str>,
        page_size: u32,
        page_token: Option<&str>,
    ) -> ApiResult<FilePage> {
        self.list_ordered(query, page_size, page_token, None).await
    }

    /// One page of the non-trashed children of `parent_id`, folders first.
    pub async fn list_folder(
        &self,
        parent_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> ApiResult<FilePage> {
        let query = format!(
            "{} in parents and trashed = false",
            quote_query_value(parent_id)
        );
        self.list_ordered(Some(&query), page_size, page_token, Some("folder,name"))
            .await
    }

    async fn list_ordered(
        &self,
        query: Option<&str>,
        page_size: u32,
        page_token: Option<&str>,
        order_by: Option<&str>,
    ) -> ApiResult<FilePage> {
        let request = HttpRequest::get(self.rest.endpoint("files"))
            .query("pageSize", page_size.to_string())
            .query("fields", format!("nextPageToken, files({FILE_FIELDS})"))
            .query_opt("q", query)
            .query_opt("orderBy", order_by)
            .query_opt("pageToken", page_token);
        let page: FilePage = self.rest.fetch(request).await?;
        debug!(count = page.files.len(), more = page.next_page_token.is_some(), "listed files");
        Ok(page)
    }

    pub async fn get_file(&self, id: &str) -> ApiResult<DriveFile> {
        let request = HttpRequest::get(self.file_url(id)).query("fields", FILE_FIELDS);
        self.rest.fetch(request).await
    }

    /// Creates a folder; `parent_id` of `None` means the Drive root.
    pub async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> ApiResult<DriveFile> {
        if name.trim().is_empty() {
            return Err(ApiError::validation("folder name must not be empty")
                .with_provider(self.rest.provider()));
        }
        let mut metadata = json!({"name": name, "mimeType": FOLDER_MIME_TYPE});
        if let Some(parent) = parent_id {
            metadata["parents"] = json!([parent]);
        }
        let request = HttpRequest::post(self.rest.endpoint("files"))
            .query("fields", FILE_FIELDS)
            .json(metadata);
        self.rest.fetch(request).await
    }

    /// Uploads `file` in one multipart request.
    pub async fn upload(&self, file: &UploadFile, parent_id: Option<&str>) -> ApiResult<DriveFile> {
        let mut metadata = json!({"name": file.name, "mimeType": file.mime_type});
        if let Some(parent) = parent_id {
            metadata["parents"] = json!([parent]);
        }
        let (content_type, body) = multipart_related(&metadata, file);
        let url = format!("{}/files", self.upload_base.trim_end_matches('/'));
        let request = HttpRequest::post(url)
            .query("uploadType", "multipart")
            .query("fields", FILE_FIELDS)
            .raw(content_type, body);
        let created: DriveFile = self.rest.fetch(request).await?;
        debug!(id = %created.id, bytes = file.data.len(), "uploaded file");
        Ok(created)
    }

    pub async fn rename(&self, id: &str, name: &str) -> ApiResult<DriveFile> {
        if name.trim().is_empty() {
            return Err(ApiError::validation("new name must not be empty")
                .with_provider(self.rest.provider()));
        }
        let request = HttpRequest::new(Method::Patch, self.file_url(id))
            .query("fields", FILE_FIELDS)
            .json(json!({"name": name}));
        self.rest.fetch(request).await
    }

    /// Permanently deletes a file, bypassing the trash.
    pub async fn delete(&self, id: &str) -> ApiResult<()> {
        self.rest
            .execute(HttpRequest::new(Method::Delete, self.file_url(id)))
            .await
    }

    /// Raw content of a binary file.
    pub async fn download(&self, id: &str) -> ApiResult<Vec<u8>> {
        let request = HttpRequest::get(self.file_url(id)).query("alt", "media");
        self.rest.fetch_bytes(request).await
    }

    /// A Google-native document converted to `mime_type`.
    pub async fn export(&self, id: &str, mime_type: &str) -> ApiResult<Vec<u8>> {
        let url = format!("{}/export", self.file_url(id));
        let request = HttpRequest::get(url).query("mimeType", mime_type);
        self.rest.fetch_bytes(request).await
    }
}
