/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Publishing: posts, sparks (short video) and stories. Media goes to object
//! storage under `{user_id}/{random}.{ext}` and the public URL lands in the
//! inserted row.

use chillz_protocol::Entity;
use rand::{rngs::OsRng, RngCore};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::error::{Result, ServiceError};
use crate::records::{format_timestamp, MediaKind, Post, Story};
use crate::session::Session;
use crate::ui_events::UiEvent;

/// Stories fall out of the rail a day after posting.
const STORY_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    fn kind(&self) -> MediaKind {
        match mime_guess::from_path(&self.filename).first() {
            Some(mime) if mime.type_() == "video" => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }

    fn content_type(&self) -> Option<String> {
        mime_guess::from_path(&self.filename)
            .first()
            .map(|m| m.to_string())
    }
}

pub struct Composer {
    session: Arc<Session>,
}

impl Composer {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Publish a regular post: optional media, caption. Content type is
    /// derived from what is attached (image with media, text without).
    pub async fn publish_post(&self, caption: &str, media: Option<MediaFile>) -> Result<Post> {
        let viewer = self.session.require_viewer()?.id.clone();
        let caption = caption.trim();
        if caption.is_empty() && media.is_none() {
            let err = ServiceError::write(anyhow::anyhow!("nothing to publish"));
            self.session.notify(UiEvent::write_failure("publish", &err));
            return Err(err);
        }
        let (content_type, content_url) = match media {
            Some(file) => {
                let kind = file.kind();
                let url = self.upload_media(&viewer, "posts", file).await?;
                (kind, Some(url))
            }
            None => (MediaKind::Text, None),
        };
        self.insert_post(&viewer, content_type, content_url, caption, false)
            .await
    }

    /// Publish a spark. Sparks are video-only.
    pub async fn publish_spark(&self, caption: &str, media: MediaFile) -> Result<Post> {
        let viewer = self.session.require_viewer()?.id.clone();
        if media.kind() != MediaKind::Video {
            let err = ServiceError::write(anyhow::anyhow!("sparks must include a video"));
            self.session.notify(UiEvent::write_failure("publish", &err));
            return Err(err);
        }
        let url = self.upload_media(&viewer, "sparks", media).await?;
        self.insert_post(&viewer, MediaKind::Video, Some(url), caption.trim(), true)
            .await
    }

    /// Publish a story, live for the next 24 hours.
    pub async fn publish_story(&self, caption: Option<&str>, media: MediaFile) -> Result<Story> {
        let viewer = self.session.require_viewer()?.id.clone();
        let kind = media.kind();
        let bucket = match kind {
            MediaKind::Video => "sparks",
            _ => "posts",
        };
        let url = self.upload_media(&viewer, bucket, media).await?;
        let expires_at =
            format_timestamp(OffsetDateTime::now_utc() + TimeDuration::hours(STORY_TTL_HOURS));
        let record = json!({
            "user_id": viewer,
            "content_url": url,
            "content_type": kind.as_str(),
            "caption": caption.map(str::trim).filter(|c| !c.is_empty()),
            "expires_at": expires_at,
        });
        let stored = match self.session.service().insert(Entity::Stories, record).await {
            Ok(row) => row,
            Err(e) => {
                self.session
                    .notify(UiEvent::write_failure("post story", &e));
                return Err(e);
            }
        };
        serde_json::from_value(stored)
            .map_err(|e| ServiceError::write(anyhow::anyhow!("decode stored story: {e}")))
    }

    async fn insert_post(
        &self,
        viewer: &str,
        content_type: MediaKind,
        content_url: Option<String>,
        caption: &str,
        is_spark: bool,
    ) -> Result<Post> {
        let record = json!({
            "user_id": viewer,
            "content_type": content_type.as_str(),
            "content_url": content_url,
            "caption": caption,
            "is_spark": is_spark,
        });
        let stored = match self.session.service().insert(Entity::Posts, record).await {
            Ok(row) => row,
            Err(e) => {
                self.session.notify(UiEvent::write_failure("publish", &e));
                return Err(e);
            }
        };
        serde_json::from_value(stored)
            .map_err(|e| ServiceError::write(anyhow::anyhow!("decode stored post: {e}")))
    }

    async fn upload_media(&self, viewer: &str, bucket: &str, file: MediaFile) -> Result<String> {
        let ext = Path::new(&file.filename)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("bin");
        let path = format!("{viewer}/{}.{ext}", new_object_id());
        let content_type = file.content_type();
        if let Err(e) = self
            .session
            .service()
            .upload(bucket, &path, &file.bytes, content_type.as_deref())
            .await
        {
            self.session.notify(UiEvent::write_failure("upload", &e));
            return Err(e);
        }
        Ok(self.session.service().public_url(bucket, &path))
    }
}

fn new_object_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    b.iter().map(|v| format!("{v:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_service::DataService;
    use crate::memory::MemoryService;
    use crate::records::parse_timestamp;
    use crate::session::Viewer;
    use chillz_protocol::Filter;
    use serde_json::Value;

    fn fixture(viewer: &str) -> (Arc<MemoryService>, Arc<Session>) {
        let svc = Arc::new(MemoryService::new());
        let session = Session::with_viewer(
            svc.clone(),
            Some(Viewer {
                id: viewer.to_string(),
                metadata: Value::Null,
            }),
        );
        (svc, Arc::new(session))
    }

    fn jpeg(name: &str) -> MediaFile {
        MediaFile {
            filename: name.to_string(),
            bytes: vec![0xFF, 0xD8, 0xFF],
        }
    }

    #[tokio::test]
    async fn text_post_without_media() {
        let (_svc, session) = fixture("me");
        let composer = Composer::new(session);
        let post = composer.publish_post("just words", None).await.expect("post");
        assert_eq!(post.content_type, MediaKind::Text);
        assert!(post.content_url.is_none());
        assert!(!post.is_spark);
    }

    #[tokio::test]
    async fn image_post_uploads_then_inserts() {
        let (svc, session) = fixture("me");
        let composer = Composer::new(session);
        let post = composer
            .publish_post("look", Some(jpeg("photo.jpg")))
            .await
            .expect("post");
        assert_eq!(post.content_type, MediaKind::Image);
        let url = post.content_url.expect("url");
        assert!(url.starts_with("memory://posts/me/"));
        assert!(url.ends_with(".jpg"));

        let path = url.trim_start_matches("memory://posts/");
        assert!(svc.stored_object("posts", path).is_some());
    }

    #[tokio::test]
    async fn empty_post_is_rejected_before_any_write() {
        let (svc, session) = fixture("me");
        let composer = Composer::new(session);
        assert!(composer.publish_post("   ", None).await.is_err());
        assert_eq!(svc.count(Entity::Posts, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sparks_require_video() {
        let (svc, session) = fixture("me");
        let composer = Composer::new(session);
        assert!(composer.publish_spark("nope", jpeg("pic.jpg")).await.is_err());

        let video = MediaFile {
            filename: "clip.mp4".to_string(),
            bytes: vec![0u8; 8],
        };
        let spark = composer.publish_spark("yes", video).await.expect("spark");
        assert!(spark.is_spark);
        assert_eq!(spark.content_type, MediaKind::Video);
        assert_eq!(
            svc.count(Entity::Posts, &[Filter::eq("is_spark", true)])
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn stories_get_a_deadline_a_day_out() {
        let (_svc, session) = fixture("me");
        let composer = Composer::new(session);
        let story = composer
            .publish_story(Some("bye"), jpeg("moment.jpg"))
            .await
            .expect("story");
        let expires = parse_timestamp(story.expires_at.as_deref().expect("deadline")).unwrap();
        let lead = expires - OffsetDateTime::now_utc();
        assert!(lead > TimeDuration::hours(23) && lead <= TimeDuration::hours(24));
        assert_eq!(story.caption.as_deref(), Some("bye"));
    }
}
