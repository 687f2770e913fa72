use std::{sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, REFERER},
};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::{
    error::{Result, SkipperError},
    types::{Comment, ContentId, TranscriptUnit, VideoId},
};

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

static DANMAKU_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<d p="([^"]*)">([^<]+)</d>"#).unwrap());

/// What a source produced for a video, with the content id it resolved on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub content_id: ContentId,
    pub unit: TranscriptUnit,
}

#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Looks up the content id of `video_id` over the network.
    async fn lookup_content_id(&self, video_id: &VideoId) -> Result<ContentId>;

    /// Timed comments for `content_id`. An empty list is a valid answer.
    async fn comments(&self, content_id: ContentId) -> Result<Vec<Comment>>;

    /// Text of the first subtitle track, one line per subtitle.
    async fn transcript(&self, video_id: &VideoId, content_id: ContentId) -> Result<String>;

    /// Danmaku first, subtitles as the fallback.
    ///
    /// `known` is a content id already present in the page, which saves the lookup.
    async fn resolve(&self, video_id: &VideoId, known: Option<ContentId>) -> Result<Resolved> {
        let content_id = match known {
            Some(cid) => cid,
            None => self.lookup_content_id(video_id).await.map_err(|e| {
                SkipperError::ResolutionFailure {
                    what: "content id",
                    video_id: video_id.to_string(),
                    reason: e.to_string(),
                }
            })?,
        };

        match self.comments(content_id).await {
            Ok(items) if !items.is_empty() => {
                info!(%video_id, cid = %content_id, count = items.len(), "extracted danmaku");
                return Ok(Resolved {
                    content_id,
                    unit: TranscriptUnit::CommentSet { items },
                });
            }
            Ok(_) => debug!(%video_id, cid = %content_id, "no danmaku, trying subtitles"),
            Err(e) => debug!(%video_id, cid = %content_id, "danmaku unavailable: {e}"),
        }

        let text = self.transcript(video_id, content_id).await?;
        info!(%video_id, cid = %content_id, chars = text.len(), "extracted subtitles");
        Ok(Resolved {
            content_id,
            unit: TranscriptUnit::Transcript { text },
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    cid: u64,
}

#[derive(Debug, Deserialize)]
struct PlayerInfo {
    #[serde(default)]
    subtitle: Option<SubtitleInfo>,
}

#[derive(Debug, Deserialize)]
struct SubtitleInfo {
    #[serde(default)]
    subtitles: Vec<SubtitleTrack>,
}

#[derive(Debug, Deserialize)]
struct SubtitleTrack {
    subtitle_url: String,
}

#[derive(Debug, Deserialize)]
struct SubtitleBody {
    body: Vec<SubtitleLine>,
}

#[derive(Debug, Deserialize)]
struct SubtitleLine {
    content: String,
}

/// HTTP client with the browser-like headers the Bilibili API expects.
pub fn default_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(REFERER, HeaderValue::from_static(BilibiliSource::BASE_URL));

    Ok(Client::builder()
        .user_agent(DEFAULT_UA)
        .default_headers(headers)
        .timeout(Duration::from_secs(30))
        .build()?)
}

pub struct BilibiliSource {
    client: Client,
    api_base: String,
}

impl BilibiliSource {
    pub const BASE_URL: &str = "https://www.bilibili.com";
    pub const API_BASE: &str = "https://api.bilibili.com";

    const PAGE_LIST_PATH: &str = "/x/player/pagelist";
    const DANMAKU_PATH: &str = "/x/v1/dm/list.so";
    const PLAYER_INFO_PATH: &str = "/x/player/v2";

    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_base: Self::API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn scheme(&self) -> &str {
        self.api_base
            .split_once("://")
            .map_or("https", |(scheme, _)| scheme)
    }

    async fn get_api<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.api_base, path);
        debug!(%url, ?params, "bilibili api request");

        let response: ApiResponse<T> = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.code != 0 {
            return Err(SkipperError::source_unavailable(
                "bilibili api",
                format!("{path} returned code {}: {}", response.code, response.message),
            ));
        }

        response
            .data
            .ok_or_else(|| SkipperError::source_unavailable("bilibili api", format!("{path} returned no data")))
    }
}

#[async_trait]
impl TranscriptSource for BilibiliSource {
    async fn lookup_content_id(&self, video_id: &VideoId) -> Result<ContentId> {
        let pages: Vec<PageEntry> = self
            .get_api(Self::PAGE_LIST_PATH, &[("bvid", video_id.to_string())])
            .await?;

        let page = pages.first().ok_or_else(|| SkipperError::ResolutionFailure {
            what: "content id",
            video_id: video_id.to_string(),
            reason: "page list is empty".to_string(),
        })?;

        debug!(%video_id, cid = page.cid, "resolved cid via page list");
        Ok(ContentId(page.cid))
    }

    async fn comments(&self, content_id: ContentId) -> Result<Vec<Comment>> {
        let url = format!("{}{}", self.api_base, Self::DANMAKU_PATH);
        let xml = self
            .client
            .get(&url)
            .query(&[("oid", content_id.to_string())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(parse_danmaku(&xml))
    }

    async fn transcript(&self, video_id: &VideoId, content_id: ContentId) -> Result<String> {
        let info: PlayerInfo = self
            .get_api(
                Self::PLAYER_INFO_PATH,
                &[
                    ("cid", content_id.to_string()),
                    ("bvid", video_id.to_string()),
                ],
            )
            .await?;

        let track = info
            .subtitle
            .and_then(|s| s.subtitles.into_iter().next())
            .ok_or_else(|| SkipperError::source_unavailable("subtitles", "video has no subtitle tracks"))?;

        let url = subtitle_url(&track.subtitle_url, self.scheme());
        debug!(%video_id, %url, "fetching subtitle track");

        let body: SubtitleBody = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = join_subtitle_lines(&body);
        if text.trim().is_empty() {
            return Err(SkipperError::source_unavailable("subtitles", "subtitle track is empty"));
        }
        Ok(text)
    }
}

/// Parses `<d p="time,...">text</d>` entries of a danmaku XML document.
///
/// Entries whose first `p` field is not a number are skipped.
pub fn parse_danmaku(xml: &str) -> Vec<Comment> {
    DANMAKU_REGEX
        .captures_iter(xml)
        .filter_map(|caps| {
            let time = caps[1].split(',').next()?.trim().parse::<f64>().ok()?;
            time.is_finite()
                .then(|| Comment::new(time, unescape_xml(&caps[2])))
        })
        .collect()
}

fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Makes a subtitle track URL absolute.
///
/// Protocol-relative URLs take `scheme` (the scheme of the API base); plain
/// `http://` URLs are upgraded to https.
pub fn subtitle_url(url: &str, scheme: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{rest}")
    } else if url.starts_with("//") {
        format!("{scheme}:{url}")
    } else {
        url.to_string()
    }
}

fn join_subtitle_lines(body: &SubtitleBody) -> String {
    body.body
        .iter()
        .map(|line| line.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;

    const DANMAKU_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><i><chatserver>chat.bilibili.com</chatserver><chatid>1176840</chatid>
<d p="61.20000,1,25,16777215,1700000000,0,abc123,1">恰饭恰饭</d>
<d p="oops,1,25,16777215,1700000000,0,abc124,2">bad time</d>
<d p="63.5,1,25,16777215,1700000000,0,abc125,3">谢谢你4分35狼 &amp; 再见</d>
<d p="12,1,25,16777215,1700000000,0,abc126,4">前排</d>
</i>"#;

    fn source(server: &Server) -> BilibiliSource {
        BilibiliSource::new(Client::new()).with_api_base(server.url())
    }

    #[test]
    fn parses_danmaku_and_drops_bad_times() {
        let comments = parse_danmaku(DANMAKU_XML);
        assert_eq!(
            comments,
            vec![
                Comment::new(61.2, "恰饭恰饭"),
                Comment::new(63.5, "谢谢你4分35狼 & 再见"),
                Comment::new(12.0, "前排"),
            ]
        );
    }

    #[test]
    fn empty_document_has_no_comments() {
        assert!(parse_danmaku("<i></i>").is_empty());
    }

    #[test]
    fn subtitle_urls_are_made_absolute() {
        assert_eq!(
            subtitle_url("http://i0.hdslb.com/bfs/subtitle/a.json", "https"),
            "https://i0.hdslb.com/bfs/subtitle/a.json"
        );
        assert_eq!(
            subtitle_url("//aisubtitle.hdslb.com/bfs/ai_subtitle/prod/b.json", "https"),
            "https://aisubtitle.hdslb.com/bfs/ai_subtitle/prod/b.json"
        );
        assert_eq!(subtitle_url("https://x/y.json", "http"), "https://x/y.json");
    }

    #[test]
    fn subtitle_lines_join_in_order() -> anyhow::Result<()> {
        let body: SubtitleBody = serde_json::from_str(
            r#"{"font_size":0.4,"body":[{"from":0.1,"to":2.0,"content":"大家好"},{"from":2.0,"to":4.5,"content":"本期视频由某某赞助"}]}"#,
        )?;
        assert_eq!(join_subtitle_lines(&body), "大家好\n本期视频由某某赞助");
        Ok(())
    }

    #[tokio::test]
    async fn resolves_cid_and_returns_comments() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        let pagelist = server
            .mock("GET", "/x/player/pagelist")
            .match_query(Matcher::UrlEncoded("bvid".into(), "BV1xx411c7mD".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":0,"message":"0","data":[{"cid":1176840,"page":1,"part":"P1"}]}"#)
            .create_async()
            .await;
        let danmaku = server
            .mock("GET", "/x/v1/dm/list.so")
            .match_query(Matcher::UrlEncoded("oid".into(), "1176840".into()))
            .with_header("content-type", "text/xml")
            .with_body(DANMAKU_XML)
            .create_async()
            .await;

        let resolved = source(&server)
            .resolve(&VideoId::new("BV1xx411c7mD"), None)
            .await?;

        pagelist.assert_async().await;
        danmaku.assert_async().await;
        assert_eq!(resolved.content_id, ContentId(1176840));
        match resolved.unit {
            TranscriptUnit::CommentSet { items } => assert_eq!(items.len(), 3),
            other => panic!("expected comments, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn known_cid_skips_lookup() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        let pagelist = server
            .mock("GET", "/x/player/pagelist")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        server
            .mock("GET", "/x/v1/dm/list.so")
            .match_query(Matcher::Any)
            .with_body(DANMAKU_XML)
            .create_async()
            .await;

        let resolved = source(&server)
            .resolve(&VideoId::new("BV1xx411c7mD"), Some(ContentId(42)))
            .await?;

        pagelist.assert_async().await;
        assert_eq!(resolved.content_id, ContentId(42));
        Ok(())
    }

    #[tokio::test]
    async fn failed_lookup_is_a_resolution_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/x/player/pagelist")
            .match_query(Matcher::Any)
            .with_body(r#"{"code":-404,"message":"啥都木有","data":null}"#)
            .create_async()
            .await;

        let err = source(&server)
            .resolve(&VideoId::new("BV1missing000"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SkipperError::ResolutionFailure { .. }), "{err}");
    }

    #[tokio::test]
    async fn empty_danmaku_without_subtitles_is_unavailable() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/x/v1/dm/list.so")
            .match_query(Matcher::Any)
            .with_body("<i></i>")
            .create_async()
            .await;
        let player = server
            .mock("GET", "/x/player/v2")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("cid".into(), "7".into()),
                Matcher::UrlEncoded("bvid".into(), "BV1nosubs0000".into()),
            ]))
            .with_body(r#"{"code":0,"data":{"subtitle":{"subtitles":[]}}}"#)
            .create_async()
            .await;

        let err = source(&server)
            .resolve(&VideoId::new("BV1nosubs0000"), Some(ContentId(7)))
            .await
            .unwrap_err();

        player.assert_async().await;
        assert!(matches!(err, SkipperError::SourceUnavailable { .. }), "{err}");
    }

    #[tokio::test]
    async fn empty_danmaku_falls_back_to_subtitle_track() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/x/v1/dm/list.so")
            .match_query(Matcher::Any)
            .with_body("<i></i>")
            .create_async()
            .await;
        let track_url = format!("//{}/bfs/ai_subtitle/prod/track.json", server.host_with_port());
        server
            .mock("GET", "/x/player/v2")
            .match_query(Matcher::UrlEncoded("cid".into(), "11".into()))
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"code":0,"message":"0","data":{{"subtitle":{{"subtitles":[{{"lan":"ai-zh","subtitle_url":"{track_url}"}}]}}}}}}"#
            ))
            .create_async()
            .await;
        let track = server
            .mock("GET", "/bfs/ai_subtitle/prod/track.json")
            .with_header("content-type", "application/json")
            .with_body(r#"{"body":[{"from":0.5,"to":2.0,"content":"大家好"},{"from":2.0,"to":4.0,"content":"本期视频由某某赞助"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let resolved = source(&server)
            .resolve(&VideoId::new("BV1subs000000"), Some(ContentId(11)))
            .await?;

        track.assert_async().await;
        assert_eq!(
            resolved.unit,
            TranscriptUnit::Transcript {
                text: "大家好\n本期视频由某某赞助".into()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn danmaku_server_error_falls_back_to_subtitles() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/x/v1/dm/list.so")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        let player = server
            .mock("GET", "/x/player/v2")
            .match_query(Matcher::Any)
            .with_body(r#"{"code":0,"data":{}}"#)
            .expect(1)
            .create_async()
            .await;

        let result = source(&server)
            .resolve(&VideoId::new("BV1dmdown0000"), Some(ContentId(9)))
            .await;

        player.assert_async().await;
        assert!(result.is_err());
    }
}
