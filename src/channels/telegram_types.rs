//! Telegram Bot API wire types and entity → inline markup rendering.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::pipeline::types::{AttachmentKind, AttachmentRef, RawEvent};

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
}

impl Update {
    pub fn into_message(self) -> Option<Message> {
        self.message.or(self.channel_post)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    /// Offset in UTF-16 code units.
    pub offset: usize,
    /// Length in UTF-16 code units.
    pub length: usize,
    pub url: Option<String>,
    pub user: Option<User>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_size: Option<u64>,
}

/// Shared shape of video, document, animation, audio and voice objects.
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// Result of `getFile`.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramFile {
    pub file_id: String,
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    #[serde(default)]
    pub date: i64,
    pub media_group_id: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_entities: Vec<MessageEntity>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub video: Option<FileInfo>,
    pub document: Option<FileInfo>,
    pub animation: Option<FileInfo>,
    pub audio: Option<FileInfo>,
    pub voice: Option<FileInfo>,
    pub new_chat_members: Option<Vec<User>>,
    pub left_chat_member: Option<User>,
}

impl Message {
    /// Membership notices and similar non-content messages.
    pub fn is_service(&self) -> bool {
        self.new_chat_members.is_some() || self.left_chat_member.is_some()
    }

    /// Bot command name (`/help@MyBot args` → `help`), if the text is one.
    pub fn command(&self) -> Option<String> {
        let text = self.text.as_deref()?.trim_start();
        let word = text.strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word);
        (!name.is_empty()).then(|| name.to_lowercase())
    }

    /// Text (or, failing that, caption) rendered as inline markup.
    pub fn markup(&self) -> String {
        match (&self.text, &self.caption) {
            (Some(text), _) => render_html(text, &self.entities),
            (None, Some(caption)) => render_html(caption, &self.caption_entities),
            (None, None) => String::new(),
        }
    }

    /// Attachment handles in staging order.
    pub fn attachments(&self) -> Vec<AttachmentRef> {
        let mut refs = Vec::new();

        // Largest size is last.
        if let Some(photo) = self.photo.last() {
            let mut r = AttachmentRef::new(AttachmentKind::Photo, &photo.file_id, &photo.file_unique_id);
            r.file_size = photo.file_size;
            refs.push(r);
        }

        let mut push = |kind: AttachmentKind, info: &Option<FileInfo>| {
            if let Some(info) = info {
                refs.push(AttachmentRef {
                    kind,
                    file_id: info.file_id.clone(),
                    file_unique_id: info.file_unique_id.clone(),
                    file_name: info.file_name.clone(),
                    file_size: info.file_size,
                });
            }
        };

        push(AttachmentKind::Video, &self.video);
        // Animations are mirrored into `document`; keep only one copy.
        if self.animation.is_none() {
            push(AttachmentKind::Document, &self.document);
        }
        push(AttachmentKind::Animation, &self.animation);
        push(AttachmentKind::Audio, &self.audio);
        push(AttachmentKind::Voice, &self.voice);

        refs
    }

    /// Identities checked against the sender allowlist.
    pub fn sender_identities(&self) -> Vec<String> {
        let Some(from) = &self.from else {
            return Vec::new();
        };
        let mut ids = vec![from.id.to_string()];
        if let Some(username) = &from.username {
            ids.push(username.clone());
        }
        ids
    }

    pub fn to_raw_event(&self) -> RawEvent {
        RawEvent {
            chat_id: self.chat.id,
            message_id: self.message_id,
            group_id: self.media_group_id.clone(),
            markup: self.markup(),
            attachments: self.attachments(),
            received_at: (self.date > 0)
                .then(|| DateTime::from_timestamp(self.date, 0))
                .flatten()
                .unwrap_or_else(Utc::now),
        }
    }
}

// ── Entity rendering ────────────────────────────────────────────────

/// Escape text for inclusion in HTML (content or attribute value).
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Opening and closing tags for an entity, or `None` for entity kinds that
/// render as plain text (mentions, hashtags, bare URLs, ...).
fn entity_tags(entity: &MessageEntity) -> Option<(String, String)> {
    let pair = |tag: &str| (format!("<{tag}>"), format!("</{tag}>"));
    match entity.kind.as_str() {
        "bold" => Some(pair("b")),
        "italic" => Some(pair("i")),
        "underline" => Some(pair("u")),
        "strikethrough" => Some(pair("s")),
        "code" => Some(pair("code")),
        "blockquote" | "expandable_blockquote" => Some(pair("blockquote")),
        "spoiler" => Some((r#"<span class="tg-spoiler">"#.into(), "</span>".into())),
        "pre" => Some(match entity.language.as_deref().filter(|l| !l.is_empty()) {
            Some(lang) => (
                format!(r#"<pre><code class="language-{}">"#, escape_html(lang)),
                "</code></pre>".into(),
            ),
            None => pair("pre"),
        }),
        "text_link" => entity
            .url
            .as_deref()
            .map(|url| (format!(r#"<a href="{}">"#, escape_html(url)), "</a>".into())),
        "text_mention" => entity
            .user
            .as_ref()
            .map(|u| (format!(r#"<a href="tg://user?id={}">"#, u.id), "</a>".into())),
        _ => None,
    }
}

/// Render `text` with its entities as HTML inline markup.
///
/// Offsets are UTF-16 code units, as the Bot API defines them. Entities are
/// expected to nest; text outside any entity is escaped.
pub fn render_html(text: &str, entities: &[MessageEntity]) -> String {
    let units: Vec<u16> = text.encode_utf16().collect();
    let len = units.len();

    struct Span {
        start: usize,
        end: usize,
        open: String,
        close: String,
    }

    let mut spans: Vec<Span> = entities
        .iter()
        .filter(|e| e.length > 0 && e.offset < len)
        .filter_map(|e| {
            entity_tags(e).map(|(open, close)| Span {
                start: e.offset,
                end: (e.offset + e.length).min(len),
                open,
                close,
            })
        })
        .collect();
    // Outer entities first when they start at the same offset.
    spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut out = String::with_capacity(text.len());
    let mut open: Vec<&Span> = Vec::new();
    let mut next = 0;
    let mut pos = 0;

    loop {
        while let Some(top) = open.last()
            && top.end <= pos
        {
            out.push_str(&top.close);
            open.pop();
        }
        while next < spans.len() && spans[next].start <= pos {
            out.push_str(&spans[next].open);
            open.push(&spans[next]);
            next += 1;
        }
        if pos >= len {
            break;
        }

        let boundary = open
            .iter()
            .map(|s| s.end)
            .chain(spans.get(next).map(|s| s.start))
            .filter(|&b| b > pos)
            .min()
            .unwrap_or(len)
            .min(len);
        out.push_str(&escape_html(&String::from_utf16_lossy(&units[pos..boundary])));
        pos = boundary;
    }

    // Anything left open (improper nesting) is closed at the end.
    while let Some(span) = open.pop() {
        out.push_str(&span.close);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(kind: &str, offset: usize, length: usize) -> MessageEntity {
        MessageEntity {
            kind: kind.to_string(),
            offset,
            length,
            url: None,
            user: None,
            language: None,
        }
    }

    // ── Rendering ───────────────────────────────────────────────────

    #[test]
    fn plain_text_is_escaped() {
        assert_eq!(render_html("a < b & c", &[]), "a &lt; b &amp; c");
    }

    #[test]
    fn bold_and_italic() {
        let html = render_html("hello world", &[entity("bold", 0, 5), entity("italic", 6, 5)]);
        assert_eq!(html, "<b>hello</b> <i>world</i>");
    }

    #[test]
    fn nested_entities() {
        let html = render_html("abc def", &[entity("italic", 4, 3), entity("bold", 0, 7)]);
        assert_eq!(html, "<b>abc <i>def</i></b>");
    }

    #[test]
    fn offsets_are_utf16_units() {
        // 👍 is two UTF-16 units
        let html = render_html("👍 ok", &[entity("bold", 3, 2)]);
        assert_eq!(html, "👍 <b>ok</b>");
    }

    #[test]
    fn text_link_escapes_url() {
        let mut link = entity("text_link", 0, 4);
        link.url = Some(r#"https://x.io/?a=1&b="2""#.into());
        let html = render_html("site", &[link]);
        assert_eq!(
            html,
            r#"<a href="https://x.io/?a=1&amp;b=&quot;2&quot;">site</a>"#
        );
    }

    #[test]
    fn pre_with_language() {
        let mut pre = entity("pre", 0, 6);
        pre.language = Some("rust".into());
        assert_eq!(
            render_html("fn x()", &[pre]),
            r#"<pre><code class="language-rust">fn x()</code></pre>"#
        );
    }

    #[test]
    fn text_mention_links_user() {
        let mut mention = entity("text_mention", 0, 3);
        mention.user = Some(User {
            id: 77,
            first_name: "Ann".into(),
            username: None,
        });
        assert_eq!(render_html("Ann", &[mention]), r#"<a href="tg://user?id=77">Ann</a>"#);
    }

    #[test]
    fn unknown_and_empty_entities_are_plain() {
        let html = render_html(
            "#tag @me",
            &[entity("hashtag", 0, 4), entity("mention", 5, 3), entity("bold", 2, 0)],
        );
        assert_eq!(html, "#tag @me");
    }

    #[test]
    fn entity_past_end_is_clamped() {
        assert_eq!(render_html("abc", &[entity("code", 1, 10)]), "a<code>bc</code>");
    }

    // ── Message conversion ──────────────────────────────────────────

    fn parse(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn caption_used_when_no_text() {
        let msg = parse(serde_json::json!({
            "message_id": 5,
            "chat": {"id": 42},
            "date": 1_700_000_000,
            "media_group_id": "13579",
            "caption": "look",
            "caption_entities": [{"type": "bold", "offset": 0, "length": 4}],
            "photo": [
                {"file_id": "small", "file_unique_id": "s1", "file_size": 100},
                {"file_id": "big", "file_unique_id": "b1", "file_size": 9000}
            ]
        }));

        let ev = msg.to_raw_event();
        assert_eq!(ev.chat_id, 42);
        assert_eq!(ev.group_id.as_deref(), Some("13579"));
        assert_eq!(ev.markup, "<b>look</b>");
        assert_eq!(ev.attachments.len(), 1);
        assert_eq!(ev.attachments[0].file_id, "big");
        assert_eq!(ev.attachments[0].file_size, Some(9000));
    }

    #[test]
    fn animation_document_mirror_is_dropped() {
        let file = serde_json::json!({"file_id": "f", "file_unique_id": "u", "file_name": "cat.mp4"});
        let msg = parse(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 1},
            "animation": file,
            "document": file,
            "voice": {"file_id": "v", "file_unique_id": "vu"}
        }));
        let kinds: Vec<AttachmentKind> = msg.attachments().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AttachmentKind::Animation, AttachmentKind::Voice]);
    }

    #[test]
    fn attachment_order_matches_staging_order() {
        let f = |id: &str| serde_json::json!({"file_id": id, "file_unique_id": id});
        let msg = parse(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 1},
            "photo": [f("p")],
            "video": f("v"),
            "document": f("d"),
            "audio": f("a")
        }));
        let ids: Vec<String> = msg.attachments().into_iter().map(|a| a.file_id).collect();
        assert_eq!(ids, vec!["p", "v", "d", "a"]);
    }

    #[test]
    fn command_parsing() {
        let mut msg = parse(serde_json::json!({
            "message_id": 1, "chat": {"id": 1}, "text": "/Help@RelayBot now"
        }));
        assert_eq!(msg.command().as_deref(), Some("help"));
        msg.text = Some("not /a command".into());
        assert_eq!(msg.command(), None);
        msg.text = Some("/".into());
        assert_eq!(msg.command(), None);
    }

    #[test]
    fn service_message_detected() {
        let msg = parse(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 1},
            "new_chat_members": [{"id": 3, "first_name": "Bo"}]
        }));
        assert!(msg.is_service());
    }

    #[test]
    fn sender_identities_include_id_and_username() {
        let msg = parse(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 1},
            "from": {"id": 123, "first_name": "A", "username": "alice"}
        }));
        assert_eq!(msg.sender_identities(), vec!["123", "alice"]);
    }

    #[test]
    fn update_prefers_message_then_channel_post() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 9,
            "channel_post": {"message_id": 4, "chat": {"id": -100}}
        }))
        .unwrap();
        assert_eq!(update.into_message().map(|m| m.chat.id), Some(-100));
    }
}
