//! End-to-end prompt assembly through `RagService`.

use std::sync::Arc;

use async_trait::async_trait;
use chorus_context::{
    AttachmentDescription, AttachmentKind, ContextRequest, CurrentTurn, EngineOptions, Location,
    RagService, RequestContext, Section,
};
use chorus_core::{
    ConversationEntry, CrossChannelGroup, EntryId, HeuristicCounter, ImageDescription,
    MemoryDocument, MemoryQuery, MemoryRetriever, Participant, Personality, QuotedMessage,
    RawEntry, RetrievalError, Role, normalize_entries,
};
use chorus_telemetry::{InMemoryRecorder, Stage};
use chrono::{DateTime, Duration, TimeZone, Utc};

struct FixedRetriever(Vec<MemoryDocument>);

#[async_trait]
impl MemoryRetriever for FixedRetriever {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryDocument>, RetrievalError> {
        Ok(self.0.iter().take(query.limit).cloned().collect())
    }
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, hour, minute, 0).unwrap()
}

fn context() -> RequestContext {
    RequestContext::new(
        Personality::new("lila", "Lila").with_description("A cheerful librarian who loves tea."),
    )
    .with_timezone_name("America/New_York", chrono_tz::UTC)
    .with_now(at(18, 3))
    .with_request_id("req-e2e")
    .with_location(Location {
        server_name: Some("Book Club".into()),
        channel_name: Some("#reading".into()),
        topic: None,
        direct_message: false,
    })
}

fn quote_of_m1() -> QuotedMessage {
    QuotedMessage {
        id: EntryId::new("m1"),
        author: "Lila".into(),
        role: Role::User,
        content: "Has anyone read Piranesi?".into(),
        created_at: Some(at(17, 0)),
    }
}

fn history() -> Vec<ConversationEntry> {
    vec![
        ConversationEntry::user("m1", "p-1", "Lila", "Has anyone read Piranesi?", at(17, 0))
            .with_handle("lbds137"),
        ConversationEntry::assistant("m2", "Lila", "I adore that book!", at(17, 1)),
        ConversationEntry::user("m3", "p-2", "Bob", "Me too. <script>alert(1)</script>", at(17, 2))
            .with_quote(quote_of_m1())
            .with_transport_ids(vec!["m3".into(), "m3-b".into()]),
    ]
}

fn request() -> ContextRequest {
    ContextRequest::new(
        context(),
        CurrentTurn::new("What should we read next?")
            .with_attachment(AttachmentDescription {
                kind: AttachmentKind::Image,
                name: Some("shelf.jpg".into()),
                description: "a crowded bookshelf".into(),
            })
            .with_reference(QuotedMessage {
                id: EntryId::new("old-9"),
                author: "Bob".into(),
                role: Role::User,
                content: "We should try something by Le Guin".into(),
                created_at: None,
            }),
    )
    .with_history(history())
    .with_participants(vec![
        Participant::user("p-1", "Lila").with_handle("lbds137"),
        Participant::user("p-2", "Bob"),
        Participant::personality("lila", "Lila"),
    ])
    .with_image_descriptions(vec![ImageDescription {
        transport_id: "m3-b".into(),
        description: "a photo of a labyrinthine house".into(),
    }])
}

fn service() -> RagService {
    RagService::new(Arc::new(HeuristicCounter::default()), EngineOptions::default())
}

#[tokio::test]
async fn full_assembly() {
    let recorder = Arc::new(InMemoryRecorder::new(10));
    let svc = service()
        .with_recorder(recorder.clone())
        .with_retriever(Arc::new(FixedRetriever(vec![
            MemoryDocument::new("mem-1", "Bob prefers science fiction").created_at(at(12, 0)),
            MemoryDocument::new("mem-2", "Lila's favourite tea is oolong"),
        ])));

    let prepared = svc.prepare(request()).await.unwrap();
    let prompt = &prepared.system_prompt;

    // Sections in their fixed order.
    let order: Vec<Section> = prepared.sections.iter().map(|s| s.section).collect();
    assert_eq!(
        order,
        vec![
            Section::Identity,
            Section::IdentityConstraints,
            Section::PlatformConstraints,
            Section::Context,
            Section::Participants,
            Section::MemoryArchive,
            Section::ReferencedMessages,
            Section::ChatLog,
            Section::BehaviorProtocol,
            Section::OutputConstraints,
        ]
    );

    // Context in the requester's timezone.
    assert!(prompt.contains("Monday, October 19, 2026 at 2:03 PM EDT"));
    assert!(prompt.contains("<request_id>req-e2e</request_id>"));

    // The user named Lila is never confused with the personality.
    assert!(prompt.contains(r#"<message from="Lila (@lbds137)" role="user" id="m1""#));
    assert!(prompt.contains(r#"<message from="Lila" role="assistant" id="m2""#));
    assert!(prompt.contains(r#"<message from="Bob" role="user" id="m3""#));
    assert!(prompt.contains("Lila (@lbds137) is a user who shares your name"));

    // Chronological, escaped, quote of an included entry not repeated.
    let m1 = prompt.find(r#"id="m1""#).unwrap();
    let m3 = prompt.find(r#"id="m3""#).unwrap();
    assert!(m1 < m3);
    assert!(prompt.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    assert!(!prompt.contains("<script>"));
    assert_eq!(prompt.matches("Has anyone read Piranesi?").count(), 1);
    assert!(prompt.contains("<image_description>a photo of a labyrinthine house</image_description>"));

    // Memories with and without dates.
    assert!(prompt.contains("[Mon, Oct 19, 2026] Bob prefers science fiction"));
    assert!(prompt.contains("Lila&apos;s favourite tea is oolong"));

    // The referenced message lives in the system prompt, the pointer in the turn.
    assert!(prompt.contains("We should try something by Le Guin"));
    let human = &prepared.human_message;
    assert_eq!(human.plain_content, "What should we read next?");
    assert!(human.content.contains("a crowded bookshelf"));
    assert!(human.content.contains(r#"<reference id="old-9" from="Bob"/>"#));

    // Budget bookkeeping and diagnostics.
    let budget = &prepared.budget;
    assert!(budget.within_window());
    assert_eq!(budget.memory_tokens_used, prepared.memory.tokens_used);
    assert_eq!(prepared.history.included, 3);
    assert_eq!(prepared.history.dropped, 0);

    let record = recorder.by_request("req-e2e").unwrap();
    assert_eq!(record.int(Stage::MemorySelection, "selected"), Some(2));
    assert_eq!(
        record.int(Stage::FinalPrompt, "total_tokens"),
        Some((budget.final_prompt_tokens + budget.current_message_tokens) as i64)
    );
    assert_eq!(record.human_message.as_deref(), Some(human.content.as_str()));
}

#[test]
fn cross_channel_history_precedes_current_channel() {
    let groups = vec![CrossChannelGroup {
        channel_name: "#general".into(),
        server_name: Some("Book Club".into()),
        entries: vec![
            ConversationEntry::user("g1", "p-2", "Bob", "Anyone around?", at(9, 0)),
            ConversationEntry::user("g2", "p-2", "Bob", "Guess not.", at(9, 1)),
        ],
    }];

    let prepared = service()
        .build_context(request().with_cross_channel(groups), &[])
        .unwrap();
    let prompt = &prepared.system_prompt;

    let cross = prompt.find("<other_channels>").unwrap();
    let channel = prompt.find(r##"<channel name="#general" server="Book Club">"##).unwrap();
    let current = prompt.find(r#"id="m1""#).unwrap();
    assert!(cross < channel && channel < current);

    let cc = prepared.cross_channel.as_ref().unwrap();
    assert_eq!(cc.groups_included, 1);
    assert_eq!(cc.included, 2);
    assert!(prepared.budget.cross_channel_tokens_used > 0);
}

#[test]
fn raw_records_normalize_into_history() {
    let raw: Vec<RawEntry> = serde_json::from_value(serde_json::json!([
        {
            "id": "r1",
            "role": "USER",
            "content": "hello",
            "created_at": "2026-10-19T16:00:00Z",
            "persona_id": "p-2",
            "display_name": "Bob"
        },
        {
            "id": "r2",
            "role": "system",
            "content": "ignored",
            "created_at": "2026-10-19T16:01:00Z"
        },
        {
            "id": "r3",
            "role": "assistant",
            "content": "hi Bob",
            "created_at": "2026-10-19T16:02:00Z",
            "personality_name": "Lila"
        }
    ]))
    .unwrap();

    let history = normalize_entries(raw);
    assert_eq!(history.len(), 2);

    let prepared = service()
        .build_context(
            ContextRequest::new(context(), CurrentTurn::new("hey")).with_history(history),
            &[],
        )
        .unwrap();
    assert!(prepared.system_prompt.contains(r#"id="r1""#));
    assert!(prepared.system_prompt.contains(r#"id="r3""#));
    assert!(!prepared.system_prompt.contains("ignored"));
}

#[test]
fn retries_with_reduction_keep_the_newest_entries() {
    let start = at(8, 0);
    let long_history: Vec<ConversationEntry> = (0..200)
        .map(|i| {
            ConversationEntry::user(
                format!("h{i}"),
                "p-2",
                "Bob",
                format!("message number {i} ").repeat(10),
                start + Duration::minutes(i),
            )
        })
        .collect();

    let mut personality = Personality::new("lila", "Lila");
    personality.context_window_tokens = Some(6000);
    let ctx = RequestContext::new(personality).with_now(at(18, 0));

    let svc = service();
    let first = svc
        .build_context(
            ContextRequest::new(ctx.clone(), CurrentTurn::new("and?"))
                .with_history(long_history.clone()),
            &[],
        )
        .unwrap();
    let retry = svc
        .build_context(
            ContextRequest::new(ctx, CurrentTurn::new("and?"))
                .with_history(long_history)
                .with_history_reduction(30),
            &[],
        )
        .unwrap();

    assert!(retry.history.included < first.history.included);
    assert!(retry.system_prompt.contains(r#"id="h199""#));
    assert!(first.budget.history_tokens_used <= first.budget.history_budget);
    assert!(retry.budget.history_tokens_used <= retry.budget.history_budget);
}
